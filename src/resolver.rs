//! Credential Resolver (C4)
//!
//! Turns a vault credential into outbound request headers, refreshing
//! OAuth tokens against their token endpoint when expired. Concurrent
//! callers resolving the same credential share one in-flight refresh
//! (single-flight): pending requests are keyed by id in an
//! `Arc<RwLock<HashMap<_, oneshot::Sender<_>>>>`, and the first caller
//! in does the work for everyone waiting.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::vault::{Credential, CredentialSecret, Vault};
use crate::{CodeCoderError, Result};

/// A ready-to-send header, produced from a resolved credential.
#[derive(Debug, Clone)]
pub struct ResolvedHeader {
    pub name: String,
    pub value: String,
}

pub struct CredentialResolver {
    vault: Arc<Vault>,
    http: reqwest::Client,
    in_flight: Mutex<HashMap<String, Arc<Notify>>>,
}

impl CredentialResolver {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self {
            vault,
            http: reqwest::Client::new(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a credential by id into the headers it produces, refreshing
    /// an expired OAuth token first if needed.
    pub async fn resolve(&self, credential_id: &str) -> Result<Vec<ResolvedHeader>> {
        let credential = self.ensure_fresh(credential_id).await?;
        let _ = self.vault.mark_used(credential_id);
        Ok(headers_for_secret(&credential.secret))
    }

    /// Resolve by matching the request's hostname against vault patterns.
    pub async fn headers_for_url(&self, url: &str) -> Result<Vec<ResolvedHeader>> {
        let host = reqwest::Url::parse(url)
            .map_err(|e| CodeCoderError::InvalidArgument(format!("invalid url: {e}")))?
            .host_str()
            .ok_or_else(|| CodeCoderError::InvalidArgument("url has no host".to_string()))?
            .to_string();

        let credential = self
            .vault
            .resolve_for_url(&host)
            .ok_or_else(|| CodeCoderError::NotFound(format!("no credential matches host '{host}'")))?;

        self.resolve(&credential.id).await
    }

    /// Apply `headers_for_url`'s output onto an in-flight `reqwest::RequestBuilder`.
    pub async fn inject(&self, builder: reqwest::RequestBuilder, url: &str) -> Result<reqwest::RequestBuilder> {
        let headers = self.headers_for_url(url).await?;
        Ok(headers.into_iter().fold(builder, |b, h| b.header(h.name, h.value)))
    }

    async fn ensure_fresh(&self, credential_id: &str) -> Result<Credential> {
        let credential = self.vault.get(credential_id)?;
        let CredentialSecret::OAuth { expires_at, .. } = &credential.secret else {
            return Ok(credential);
        };

        let needs_refresh = expires_at.is_some_and(|exp| exp <= Utc::now());
        if !needs_refresh {
            return Ok(credential);
        }

        self.refresh_single_flight(credential_id).await
    }

    async fn refresh_single_flight(&self, credential_id: &str) -> Result<Credential> {
        let notify = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(notify) = in_flight.get(credential_id) {
                Some(notify.clone())
            } else {
                in_flight.insert(credential_id.to_string(), Arc::new(Notify::new()));
                None
            }
        };

        if let Some(notify) = notify {
            notify.notified().await;
            return self.vault.get(credential_id);
        }

        let result = self.do_refresh(credential_id).await;

        let mut in_flight = self.in_flight.lock().await;
        if let Some(notify) = in_flight.remove(credential_id) {
            notify.notify_waiters();
        }

        result
    }

    async fn do_refresh(&self, credential_id: &str) -> Result<Credential> {
        let credential = self.vault.get(credential_id)?;
        let CredentialSecret::OAuth { refresh_token, token_url, client_id, client_secret, .. } =
            &credential.secret
        else {
            return Ok(credential);
        };

        let refresh_token = refresh_token
            .clone()
            .ok_or_else(|| CodeCoderError::InvalidArgument("oauth credential has no refresh token".to_string()))?;
        let token_url = token_url
            .clone()
            .ok_or_else(|| CodeCoderError::InvalidArgument("oauth credential has no token url".to_string()))?;

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
        ];
        if let Some(client_id) = client_id {
            form.push(("client_id".to_string(), client_id.clone()));
        }
        if let Some(client_secret) = client_secret {
            form.push(("client_secret".to_string(), client_secret.clone()));
        }
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| CodeCoderError::Internal(format!("failed to encode refresh body: {e}")))?;

        let response = self
            .http
            .post(&token_url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| CodeCoderError::Internal(format!("oauth refresh request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CodeCoderError::Unauthorized(format!(
                "oauth refresh failed with status {}",
                response.status()
            )));
        }

        let payload: TokenResponse = response
            .json()
            .await
            .map_err(|e| CodeCoderError::Internal(format!("oauth refresh response malformed: {e}")))?;

        let expires_at = payload.expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s));
        self.vault.update_oauth_tokens(
            credential_id,
            payload.access_token,
            payload.refresh_token,
            expires_at,
        )?;

        self.vault.get(credential_id)
    }
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

fn headers_for_secret(secret: &CredentialSecret) -> Vec<ResolvedHeader> {
    match secret {
        CredentialSecret::ApiKey { key } => vec![ResolvedHeader {
            name: "x-api-key".to_string(),
            value: key.clone(),
        }],
        CredentialSecret::BearerToken { token } => vec![ResolvedHeader {
            name: "authorization".to_string(),
            value: format!("Bearer {token}"),
        }],
        CredentialSecret::OAuth { access_token, .. } => vec![ResolvedHeader {
            name: "authorization".to_string(),
            value: format!("Bearer {access_token}"),
        }],
        CredentialSecret::Login { username, password } => {
            let encoded = base64::Engine::encode(
                &base64::engine::general_purpose::STANDARD,
                format!("{username}:{password}"),
            );
            vec![ResolvedHeader {
                name: "authorization".to_string(),
                value: format!("Basic {encoded}"),
            }]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn vault() -> Arc<Vault> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(Vault::open(dir.path().join("vault.json"), "test").unwrap())
    }

    #[tokio::test]
    async fn api_key_produces_x_api_key_header() {
        let vault = vault();
        let id = vault
            .create("svc", "*.example.com", CredentialSecret::ApiKey { key: "abc123".into() })
            .unwrap();
        let resolver = CredentialResolver::new(vault);
        let headers = resolver.resolve(&id).await.unwrap();
        assert_eq!(headers[0].name, "x-api-key");
        assert_eq!(headers[0].value, "abc123");
    }

    #[tokio::test]
    async fn bearer_token_produces_authorization_header() {
        let vault = vault();
        let id = vault
            .create("svc", "*.example.com", CredentialSecret::BearerToken { token: "tok".into() })
            .unwrap();
        let resolver = CredentialResolver::new(vault);
        let headers = resolver.resolve(&id).await.unwrap();
        assert_eq!(headers[0].value, "Bearer tok");
    }

    #[tokio::test]
    async fn login_produces_basic_auth_header() {
        let vault = vault();
        let id = vault
            .create(
                "svc",
                "*.example.com",
                CredentialSecret::Login { username: "u".into(), password: "p".into() },
            )
            .unwrap();
        let resolver = CredentialResolver::new(vault);
        let headers = resolver.resolve(&id).await.unwrap();
        assert!(headers[0].value.starts_with("Basic "));
    }

    #[tokio::test]
    async fn headers_for_url_matches_vault_pattern() {
        let vault = vault();
        vault
            .create("svc", "*.example.com", CredentialSecret::ApiKey { key: "abc".into() })
            .unwrap();
        let resolver = CredentialResolver::new(vault);
        let headers = resolver.headers_for_url("https://api.example.com/v1/widgets").await.unwrap();
        assert_eq!(headers[0].value, "abc");
    }
}
