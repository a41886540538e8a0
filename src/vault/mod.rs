//! Credential Vault (C3)
//!
//! Encrypted-at-rest storage for API keys, bearer tokens, OAuth token
//! pairs, and login pairs, keyed by a label-scoped URL glob (`*.github.com`)
//! the [`crate::resolver`] matches outbound requests against.

pub mod crypto;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::ids;
use crate::{CodeCoderError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialSecret {
    ApiKey {
        key: String,
    },
    BearerToken {
        token: String,
    },
    OAuth {
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        token_url: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    },
    Login {
        username: String,
        password: String,
    },
}

impl CredentialSecret {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSecret::ApiKey { .. } => "api_key",
            CredentialSecret::BearerToken { .. } => "bearer_token",
            CredentialSecret::OAuth { .. } => "oauth",
            CredentialSecret::Login { .. } => "login",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub label: String,
    /// A label-scoped glob, e.g. `*.github.com`, matched against request
    /// hostnames by [`crate::resolver`].
    pub url_pattern: String,
    pub secret: CredentialSecret,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Redacted view returned by `list()` — never carries secret material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: String,
    pub label: String,
    pub url_pattern: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialSummary {
    fn from(c: &Credential) -> Self {
        Self {
            id: c.id.clone(),
            label: c.label.clone(),
            url_pattern: c.url_pattern.clone(),
            kind: c.secret.kind().to_string(),
            created_at: c.created_at,
            last_used_at: c.last_used_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    id: String,
    label: String,
    url_pattern: String,
    created_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
    envelope: String,
}

pub struct Vault {
    path: PathBuf,
    key: Zeroizing<[u8; 32]>,
    entries: Mutex<HashMap<String, Credential>>,
}

impl Vault {
    pub fn open(path: impl AsRef<Path>, account: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let fallback_key_path = path.with_extension("key");
        let master = crypto::load_or_create_master_key(account, &fallback_key_path)?;
        let key = crypto::derive_key(&master, b"credential-envelope");

        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let stored: Vec<StoredEntry> = serde_json::from_str(&raw)?;
            let mut map = HashMap::new();
            for entry in stored {
                let plaintext = crypto::decrypt(&key, &crypto::Envelope(entry.envelope))?;
                let secret: CredentialSecret = serde_json::from_slice(&plaintext)?;
                map.insert(
                    entry.id.clone(),
                    Credential {
                        id: entry.id,
                        label: entry.label,
                        url_pattern: entry.url_pattern,
                        secret,
                        created_at: entry.created_at,
                        last_used_at: entry.last_used_at,
                    },
                );
            }
            map
        } else {
            HashMap::new()
        };

        Ok(Self { path, key, entries: Mutex::new(entries) })
    }

    pub fn create(&self, label: &str, url_pattern: &str, secret: CredentialSecret) -> Result<String> {
        let mut entries = self.entries.lock().expect("vault lock poisoned");
        if entries.values().any(|c| c.url_pattern == url_pattern) {
            return Err(CodeCoderError::CredentialConflict(format!(
                "a credential already exists for pattern '{url_pattern}'"
            )));
        }

        let credential = Credential {
            id: ids::new_id(ids::prefix::CREDENTIAL),
            label: label.to_string(),
            url_pattern: url_pattern.to_string(),
            secret,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let id = credential.id.clone();
        entries.insert(id.clone(), credential);
        self.persist(&entries)?;
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Result<Credential> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries.get(id).cloned().ok_or_else(|| CodeCoderError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("vault lock poisoned");
        if entries.remove(id).is_none() {
            return Err(CodeCoderError::NotFound(id.to_string()));
        }
        self.persist(&entries)
    }

    pub fn list(&self) -> Vec<CredentialSummary> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries.values().map(CredentialSummary::from).collect()
    }

    /// The credential whose url_pattern best matches `host`, preferring
    /// the most specific (longest literal prefix) pattern when more than
    /// one matches.
    pub fn resolve_for_url(&self, host: &str) -> Option<Credential> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries
            .values()
            .filter(|c| matches_pattern(&c.url_pattern, host))
            .max_by_key(|c| literal_prefix_len(&c.url_pattern))
            .cloned()
    }

    pub fn resolve_for_service(&self, label: &str) -> Option<Credential> {
        let entries = self.entries.lock().expect("vault lock poisoned");
        entries.values().find(|c| c.label == label).cloned()
    }

    pub fn mark_used(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("vault lock poisoned");
        let credential = entries.get_mut(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        credential.last_used_at = Some(Utc::now());
        self.persist(&entries)
    }

    pub fn update_oauth_tokens(
        &self,
        id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut entries = self.entries.lock().expect("vault lock poisoned");
        let credential = entries.get_mut(id).ok_or_else(|| CodeCoderError::NotFound(id.to_string()))?;
        let CredentialSecret::OAuth { refresh_token: existing_refresh, .. } = &credential.secret else {
            return Err(CodeCoderError::InvalidArgument(format!("credential '{id}' is not an oauth credential")));
        };
        let refresh_token = refresh_token.or_else(|| existing_refresh.clone());

        let (token_url, client_id, client_secret) = match &credential.secret {
            CredentialSecret::OAuth { token_url, client_id, client_secret, .. } => {
                (token_url.clone(), client_id.clone(), client_secret.clone())
            }
            _ => unreachable!(),
        };

        credential.secret = CredentialSecret::OAuth {
            access_token,
            refresh_token,
            expires_at,
            token_url,
            client_id,
            client_secret,
        };
        self.persist(&entries)
    }

    fn persist(&self, entries: &HashMap<String, Credential>) -> Result<()> {
        let mut stored = Vec::with_capacity(entries.len());
        for credential in entries.values() {
            let plaintext = serde_json::to_vec(&credential.secret)?;
            let envelope = crypto::encrypt(&self.key, &plaintext)?;
            stored.push(StoredEntry {
                id: credential.id.clone(),
                label: credential.label.clone(),
                url_pattern: credential.url_pattern.clone(),
                created_at: credential.created_at,
                last_used_at: credential.last_used_at,
                envelope: envelope.0,
            });
        }

        let json = serde_json::to_vec_pretty(&stored)?;
        let tmp_path = self.path.with_extension("json.tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&tmp_path, &json)?;
        }

        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// `*` matches any run of characters (including none); everything else
/// must match literally. No `?`, character classes, or `**` — the vault
/// only ever needs hostname-shaped patterns.
fn matches_pattern(pattern: &str, host: &str) -> bool {
    fn go(pattern: &[u8], host: &[u8]) -> bool {
        match pattern.first() {
            None => host.is_empty(),
            Some(b'*') => {
                (0..=host.len()).any(|i| go(&pattern[1..], &host[i..]))
            }
            Some(&c) => host.first() == Some(&c) && go(&pattern[1..], &host[1..]),
        }
    }
    go(pattern.as_bytes(), host.as_bytes())
}

fn literal_prefix_len(pattern: &str) -> usize {
    pattern.bytes().take_while(|&b| b != b'*').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> Vault {
        let dir = tempfile::tempdir().unwrap();
        Vault::open(dir.path().join("vault.json"), "test-account").unwrap()
    }

    #[test]
    fn wildcard_pattern_matches_subdomain() {
        assert!(matches_pattern("*.github.com", "api.github.com"));
        assert!(!matches_pattern("*.github.com", "github.com"));
        assert!(matches_pattern("github.com", "github.com"));
    }

    #[test]
    fn create_get_delete_round_trip() {
        let vault = vault();
        let id = vault
            .create("github", "*.github.com", CredentialSecret::ApiKey { key: "secret-token".into() })
            .unwrap();

        let credential = vault.get(&id).unwrap();
        assert_eq!(credential.label, "github");

        vault.delete(&id).unwrap();
        assert!(vault.get(&id).is_err());
    }

    #[test]
    fn list_never_exposes_secret_material() {
        let vault = vault();
        vault.create("github", "*.github.com", CredentialSecret::ApiKey { key: "secret-token".into() }).unwrap();
        let summaries = vault.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].kind, "api_key");
    }

    #[test]
    fn duplicate_pattern_is_a_conflict() {
        let vault = vault();
        vault.create("a", "*.github.com", CredentialSecret::ApiKey { key: "x".into() }).unwrap();
        let result = vault.create("b", "*.github.com", CredentialSecret::ApiKey { key: "y".into() });
        assert!(matches!(result, Err(CodeCoderError::CredentialConflict(_))));
    }

    #[test]
    fn resolve_for_url_prefers_most_specific_pattern() {
        let vault = vault();
        vault.create("wildcard", "*.github.com", CredentialSecret::ApiKey { key: "x".into() }).unwrap();
        vault.create("exact", "api.github.com", CredentialSecret::ApiKey { key: "y".into() }).unwrap();

        let resolved = vault.resolve_for_url("api.github.com").unwrap();
        assert_eq!(resolved.label, "exact");
    }

    #[test]
    fn reopening_vault_decrypts_persisted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        {
            let vault = Vault::open(&path, "acct").unwrap();
            vault.create("github", "*.github.com", CredentialSecret::ApiKey { key: "secret".into() }).unwrap();
        }
        let reopened = Vault::open(&path, "acct").unwrap();
        let summaries = reopened.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].label, "github");
    }
}
