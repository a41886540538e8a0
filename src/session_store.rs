//! Session Store (C5)
//!
//! Persists Playwright-compatible browser storage-state blobs (cookies +
//! origin-scoped local storage) under `<workspace>/sessions/<label>.json`,
//! one file per labeled session.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CodeCoderError, Result};

const MAX_AGE_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Unix seconds; Playwright uses `-1` for session-scoped cookies.
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OriginState {
    pub origin: String,
    #[serde(default)]
    pub local_storage: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
}

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let root = workspace_root.as_ref().join("sessions");
        std::fs::create_dir_all(&root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(Self { root })
    }

    pub fn save(&self, label: &str, state: &StorageState) -> Result<()> {
        let path = self.path_for(label)?;
        let json = serde_json::to_vec_pretty(state)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(&json)?;
        }
        #[cfg(not(unix))]
        {
            std::fs::write(&path, &json)?;
        }
        Ok(())
    }

    pub fn load(&self, label: &str) -> Result<Option<StorageState>> {
        let path = self.path_for(label)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    pub fn clear(&self, label: &str) -> Result<()> {
        let path = self.path_for(label)?;
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut labels = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if let Some(name) = entry.path().file_stem().and_then(|s| s.to_str()) {
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    labels.push(name.to_string());
                }
            }
        }
        Ok(labels)
    }

    /// A session is valid when its file exists, was written within the
    /// last 30 days, carries at least one cookie, and at least one cookie
    /// is either session-scoped (`expires == -1`) or not yet expired.
    pub fn has_valid(&self, label: &str) -> Result<bool> {
        let path = self.path_for(label)?;
        if !path.exists() {
            return Ok(false);
        }

        let metadata = std::fs::metadata(&path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        if Utc::now().signed_duration_since(modified) > chrono::Duration::days(MAX_AGE_DAYS) {
            return Ok(false);
        }

        let Some(state) = self.load(label)? else {
            return Ok(false);
        };
        if state.cookies.is_empty() {
            return Ok(false);
        }

        let now = Utc::now().timestamp() as f64;
        Ok(state.cookies.iter().any(|c| c.expires < 0.0 || c.expires > now))
    }

    /// Remove every session whose file is older than 30 days or carries
    /// no valid cookie; returns the labels removed.
    pub fn cleanup_expired(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for label in self.list()? {
            if !self.has_valid(&label)? {
                self.clear(&label)?;
                removed.push(label);
            }
        }
        Ok(removed)
    }

    fn path_for(&self, label: &str) -> Result<PathBuf> {
        if label.is_empty() || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(CodeCoderError::InvalidArgument(format!(
                "session label '{label}' must match [A-Za-z0-9_-]+"
            )));
        }
        Ok(self.root.join(format!("{label}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        SessionStore::new(dir.path()).unwrap()
    }

    fn cookie(expires: f64) -> Cookie {
        Cookie {
            name: "session".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires,
            http_only: true,
            secure: true,
        }
    }

    #[test]
    fn save_and_load_round_trip() {
        let store = store();
        let state = StorageState { cookies: vec![cookie(-1.0)], origins: vec![] };
        store.save("github", &state).unwrap();
        let loaded = store.load("github").unwrap().unwrap();
        assert_eq!(loaded.cookies.len(), 1);
    }

    #[test]
    fn valid_with_session_scoped_cookie() {
        let store = store();
        store.save("github", &StorageState { cookies: vec![cookie(-1.0)], origins: vec![] }).unwrap();
        assert!(store.has_valid("github").unwrap());
    }

    #[test]
    fn invalid_with_expired_cookie_only() {
        let store = store();
        let past = (Utc::now() - chrono::Duration::days(1)).timestamp() as f64;
        store.save("github", &StorageState { cookies: vec![cookie(past)], origins: vec![] }).unwrap();
        assert!(!store.has_valid("github").unwrap());
    }

    #[test]
    fn invalid_with_no_cookies() {
        let store = store();
        store.save("github", &StorageState::default()).unwrap();
        assert!(!store.has_valid("github").unwrap());
    }

    #[test]
    fn rejects_unsafe_labels() {
        let store = store();
        let result = store.save("../../etc/passwd", &StorageState::default());
        assert!(result.is_err());
    }

    #[test]
    fn cleanup_removes_invalid_sessions() {
        let store = store();
        store.save("stale", &StorageState::default()).unwrap();
        store.save("fresh", &StorageState { cookies: vec![cookie(-1.0)], origins: vec![] }).unwrap();
        let removed = store.cleanup_expired().unwrap();
        assert_eq!(removed, vec!["stale".to_string()]);
        assert!(store.has_valid("fresh").unwrap());
    }
}
