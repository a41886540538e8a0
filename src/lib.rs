//! # CodeCoder — Task & Permission Supervision Runtime
//!
//! CodeCoder dispatches user prompts to LLM-backed agents, supervises their
//! tool calls with policy gates, records causal traces, and exposes the
//! system as both an interactive server (RPC/MCP) and an async task service.
//!
//! ## Invariant
//!
//! Every externally observable side effect caused by an agent is
//! attributable to a Decision → Action → Outcome chain, guarded by a policy
//! decision, annotated with a trace span, and optionally gated by a human.
//!
//! ## Components
//!
//! - [`ids`] — monotonic clock and k-sortable identifiers (C1)
//! - [`observability`] — trace/span propagation, structured log sink (C2)
//! - [`vault`] — encrypted-at-rest credential storage (C3)
//! - [`resolver`] — URL/service → auth headers, OAuth refresh (C4)
//! - [`session_store`] — persisted browser session blobs (C5)
//! - [`causal`] — append-only Decision/Action/Outcome graph (C6)
//! - [`permission`] — risk assessment and approval policy (C7)
//! - [`task`] — task lifecycle, event fanout (C8)
//! - [`rpc`] — namespaced method dispatch over in-process/HTTP/MCP (C9)
//! - [`scanner`] — prompt-injection pattern classifier (C10)
//! - [`workspace`] — on-disk layout and hot-reloaded configuration (C11)
//! - [`autoapprove`] — stock permission policies (C12)
//! - [`agent`] — the agent-runtime seam the supervisor drives

pub mod ids;
pub mod observability;
pub mod vault;
pub mod resolver;
pub mod session_store;
pub mod causal;
pub mod permission;
pub mod task;
pub mod agent;
pub mod scanner;
pub mod workspace;
pub mod autoapprove;
pub mod rpc;

use thiserror::Error;

/// Crate-wide error type. Component errors (`VaultError`, `PermissionError`,
/// ...) are distinct types at their call sites and fold into this one at
/// module boundaries, the way a supervisor reports task failure.
#[derive(Error, Debug)]
pub enum CodeCoderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("permission rejected: {0}")]
    PermissionRejected(String),

    #[error("vault locked: {0}")]
    VaultLocked(String),

    #[error("vault corrupt: {0}")]
    VaultCorrupt(String),

    #[error("credential conflict: {0}")]
    CredentialConflict(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("state conflict: {0}")]
    StateConflict(String),

    #[error("already decided")]
    AlreadyDecided,

    #[error("terminal state")]
    TerminalState,

    #[error("task transition error: {0}")]
    TaskTransitionError(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodeCoderError>;

/// Top-level runtime configuration, merged from `config.json` plus overlays
/// (see [`workspace::WorkspaceConfig`] for the on-disk layout this is loaded
/// from).
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct CodeCoderConfig {
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
    pub permission: PermissionConfig,
    pub workspace_root: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ObservabilityConfig {
    pub enabled: bool,
    pub level: String,
    pub sampling: f64,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct PermissionConfig {
    pub auto_approve: bool,
    pub auto_approve_threshold: String,
    pub auto_approve_tools: Vec<String>,
    pub auto_approve_timeout_ms: u64,
}

impl Default for CodeCoderConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8787,
                api_key: None,
                cors_origins: vec![],
            },
            observability: ObservabilityConfig {
                enabled: true,
                level: "info".to_string(),
                sampling: 1.0,
            },
            permission: PermissionConfig {
                auto_approve: false,
                auto_approve_threshold: "low".to_string(),
                auto_approve_tools: vec![],
                auto_approve_timeout_ms: 0,
            },
            workspace_root: None,
        }
    }
}
