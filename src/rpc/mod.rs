//! RPC Surface (C9)
//!
//! A namespaced JSON-RPC 2.0 method table — `tasks/*`, `tools/*`,
//! `prompts/*`, `resources/*`, `scanner/*` — reachable over a local HTTP
//! transport today, with the MCP method names kept in sync so the same
//! dispatcher could sit behind an MCP stdio transport later without a
//! rewrite.

pub mod dispatch;
pub mod http;
pub mod protocol;

pub use dispatch::{dispatch, RpcContext};
pub use http::HttpState;
