//! Namespaced method dispatch: one function per `tools/*`, `prompts/*`,
//! `resources/*`, `tasks/*`, and `permissions/*` method, behind a single
//! `dispatch` entry point the HTTP and stdio transports both call — a
//! registry routing a method name to the handler that owns it, the
//! same shape as routing a tool name to the server that owns it,
//! generalized to an in-process method table instead of a pool of
//! child-process servers.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::permission::{ExecutionContext, PermissionEngine, ToolCallRequest};
use crate::resolver::CredentialResolver;
use crate::scanner;
use crate::session_store::SessionStore;
use crate::task::{CreateTaskRequest, TaskSupervisor};
use crate::vault::{CredentialSecret, Vault};

use super::protocol::{
    CallToolParams, CallToolResult, JsonRpcError, ListPromptsResult, ListResourcesResult,
    ListToolsResult, McpTool, ToolContent, ToolInputSchema,
};

/// Everything a dispatched method needs. Holds the same subsystems
/// `bootstrap` in `main.rs` wires together, passed by reference rather
/// than threaded through every call — every handler closes over one
/// shared context instead of rebuilding its dependencies per request.
pub struct RpcContext {
    pub supervisor: Arc<TaskSupervisor>,
    pub permission: Arc<PermissionEngine>,
    pub vault: Arc<Vault>,
    pub resolver: Arc<CredentialResolver>,
    pub sessions: Arc<SessionStore>,
}

/// The catalog of tools agents may propose — not executors, just the
/// schema surfaced to `tools/list`. Execution happens wherever the
/// `AgentRuntime`'s caller actually runs the approved tool.
static TOOL_CATALOG: Lazy<Vec<McpTool>> = Lazy::new(|| {
    let simple = |name: &str, description: &str| McpTool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: ToolInputSchema { schema_type: "object".to_string(), properties: None, required: None },
    };
    vec![
        simple("read_file", "Read a file's contents"),
        simple("list_files", "List files in a directory"),
        simple("grep", "Search file contents by pattern"),
        simple("glob", "Find files by glob pattern"),
        simple("web_search", "Search the web"),
        simple("write_file", "Create or overwrite a file"),
        simple("edit_file", "Apply an edit to an existing file"),
        simple("http_get", "Issue an HTTP GET request"),
        simple("http_post", "Issue an HTTP POST request"),
        simple("bash", "Run a shell command"),
        simple("execute", "Run an arbitrary executable"),
    ]
});

pub async fn dispatch(ctx: &RpcContext, method: &str, params: Option<Value>) -> Result<Value, JsonRpcError> {
    match method {
        // `tasks/*` is the slash-path alias the HTTP/MCP transports use
        // alongside the dot-path `task.*` names the generic namespaced
        // dispatcher contract names (`{namespace, method, args}` with
        // `method` a dot-path like `task.create`).
        "tasks/create" | "task.create" => {
            let req: CreateTaskRequest = parse_params(params)?;
            let id = ctx.supervisor.create(req).await?;
            Ok(serde_json::json!({ "task_id": id }))
        }
        "tasks/get" | "task.get" => {
            let id = param_str(&params, "id")?;
            let task = ctx.supervisor.get(&id).await?;
            Ok(serde_json::to_value(task).expect("Task serializes"))
        }
        "tasks/list" | "task.list" => {
            let tasks = ctx.supervisor.list().await;
            Ok(serde_json::to_value(tasks).expect("Vec<Task> serializes"))
        }
        "tasks/cancel" | "task.cancel" => {
            let id = param_str(&params, "id")?;
            ctx.supervisor.cancel(&id).await?;
            Ok(serde_json::json!({ "cancelled": true }))
        }
        "tasks/interact" | "task.interact" => {
            #[derive(serde::Deserialize)]
            struct Interact {
                id: String,
                approved: bool,
            }
            let req: Interact = parse_params(params)?;
            ctx.supervisor.interact(&req.id, req.approved).await?;
            Ok(serde_json::json!({ "acknowledged": true }))
        }
        "vault.add" => {
            #[derive(serde::Deserialize)]
            struct Add {
                label: String,
                url_pattern: String,
                secret: CredentialSecret,
            }
            let req: Add = parse_params(params)?;
            let id = ctx.vault.create(&req.label, &req.url_pattern, req.secret)?;
            Ok(serde_json::json!({ "id": id }))
        }
        "vault.get" => {
            let id = param_str(&params, "id")?;
            Ok(serde_json::to_value(ctx.vault.get(&id)?).expect("Credential serializes"))
        }
        "vault.list" => Ok(serde_json::to_value(ctx.vault.list()).expect("Vec<CredentialSummary> serializes")),
        "vault.delete" => {
            let id = param_str(&params, "id")?;
            ctx.vault.delete(&id)?;
            Ok(serde_json::json!({ "deleted": true }))
        }
        "vault.resolve_for_url" => {
            let url = param_str(&params, "url")?;
            let headers = ctx.resolver.headers_for_url(&url).await?;
            let headers: Vec<_> = headers.into_iter().map(|h| serde_json::json!({"name": h.name, "value": h.value})).collect();
            Ok(serde_json::json!({ "headers": headers }))
        }
        "vault.resolve_for_service" => {
            let label = param_str(&params, "label")?;
            match ctx.vault.resolve_for_service(&label) {
                Some(credential) => Ok(serde_json::to_value(credential).expect("Credential serializes")),
                None => Ok(Value::Null),
            }
        }
        "vault.update_oauth_tokens" => {
            #[derive(serde::Deserialize)]
            struct UpdateOAuth {
                id: String,
                access_token: String,
                refresh_token: Option<String>,
                expires_at: Option<chrono::DateTime<chrono::Utc>>,
            }
            let req: UpdateOAuth = parse_params(params)?;
            ctx.vault.update_oauth_tokens(&req.id, req.access_token, req.refresh_token, req.expires_at)?;
            Ok(serde_json::json!({ "updated": true }))
        }
        "session.list" => Ok(serde_json::to_value(ctx.sessions.list()?).expect("Vec<String> serializes")),
        "session.is_valid" => {
            let label = param_str(&params, "label")?;
            Ok(serde_json::json!({ "valid": ctx.sessions.has_valid(&label)? }))
        }
        "session.clear" => {
            let label = param_str(&params, "label")?;
            ctx.sessions.clear(&label)?;
            Ok(serde_json::json!({ "cleared": true }))
        }
        "tools/list" => Ok(serde_json::to_value(ListToolsResult { tools: TOOL_CATALOG.clone() })
            .expect("ListToolsResult serializes")),
        "tools/call" => {
            let req: CallToolParams = parse_params(params)?;
            let arguments = req.arguments.unwrap_or(Value::Null);
            let decision = ctx.permission.decide(
                &ToolCallRequest { tool: req.name.clone(), arguments },
                &ExecutionContext::default(),
            );
            let result = CallToolResult {
                content: vec![ToolContent::Text {
                    text: format!("{:?}: {}", decision.outcome, decision.reason),
                }],
                is_error: matches!(decision.outcome, crate::permission::PermissionOutcome::Rejected),
            };
            Ok(serde_json::to_value(result).expect("CallToolResult serializes"))
        }
        "prompts/list" => Ok(serde_json::to_value(ListPromptsResult::default()).unwrap()),
        "prompts/get" => Err(JsonRpcError::method_not_found("prompts/get: no prompt templates registered")),
        "resources/list" => Ok(serde_json::to_value(ListResourcesResult::default()).unwrap()),
        "resources/read" => Err(JsonRpcError::method_not_found("resources/read: no resources registered")),
        "logging/setLevel" => Ok(serde_json::json!({ "acknowledged": true })),
        "scanner/scan" => {
            let text = param_str(&params, "text")?;
            let result = scanner::scan(&text);
            Ok(serde_json::to_value(result).expect("ScanResult serializes"))
        }
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(e.to_string()))
}

fn param_str(params: &Option<Value>, key: &str) -> Result<String, JsonRpcError> {
    params
        .as_ref()
        .and_then(|v| v.get(key))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| JsonRpcError::invalid_params(format!("missing string param '{key}'")))
}
