//! CodeCoder CLI entrypoint: `serve` runs the local HTTP RPC transport,
//! `mcp serve` runs the same dispatcher over HTTP or a line-delimited
//! stdio transport. A thin `main.rs` loads config, wires the
//! subsystems, and hands off to a router.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use codecoder::agent::{AgentRuntime, AgentStep, ScriptedAgent};
use codecoder::causal::CausalStore;
use codecoder::observability::{self, Level, Tracer, TracerConfig};
use codecoder::permission::{PermissionEngine, PermissionPolicy, RiskTier};
use codecoder::resolver::CredentialResolver;
use codecoder::rpc::dispatch::{dispatch, RpcContext};
use codecoder::rpc::http::{self, HttpState};
use codecoder::rpc::protocol::{JsonRpcRequest, JsonRpcResponse};
use codecoder::session_store::SessionStore;
use codecoder::task::TaskSupervisor;
use codecoder::vault::Vault;
use codecoder::{workspace, CodeCoderConfig};

#[derive(Parser)]
#[command(name = "codecoder", version, about = "Task & permission supervision runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local HTTP RPC transport.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Run the MCP-shaped method surface over HTTP or stdio.
    Mcp {
        #[command(subcommand)]
        action: McpCommand,
    },
}

#[derive(Subcommand)]
enum McpCommand {
    Serve {
        #[arg(long, value_enum, default_value_t = Transport::Http)]
        transport: Transport,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Transport {
    Http,
    Stdio,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(()) => 0,
        Err(StartupError::Config(msg)) => {
            eprintln!("configuration error: {msg}");
            1
        }
        Err(StartupError::Bind(msg)) => {
            eprintln!("bind failure: {msg}");
            2
        }
        Err(StartupError::Interrupted) => 130,
    };
    std::process::exit(exit_code);
}

enum StartupError {
    Config(String),
    Bind(String),
    Interrupted,
}

fn run(cli: Cli) -> Result<(), StartupError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| StartupError::Config(format!("failed to start tokio runtime: {e}")))?;

    runtime.block_on(async move {
        match cli.command {
            Command::Serve { port, api_key } => serve_http(port, api_key).await,
            Command::Mcp { action: McpCommand::Serve { transport, port, api_key } } => match transport {
                Transport::Http => serve_http(port, api_key).await,
                Transport::Stdio => serve_stdio().await,
            },
        }
    })
}

/// Shared bootstrap: resolve the workspace, load config, and wire the
/// causal store, permission engine, and task supervisor. Each binding
/// (log dir, vault path, causal store path) derives from a single
/// loaded [`workspace::WorkspaceConfig`].
async fn bootstrap(port_override: Option<u16>, api_key_override: Option<String>) -> Result<Bootstrapped, StartupError> {
    let root = workspace::resolve_root(None)
        .map_err(|e| StartupError::Config(e.to_string()))?;
    let layout = workspace::ensure_layout(&root).map_err(|e| StartupError::Config(e.to_string()))?;
    let mut config = workspace::load_config(&layout).map_err(|e| StartupError::Config(e.to_string()))?;

    if let Some(port) = port_override {
        config.server.port = port;
    }
    if let Some(api_key) = api_key_override {
        config.server.api_key = Some(api_key);
    }

    init_tracing(&config);

    let start_ms = codecoder::ids::now_ms();
    let sink = observability::TraceSink::open(layout.log_dir().join("observability"), start_ms)
        .map_err(|e| StartupError::Config(format!("failed to open trace sink: {e}")))?;
    let tracer_config = TracerConfig {
        enabled: config.observability.enabled,
        level: Level::from_str_loose(&config.observability.level).unwrap_or(Level::Info),
        sampling: config.observability.sampling,
    }
    .from_env_overrides();
    Tracer::install(tracer_config, sink);
    observability::init_metrics();

    let threshold = RiskTier::from_str(&config.permission.auto_approve_threshold).unwrap_or(RiskTier::Low);
    let policy = PermissionPolicy {
        auto_approve: config.permission.auto_approve,
        auto_approve_threshold: threshold,
        auto_approve_tools: config.permission.auto_approve_tools.clone(),
        auto_approve_timeout_ms: config.permission.auto_approve_timeout_ms,
    };
    let permission = Arc::new(PermissionEngine::new(policy));

    let causal = Arc::new(
        CausalStore::open(layout.causal_store_path())
            .map_err(|e| StartupError::Config(format!("failed to open causal store: {e}")))?,
    );

    let agents = default_agents();
    if agents.is_empty() {
        warn!("no agent runtimes registered; tasks will be created against an empty agent table");
    }

    let supervisor = TaskSupervisor::new(causal, permission.clone(), agents);

    let vault = Arc::new(
        Vault::open(layout.vault_path(), "codecoder")
            .map_err(|e| StartupError::Config(format!("failed to open vault: {e}")))?,
    );
    let resolver = Arc::new(CredentialResolver::new(vault.clone()));
    let sessions = Arc::new(
        SessionStore::new(&root).map_err(|e| StartupError::Config(format!("failed to open session store: {e}")))?,
    );

    Ok(Bootstrapped { config, supervisor, permission, vault, resolver, sessions })
}

struct Bootstrapped {
    config: CodeCoderConfig,
    supervisor: Arc<TaskSupervisor>,
    permission: Arc<PermissionEngine>,
    vault: Arc<Vault>,
    resolver: Arc<CredentialResolver>,
    sessions: Arc<SessionStore>,
}

/// No production `AgentRuntime` ships in this crate — LLM provider
/// clients are an external collaborator. `scripted` is a deterministic
/// stand-in so `serve` is exercisable without one; production
/// deployments register real runtimes before calling `bootstrap` (not
/// currently exposed as a CLI flag).
fn default_agents() -> std::collections::HashMap<String, Arc<dyn AgentRuntime>> {
    let mut agents: std::collections::HashMap<String, Arc<dyn AgentRuntime>> = std::collections::HashMap::new();
    agents.insert(
        "scripted".to_string(),
        Arc::new(ScriptedAgent::new(vec![AgentStep::Done { output: String::new() }])),
    );
    agents
}

fn init_tracing(config: &CodeCoderConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

async fn serve_http(port: Option<u16>, api_key: Option<String>) -> Result<(), StartupError> {
    let boot = bootstrap(port, api_key).await?;
    let config = boot.config;

    let state = HttpState {
        rpc: Arc::new(RpcContext {
            supervisor: boot.supervisor,
            permission: boot.permission,
            vault: boot.vault,
            resolver: boot.resolver,
            sessions: boot.sessions,
        }),
        api_key: config.server.api_key.clone().map(|k| k.into()),
    };
    let app = http::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| StartupError::Bind(format!("{addr}: {e}")))?;
    info!("codecoder listening on {}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("server error: {e}");
            }
            Ok(())
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
            Err(StartupError::Interrupted)
        }
    }
}

/// Line-delimited JSON-RPC over stdio: one request per line on stdin, one
/// response per line on stdout — the same framing an MCP stdio client
/// reads off a spawned server's stdout, run here from the server side
/// instead of the client side.
async fn serve_stdio() -> Result<(), StartupError> {
    let boot = bootstrap(None, None).await?;
    let ctx = RpcContext {
        supervisor: boot.supervisor,
        permission: boot.permission,
        vault: boot.vault,
        resolver: boot.resolver,
        sessions: boot.sessions,
    };

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    info!("codecoder mcp stdio transport ready");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                info!("received SIGINT, shutting down");
                return Err(StartupError::Interrupted);
            }
        };

        let Some(line) = line.map_err(|e| StartupError::Bind(e.to_string()))? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(req) => {
                let JsonRpcRequest { id, method, params, .. } = req;
                match dispatch(&ctx, &method, params).await {
                    Ok(result) => JsonRpcResponse::ok(id, result),
                    Err(err) => JsonRpcResponse::err(id, err),
                }
            }
            Err(e) => {
                warn!("failed to parse stdio request: {e}");
                continue;
            }
        };

        let mut encoded = serde_json::to_string(&response).expect("JsonRpcResponse serializes");
        encoded.push('\n');
        stdout
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| StartupError::Bind(e.to_string()))?;
        stdout.flush().await.map_err(|e| StartupError::Bind(e.to_string()))?;
    }

    Ok(())
}
