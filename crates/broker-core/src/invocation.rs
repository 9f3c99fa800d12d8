//! Per-call execution context: validates inputs, gates tool-server access,
//! and drives the container frame loop to completion for one `run` call.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{instrument, warn};
use uuid_like::new_invocation_id;

use crate::container::{ContainerManager, Dispatch};
use crate::error::{BrokerError, Result};
use crate::frame::{ContainerFrame, HostFrame, RpcRequest, RpcResponse};
use crate::ipc::IpcDirPool;
use crate::tool_server::{ServerMetadata, ToolServerClient};

const DEFAULT_MAX_TIMEOUT_SECS: u64 = 120;
const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Tiny, dependency-free substitute for a UUID generator: the broker only
/// needs invocation ids to be unique within one process lifetime, not
/// globally unique or cryptographically random.
mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    pub fn new_invocation_id() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("inv-{n:x}")
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
    ValidationError,
    Timeout,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub servers: Vec<String>,
}

/// Everything the invocation needs from the broker to do its work, borrowed
/// for the duration of one call. The invocation never closes any of these.
pub struct InvocationContext<'a> {
    pub container: &'a ContainerManager,
    pub clients: &'a HashMap<String, Arc<ToolServerClient>>,
    pub metadata: &'a HashMap<String, ServerMetadata>,
    pub ipc_pool: &'a IpcDirPool,
    /// Signalled on every `execute`, resetting the container's idle-TTL
    /// watchdog.
    pub idle_reset: &'a mpsc::UnboundedSender<()>,
    pub max_timeout_secs: u64,
    pub stdout_cap: usize,
    pub stderr_cap: usize,
}

fn validate(code: &str, servers: &[String], known: &HashMap<String, ServerMetadata>) -> Result<()> {
    if code.trim().is_empty() {
        return Err(BrokerError::Validation("empty code".to_string()));
    }
    for server in servers {
        if !known.contains_key(server) {
            return Err(BrokerError::UnknownServer(server.clone()));
        }
    }
    Ok(())
}

/// Execute `code` against `servers`, returning the final [`RunResult`].
#[instrument(skip(ctx, code), fields(servers = ?servers))]
pub async fn run(
    ctx: &InvocationContext<'_>,
    code: String,
    servers: Vec<String>,
    timeout_seconds: u64,
) -> Result<RunResult> {
    validate(&code, &servers, ctx.metadata)?;
    let timeout_seconds = timeout_seconds.clamp(1, ctx.max_timeout_secs.max(1));

    let invocation_id = new_invocation_id();
    let metadata_snapshot: Vec<ServerMetadata> = servers
        .iter()
        .filter_map(|s| ctx.metadata.get(s).cloned())
        .collect();

    let env_additions = build_env_additions(&servers, &metadata_snapshot);

    let ipc_dir = ctx
        .ipc_pool
        .allocate(&invocation_id)
        .await
        .map_err(BrokerError::Other)?;

    // Held for the whole of ensure_running/send_frame/drive_frame_loop: at
    // most one invocation is ever inside the container at a time, and a
    // concurrent second `run` call queues here until this one finishes.
    let invocation_guard = ctx.container.lock_invocation().await;

    let mut rx = ctx.container.ensure_running(&ipc_dir, &env_additions).await?;

    ctx.container
        .send_frame(&HostFrame::Execute {
            invocation_id: invocation_id.clone(),
            code,
            allowed_servers: servers.clone(),
            metadata: serde_json::to_value(&metadata_snapshot).unwrap_or(serde_json::Value::Null),
        })
        .await?;
    let _ = ctx.idle_reset.send(());

    let allowed: std::collections::HashSet<String> = servers.iter().cloned().collect();
    let drive = drive_frame_loop(ctx, &mut rx, &allowed, &metadata_snapshot);

    let result = match timeout(Duration::from_secs(timeout_seconds), drive).await {
        Ok(result) => result,
        Err(_) => {
            let _ = ctx
                .container
                .send_frame(&HostFrame::Cancel {
                    invocation_id: invocation_id.clone(),
                })
                .await;
            tokio::time::sleep(CANCEL_GRACE).await;
            ctx.container.shutdown().await;
            Err(BrokerError::Timeout(timeout_seconds))
        }
    };

    drop(invocation_guard);
    ctx.ipc_pool.release(&ipc_dir).await;

    match result {
        Ok((stdout, stderr)) => Ok(RunResult {
            status: RunStatus::Success,
            stdout,
            stderr,
            exit_code: 0,
            servers,
        }),
        Err(BrokerError::Timeout(secs)) => Ok(RunResult {
            status: RunStatus::Timeout,
            stdout: String::new(),
            stderr: format!("execution timed out after {secs}s"),
            exit_code: 1,
            servers,
        }),
        Err(e) => Ok(RunResult {
            status: RunStatus::Error,
            stdout: String::new(),
            stderr: e.to_string(),
            exit_code: 1,
            servers,
        }),
    }
}

async fn drive_frame_loop(
    ctx: &InvocationContext<'_>,
    rx: &mut mpsc::UnboundedReceiver<Dispatch>,
    allowed: &std::collections::HashSet<String>,
    metadata_snapshot: &[ServerMetadata],
) -> Result<(String, String)> {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut stdout_truncated = false;
    let mut stderr_truncated = false;

    while let Some(Dispatch::Frame(frame)) = rx.recv().await {
        match frame {
            ContainerFrame::Stdout { data } => {
                stdout.push_str(&data);
                ContainerManager::cap_output(&mut stdout, ctx.stdout_cap, &mut stdout_truncated);
            }
            ContainerFrame::Stderr { data } => {
                stderr.push_str(&data);
                ContainerManager::cap_output(&mut stderr, ctx.stderr_cap, &mut stderr_truncated);
            }
            ContainerFrame::RpcRequest { id, payload } => {
                let response = handle_rpc(ctx, allowed, metadata_snapshot, payload).await;
                if let Err(e) = ctx
                    .container
                    .send_frame(&HostFrame::RpcResponse {
                        id,
                        payload: response,
                    })
                    .await
                {
                    warn!(error = %e, "failed to deliver rpc_response");
                }
            }
            ContainerFrame::ExecutionDone => return Ok((stdout, stderr)),
        }
    }

    Err(BrokerError::Other(anyhow::anyhow!(
        "container stream closed before execution_done"
    )))
}

async fn handle_rpc(
    ctx: &InvocationContext<'_>,
    allowed: &std::collections::HashSet<String>,
    metadata_snapshot: &[ServerMetadata],
    payload: RpcRequest,
) -> RpcResponse {
    match payload {
        RpcRequest::ListServers => {
            let mut names: Vec<String> = allowed.iter().cloned().collect();
            names.sort();
            RpcResponse::ok().with_servers(names)
        }
        RpcRequest::ListTools { server } => {
            if !allowed.contains(&server) {
                return RpcResponse::err(format!("server '{server}' is not allowed"));
            }
            match metadata_snapshot.iter().find(|m| m.name == server) {
                Some(meta) => RpcResponse::ok()
                    .with_tools(serde_json::to_value(&meta.tools).unwrap_or_default()),
                None => RpcResponse::err(format!("no metadata cached for '{server}'")),
            }
        }
        RpcRequest::QueryToolDocs {
            server,
            tool,
            detail: _,
        } => {
            if !allowed.contains(&server) {
                return RpcResponse::err(format!("server '{server}' is not allowed"));
            }
            let Some(meta) = metadata_snapshot.iter().find(|m| m.name == server) else {
                return RpcResponse::err(format!("no metadata cached for '{server}'"));
            };
            let docs = match tool {
                Some(name) => meta
                    .tools
                    .iter()
                    .find(|t| t.name == name)
                    .map(|t| serde_json::to_value(t).unwrap_or_default()),
                None => Some(serde_json::to_value(&meta.tools).unwrap_or_default()),
            };
            match docs {
                Some(value) => RpcResponse::ok().with_docs(value),
                None => RpcResponse::err(format!("tool '{}' not found", tool.unwrap_or_default())),
            }
        }
        RpcRequest::SearchToolDocs {
            query,
            limit,
            detail: _,
        } => {
            let allowed_metadata: Vec<ServerMetadata> = metadata_snapshot
                .iter()
                .filter(|m| allowed.contains(&m.name))
                .cloned()
                .collect();
            let hits = crate::search::search_tool_docs(&query, &allowed_metadata, limit);
            RpcResponse::ok().with_results(serde_json::to_value(hits).unwrap_or_default())
        }
        RpcRequest::CallTool {
            server,
            tool,
            arguments,
        } => {
            if !allowed.contains(&server) {
                return RpcResponse::err(format!("server '{server}' is not allowed"));
            }
            let Some(client) = ctx.clients.get(&server) else {
                return RpcResponse::err(format!("server '{server}' has no live client"));
            };
            match client.call_tool(&tool, arguments).await {
                Ok(result) => RpcResponse::ok().with_result(result),
                Err(e) => RpcResponse::err(e.to_string()),
            }
        }
    }
}

fn build_env_additions(
    servers: &[String],
    metadata_snapshot: &[ServerMetadata],
) -> HashMap<String, String> {
    let mut env = HashMap::new();
    env.insert("MCP_AVAILABLE_SERVERS".to_string(), servers.join(","));
    env.insert(
        "MCP_DISCOVERED_SERVERS".to_string(),
        serde_json::to_string(metadata_snapshot).unwrap_or_default(),
    );
    env
}
