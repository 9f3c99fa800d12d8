//! A client session for one spawned tool-server subprocess, speaking the
//! same line-framed JSON-RPC (`initialize`, `tools/list`, `tools/call`) used
//! throughout the broader Model Context Protocol ecosystem.

use std::time::Duration;

use rmcp::model::{CallToolRequestParam, ClientInfo};
use rmcp::service::{serve_client, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::{ClientHandler, RoleClient};
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::discovery::ToolServerRecord;
use crate::error::{BrokerError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tool exposed by a tool server, with its sandbox-safe alias already
/// assigned by the broker.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub alias: String,
    pub description: String,
    pub input_schema: Value,
}

/// Per-server cached metadata bundle, immutable once populated.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    pub alias: String,
    pub tools: Vec<ToolSpec>,
}

#[derive(Clone, Default)]
struct PassthroughHandler;

impl ClientHandler for PassthroughHandler {
    fn get_info(&self) -> ClientInfo {
        ClientInfo::default()
    }
}

fn first_text(result: &rmcp::model::CallToolResult) -> Option<String> {
    result
        .content
        .as_ref()
        .and_then(|blocks| blocks.first())
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
}

enum Session {
    NotStarted,
    Running(RunningService<RoleClient, PassthroughHandler>),
    Failed(String),
}

/// One tool-server client. Owns the child process for its entire lifetime;
/// the broker never starts a second client for the same server name.
pub struct ToolServerClient {
    record: ToolServerRecord,
    session: Mutex<Session>,
}

impl ToolServerClient {
    pub fn new(record: ToolServerRecord) -> Self {
        Self {
            record,
            session: Mutex::new(Session::NotStarted),
        }
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Spawn the child and complete the protocol handshake. Idempotent.
    #[instrument(skip(self), fields(server = %self.record.name))]
    pub async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if matches!(*session, Session::Running(_)) {
            return Ok(());
        }

        let mut command = Command::new(&self.record.command);
        command.args(&self.record.args);
        command.envs(&self.record.env);
        if let Some(cwd) = &self.record.cwd {
            command.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(command).map_err(|e| {
            BrokerError::ServerStartFailed(self.record.name.clone(), e.to_string())
        })?;

        let started = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            serve_client(PassthroughHandler, transport),
        )
        .await;

        match started {
            Ok(Ok(running)) => {
                *session = Session::Running(running);
                debug!("tool server handshake complete");
                Ok(())
            }
            Ok(Err(e)) => {
                let message = e.to_string();
                *session = Session::Failed(message.clone());
                Err(BrokerError::ServerStartFailed(
                    self.record.name.clone(),
                    message,
                ))
            }
            Err(_) => {
                let message = "handshake timed out".to_string();
                *session = Session::Failed(message.clone());
                Err(BrokerError::ServerStartFailed(
                    self.record.name.clone(),
                    message,
                ))
            }
        }
    }

    #[instrument(skip(self), fields(server = %self.record.name))]
    pub async fn list_tools(&self) -> Result<Vec<ToolSpec>> {
        let session = self.session.lock().await;
        let Session::Running(running) = &*session else {
            return Err(BrokerError::ServerUnavailable(
                self.record.name.clone(),
                "not started".to_string(),
            ));
        };
        let response = running
            .peer()
            .list_tools(Default::default())
            .await
            .map_err(|e| BrokerError::ServerUnavailable(self.record.name.clone(), e.to_string()))?;

        Ok(response
            .tools
            .into_iter()
            .map(|tool| ToolSpec {
                name: tool.name.to_string(),
                alias: crate::alias::sanitize(&tool.name),
                description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: serde_json::to_value(&*tool.input_schema)
                    .unwrap_or(Value::Null),
            })
            .collect())
    }

    /// Serialised per-client: one in-flight call at a time, enforced by the
    /// session mutex held for the duration of the call.
    #[instrument(skip(self, arguments), fields(server = %self.record.name, tool = %tool))]
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value> {
        let session = self.session.lock().await;
        let Session::Running(running) = &*session else {
            return Err(BrokerError::ServerUnavailable(
                self.record.name.clone(),
                "not started".to_string(),
            ));
        };

        let args_map = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                warn!(?other, "call_tool arguments were not an object; wrapping");
                Some(serde_json::Map::new())
            }
        };

        let result = running
            .peer()
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: args_map,
            })
            .await
            .map_err(|e| BrokerError::ServerUnavailable(self.record.name.clone(), e.to_string()))?;

        if result.is_error.unwrap_or(false) {
            let message = first_text(&result)
                .unwrap_or_else(|| "tool reported an error".to_string());
            return Err(BrokerError::ToolError {
                server: self.record.name.clone(),
                tool: tool.to_string(),
                message,
            });
        }

        // Prefer structured_content when the server supplies it: it is
        // already the typed JSON object the caller wants. Otherwise fall
        // back to the first text content block, parsed as JSON if possible
        // so sandboxed code can index into it directly, and only fall back
        // to the raw content blocks if neither shape is present.
        if let Some(structured) = result.structured_content {
            return Ok(structured);
        }
        match first_text(&result) {
            Some(text) => Ok(serde_json::from_str(&text).unwrap_or(Value::String(text))),
            None => serde_json::to_value(&result.content).map_err(|e| BrokerError::Other(e.into())),
        }
    }

    /// Safe to call multiple times; a client that never started is a no-op.
    #[instrument(skip(self), fields(server = %self.record.name))]
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        if let Session::Running(running) = std::mem::replace(&mut *session, Session::NotStarted) {
            if let Err(e) = running.cancel().await {
                warn!(error = %e, "error shutting down tool server session");
            }
        }
    }
}
