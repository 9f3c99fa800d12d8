//! The line-delimited JSON frame protocol spoken over the sandbox container's
//! stdin/stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of framed JSON crossing the container boundary.
///
/// `#[serde(tag = "type")]` gives each variant its wire discriminant; unknown
/// `type` values fail to deserialize and are handled by the caller as a
/// dropped frame (see [`crate::container::ContainerManager`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostFrame {
    Execute {
        invocation_id: String,
        code: String,
        allowed_servers: Vec<String>,
        metadata: Value,
    },
    RpcResponse {
        id: u64,
        payload: RpcResponse,
    },
    Cancel {
        invocation_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContainerFrame {
    Stdout { data: String },
    Stderr { data: String },
    RpcRequest { id: u64, payload: RpcRequest },
    ExecutionDone,
}

/// Exhaustive set of RPC requests the in-container runtime may issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
    ListServers,
    ListTools {
        server: String,
    },
    QueryToolDocs {
        server: String,
        tool: Option<String>,
        detail: DocDetail,
    },
    SearchToolDocs {
        query: String,
        limit: usize,
        detail: DocDetail,
    },
    CallTool {
        server: String,
        tool: String,
        arguments: Value,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocDetail {
    Summary,
    Full,
}

/// Response payload for one [`RpcRequest`]. Always wraps either a success
/// shape or an `error` string; never raises out of [`crate::invocation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servers: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            servers: None,
            tools: None,
            docs: None,
            results: None,
            result: None,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            servers: None,
            tools: None,
            docs: None,
            results: None,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn with_servers(mut self, servers: Vec<String>) -> Self {
        self.servers = Some(servers);
        self
    }

    pub fn with_tools(mut self, tools: Value) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_docs(mut self, docs: Value) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn with_results(mut self, results: Value) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Serialize a frame to a single newline-terminated JSON line.
///
/// Panics are not possible here in practice: every frame type is built from
/// already-valid UTF-8 and JSON-safe content, so serialization failure would
/// indicate a bug upstream, not a runtime condition to recover from.
pub fn encode_line<T: Serialize>(frame: &T) -> anyhow::Result<String> {
    let mut line = serde_json::to_string(frame)?;
    if line.contains('\n') {
        anyhow::bail!("frame serialization produced an embedded newline");
    }
    line.push('\n');
    Ok(line)
}
