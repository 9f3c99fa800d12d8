//! The single `run_python` tool surface exposed to MCP clients: executes
//! code in the broker's sandbox container against a chosen set of tool
//! servers.

use anyhow::{Context, Result};
use broker_core::Broker;
use rmcp::model::{CallToolRequestParam, CallToolResult, Content, ListToolsResult, Tool};
use serde::Deserialize;
use serde_json::{json, Value};

pub const RUN_PYTHON_TOOL: &str = "run_python";

#[derive(Debug, Deserialize)]
struct RunPythonArgs {
    code: String,
    #[serde(default)]
    servers: Vec<String>,
    #[serde(default)]
    timeout_seconds: u64,
}

fn run_python_schema() -> serde_json::Map<String, Value> {
    let schema = json!({
        "type": "object",
        "properties": {
            "code": {
                "type": "string",
                "description": "Python source to execute inside the sandbox"
            },
            "servers": {
                "type": "array",
                "items": { "type": "string" },
                "description": "Tool servers the code is allowed to reach, by name"
            },
            "timeout_seconds": {
                "type": "integer",
                "minimum": 0,
                "description": "Execution deadline; 0 uses the broker's default"
            }
        },
        "required": ["code"]
    });
    match schema {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn run_python_tool() -> Tool {
    Tool {
        name: RUN_PYTHON_TOOL.into(),
        title: None,
        description: Some(
            "Execute Python code in an isolated sandbox container, with access to a chosen set \
             of tool servers via a built-in client library."
                .into(),
        ),
        input_schema: std::sync::Arc::new(run_python_schema()),
        output_schema: None,
        annotations: None,
        icons: None,
    }
}

/// List the tools this server exposes. There is exactly one: `run_python`.
/// `disable_builtin_tools` is honoured for parity with the hook surface, but
/// since this server has no other tools, disabling it yields an empty list.
pub async fn handle_tools_list(_broker: &Broker, disable_builtin_tools: bool) -> Result<Value> {
    let tools = if disable_builtin_tools {
        vec![]
    } else {
        vec![run_python_tool()]
    };
    let result = ListToolsResult {
        tools,
        next_cursor: None,
    };
    serde_json::to_value(result).context("failed to serialize list_tools result")
}

/// Execute a `tools/call` request against the broker.
pub async fn handle_tools_call(
    params: CallToolRequestParam,
    broker: &Broker,
    disable_builtin_tools: bool,
) -> Result<Value> {
    if disable_builtin_tools || params.name.as_ref() != RUN_PYTHON_TOOL {
        let result = CallToolResult {
            content: Some(vec![Content::text(format!(
                "unknown tool '{}'",
                params.name
            ))]),
            structured_content: None,
            is_error: Some(true),
        };
        return serde_json::to_value(result).context("failed to serialize call_tool result");
    }

    let args: RunPythonArgs = match params.arguments {
        Some(map) => serde_json::from_value(Value::Object(map))
            .context("invalid arguments for run_python")?,
        None => {
            let result = CallToolResult {
                content: Some(vec![Content::text("missing required argument 'code'")]),
                structured_content: None,
                is_error: Some(true),
            };
            return serde_json::to_value(result).context("failed to serialize call_tool result");
        }
    };

    let run_result = broker
        .run(args.code, args.servers, args.timeout_seconds)
        .await;

    let result = match run_result {
        Ok(run) => {
            let is_error = run.status != broker_core::RunStatus::Success;
            let structured = serde_json::to_value(&run).ok();
            CallToolResult {
                content: Some(vec![Content::text(format_run_output(&run))]),
                structured_content: structured,
                is_error: Some(is_error),
            }
        }
        Err(e) => CallToolResult {
            content: Some(vec![Content::text(e.to_string())]),
            structured_content: Some(json!({ "status": e.status() })),
            is_error: Some(true),
        },
    };

    serde_json::to_value(result).context("failed to serialize call_tool result")
}

fn format_run_output(run: &broker_core::RunResult) -> String {
    let mut out = String::new();
    if !run.stdout.is_empty() {
        out.push_str(&run.stdout);
    }
    if !run.stderr.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("stderr:\n");
        out.push_str(&run.stderr);
    }
    if out.is_empty() {
        out.push_str("(no output)");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_tools_includes_run_python_by_default() {
        let state_dir = tempfile::tempdir().unwrap();
        let broker = Broker::builder()
            .with_records(vec![])
            .with_state_dir(state_dir.path())
            .build()
            .await
            .unwrap();
        let value = handle_tools_list(&broker, false).await.unwrap();
        let result: ListToolsResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.tools.len(), 1);
        assert_eq!(result.tools[0].name.as_ref(), RUN_PYTHON_TOOL);
    }

    #[tokio::test]
    async fn list_tools_empty_when_builtin_tools_disabled() {
        let state_dir = tempfile::tempdir().unwrap();
        let broker = Broker::builder()
            .with_records(vec![])
            .with_state_dir(state_dir.path())
            .build()
            .await
            .unwrap();
        let value = handle_tools_list(&broker, true).await.unwrap();
        let result: ListToolsResult = serde_json::from_value(value).unwrap();
        assert!(result.tools.is_empty());
    }

    #[tokio::test]
    async fn call_tool_rejects_unknown_tool_name() {
        let state_dir = tempfile::tempdir().unwrap();
        let broker = Broker::builder()
            .with_records(vec![])
            .with_state_dir(state_dir.path())
            .build()
            .await
            .unwrap();
        let params = CallToolRequestParam {
            name: "does_not_exist".into(),
            arguments: Some(serde_json::Map::new()),
        };
        let value = handle_tools_call(params, &broker, false).await.unwrap();
        let result: CallToolResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn call_tool_rejects_missing_code_argument() {
        let state_dir = tempfile::tempdir().unwrap();
        let broker = Broker::builder()
            .with_records(vec![])
            .with_state_dir(state_dir.path())
            .build()
            .await
            .unwrap();
        let params = CallToolRequestParam {
            name: RUN_PYTHON_TOOL.into(),
            arguments: Some(serde_json::Map::new()),
        };
        let value = handle_tools_call(params, &broker, false).await.unwrap();
        let result: CallToolResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.is_error, Some(true));
    }

    #[tokio::test]
    async fn call_tool_reports_unknown_server_as_error() {
        let state_dir = tempfile::tempdir().unwrap();
        let broker = Broker::builder()
            .with_records(vec![])
            .with_state_dir(state_dir.path())
            .build()
            .await
            .unwrap();
        let mut args = serde_json::Map::new();
        args.insert("code".to_string(), json!("print(1)"));
        args.insert("servers".to_string(), json!(["ghost"]));
        let params = CallToolRequestParam {
            name: RUN_PYTHON_TOOL.into(),
            arguments: Some(args),
        };
        let value = handle_tools_call(params, &broker, false).await.unwrap();
        let result: CallToolResult = serde_json::from_value(value).unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
