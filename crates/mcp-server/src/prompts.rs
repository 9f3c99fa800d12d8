//! Prompts surface. This server defines no prompts; the handlers exist so
//! the MCP capability is implemented rather than silently unsupported.

use anyhow::{Context, Result};
use rmcp::model::ListPromptsResult;
use serde_json::Value;

pub async fn handle_prompts_list(_params: Value) -> Result<Value> {
    let result = ListPromptsResult {
        prompts: vec![],
        next_cursor: None,
    };
    serde_json::to_value(result).context("failed to serialize list_prompts result")
}

pub async fn handle_prompts_get(name: String) -> Result<Value> {
    Err(anyhow::anyhow!("no such prompt: {name}"))
}
