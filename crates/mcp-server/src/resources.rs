//! Resources surface. This server defines no resources; the handler exists
//! so the MCP capability is implemented rather than silently unsupported.

use anyhow::{Context, Result};
use rmcp::model::ListResourcesResult;
use serde_json::Value;

pub async fn handle_resources_list(_params: Value) -> Result<Value> {
    let result = ListResourcesResult {
        resources: vec![],
        next_cursor: None,
    };
    serde_json::to_value(result).context("failed to serialize list_resources result")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resources_list_is_empty() {
        let value = handle_resources_list(Value::Null).await.unwrap();
        let result: ListResourcesResult = serde_json::from_value(value).unwrap();
        assert!(result.resources.is_empty());
    }
}
