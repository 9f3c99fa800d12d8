//! Output formatting for the one-shot `run` CLI command.

use clap::ValueEnum;
use rmcp::model::CallToolResult;

#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[clap(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Print a `CallToolResult` to stdout in the requested format, returning an
/// error if the result carried `is_error`.
pub fn print_result(result: &CallToolResult, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            if let Some(content) = &result.content {
                for item in content {
                    if let Some(text) = item.as_text() {
                        println!("{}", text.text);
                    }
                }
            }
        }
    }
    Ok(())
}
