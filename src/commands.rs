//! CLI argument definitions for the `mcp-sandbox-broker` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use crate::format::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "mcp-sandbox-broker", about = "Run Python in a sandboxed container, brokered against a pool of tool servers", long_about = None)]
pub struct Cli {
    /// Print version information and exit.
    #[arg(long)]
    pub version: bool,

    /// Override the tool-server discovery search list with a single file.
    #[arg(long, global = true, env = "MCP_SERVERS_CONFIG")]
    pub servers_config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the MCP server, serving `run_python` over the chosen transport.
    Serve(Serve),
    /// Execute one snippet of Python against the sandbox and print the result.
    Run(Run),
}

/// Transport for the long-lived MCP server.
#[derive(Debug, Clone, Copy, Default, ValueEnum, PartialEq, Eq)]
#[clap(rename_all = "kebab-case")]
pub enum Transport {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
}

#[derive(Parser, Debug, Serialize, Clone)]
pub struct Serve {
    /// Container runtime executable override (`podman`, `docker`, or a path).
    #[arg(long, env = "MCP_BRIDGE_RUNTIME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Base container image.
    #[arg(long, env = "MCP_BRIDGE_IMAGE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Transport to serve the MCP protocol over.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    #[serde(skip)]
    pub transport: Transport,

    /// Bind address for HTTP-based transports (SSE and StreamableHttp).
    #[arg(long, env = "MCP_BRIDGE_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,
}

#[derive(Parser, Debug, Serialize, Clone)]
pub struct Run {
    /// Python source to execute. Reads stdin if omitted.
    #[arg(long)]
    pub code: Option<String>,

    /// Tool servers the code may reach, by name. May be repeated.
    #[arg(long = "server")]
    #[serde(skip)]
    pub servers: Vec<String>,

    /// Execution deadline in seconds; 0 uses the broker's default.
    #[arg(long, default_value_t = 0)]
    #[serde(skip)]
    pub timeout_seconds: u64,

    /// Output format for the result.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    #[serde(skip)]
    pub output_format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_stdio_default() {
        let cli = Cli::try_parse_from(["mcp-sandbox-broker", "serve"]).unwrap();
        match cli.command {
            Some(Commands::Serve(serve)) => assert_eq!(serve.transport, Transport::Stdio),
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn parses_serve_with_sse_transport() {
        let cli =
            Cli::try_parse_from(["mcp-sandbox-broker", "serve", "--transport", "sse"]).unwrap();
        match cli.command {
            Some(Commands::Serve(serve)) => assert_eq!(serve.transport, Transport::Sse),
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn parses_run_with_code_and_servers() {
        let cli = Cli::try_parse_from([
            "mcp-sandbox-broker",
            "run",
            "--code",
            "print(1)",
            "--server",
            "weather",
            "--server",
            "search",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Run(run)) => {
                assert_eq!(run.code.as_deref(), Some("print(1)"));
                assert_eq!(run.servers, vec!["weather".to_string(), "search".to_string()]);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn version_flag_parses_without_subcommand() {
        let cli = Cli::try_parse_from(["mcp-sandbox-broker", "--version"]).unwrap();
        assert!(cli.version);
        assert!(cli.command.is_none());
    }
}
