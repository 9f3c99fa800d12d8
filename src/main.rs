//! The main `mcp-sandbox-broker(1)` command.

#![warn(missing_docs)]

use std::io::Read as _;

use anyhow::{Context, Result};
use clap::Parser;
use mcp_server::McpServer;
use rmcp::service::serve_server;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::StreamableHttpService;
use rmcp::transport::{stdio as stdio_transport, SseServer};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

mod commands;
mod config;
mod format;
mod utils;

use commands::{Cli, Commands, Transport};
use format::print_result;
use utils::format_build_info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{}", format_build_info());
        return Ok(());
    }

    match &cli.command {
        Some(Commands::Serve(cfg)) => {
            // Configure logging - use stderr for stdio transport to avoid interfering
            // with the MCP protocol.
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into());

            let registry = tracing_subscriber::registry().with(env_filter);

            match cfg.transport {
                Transport::Stdio => {
                    registry
                        .with(
                            tracing_subscriber::fmt::layer()
                                .with_writer(std::io::stderr)
                                .with_ansi(false),
                        )
                        .init();
                }
                _ => registry.with(tracing_subscriber::fmt::layer()).init(),
            }

            let mut config =
                config::Config::from_serve(cfg).context("Failed to load configuration")?;
            if let Some(path) = &cli.servers_config {
                config.servers_config = Some(path.clone());
            }
            let bind_address = config.bind_address.clone();

            let broker = config
                .broker_builder()
                .build()
                .await
                .context("Failed to construct broker")?;

            let server = McpServer::new(broker, false);

            match cfg.transport {
                Transport::Stdio => {
                    tracing::info!("Starting MCP server with stdio transport.");
                    let transport = stdio_transport();
                    let running_service = serve_server(server, transport).await?;

                    tokio::signal::ctrl_c().await?;
                    let _ = running_service.cancel().await;
                }
                Transport::StreamableHttp => {
                    tracing::info!(
                        "Starting MCP server on {} with streamable HTTP transport.",
                        bind_address
                    );
                    let service = StreamableHttpService::new(
                        move || Ok(server.clone()),
                        LocalSessionManager::default().into(),
                        Default::default(),
                    );

                    let router = axum::Router::new().nest_service("/mcp", service);
                    let tcp_listener = tokio::net::TcpListener::bind(&bind_address).await?;

                    let server_handle = tokio::spawn(async move {
                        axum::serve(tcp_listener, router)
                            .with_graceful_shutdown(async {
                                tokio::signal::ctrl_c().await.unwrap()
                            })
                            .await
                    });

                    tracing::info!(
                        "MCP server is ready and listening on http://{}/mcp",
                        bind_address
                    );

                    let _ = server_handle.await;
                }
                Transport::Sse => {
                    tracing::info!(
                        "Starting MCP server on {} with SSE HTTP transport.",
                        bind_address
                    );
                    let ct = SseServer::serve(bind_address.parse().unwrap())
                        .await?
                        .with_service(move || server.clone());
                    tracing::info!(
                        "MCP server is ready and listening on http://{}/sse",
                        bind_address
                    );

                    tokio::signal::ctrl_c().await?;
                    ct.cancel();
                }
            }

            tracing::info!("MCP server shutting down");
        }
        Some(Commands::Run(args)) => {
            let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".to_string().into());
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(false),
                )
                .init();

            let code = match &args.code {
                Some(code) => code.clone(),
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("Failed to read code from stdin")?;
                    buf
                }
            };

            let mut config = config::Config::new(args).context("Failed to load configuration")?;
            if let Some(path) = &cli.servers_config {
                config.servers_config = Some(path.clone());
            }
            let broker = config
                .broker_builder()
                .build()
                .await
                .context("Failed to construct broker")?;

            let params = rmcp::model::CallToolRequestParam {
                name: mcp_server::RUN_PYTHON_TOOL.to_string().into(),
                arguments: Some(
                    serde_json::json!({
                        "code": code,
                        "servers": args.servers,
                        "timeout_seconds": args.timeout_seconds,
                    })
                    .as_object()
                    .cloned()
                    .unwrap(),
                ),
            };

            let call_result_value = mcp_server::handle_tools_call(params, &broker, false)
                .await
                .context("failed to run code")?;
            let call_result: rmcp::model::CallToolResult =
                serde_json::from_value(call_result_value)
                    .context("failed to parse call_tool result")?;
            let exit_with_error = call_result.is_error.unwrap_or(false);

            print_result(&call_result, args.output_format)?;
            broker.shutdown().await;

            if exit_with_error {
                std::process::exit(1);
            }
        }
        None => {
            eprintln!("No command provided. Use --help for usage information.");
            std::process::exit(1);
        }
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_cli_command_parsing() {
        let args = vec!["mcp-sandbox-broker", "serve"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Some(Commands::Serve(_))));

        let args = vec!["mcp-sandbox-broker", "run", "--code", "print(1)"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run(_))));
    }
}
