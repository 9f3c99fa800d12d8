//! MCP server library for the sandbox broker.
//!
//! This crate provides the MCP protocol implementation for running Python
//! code in an isolated container, brokered against a pool of tool-server
//! subprocesses.
//!
//! # Quick Start
//!
//! ```ignore
//! use mcp_server::McpServer;
//! use broker_core::Broker;
//!
//! let broker = Broker::builder().build().await?;
//! let server = McpServer::new(broker, false);
//! ```
//!
//! # Custom Hooks
//!
//! Use hooks to intercept and customize request handling:
//!
//! ```ignore
//! use mcp_server::{McpServer, ServerHooks, ToolCallContext, MiddlewareStack};
//! use rmcp::model::ErrorData;
//!
//! struct LoggingHooks;
//!
//! impl ServerHooks for LoggingHooks {
//!     fn before_tool_call(&self, ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
//!         tracing::info!("Calling: {}", ctx.tool_name);
//!         Ok(())
//!     }
//! }
//!
//! // Single hook
//! let server = McpServer::builder(broker)
//!     .with_hooks(LoggingHooks)
//!     .build();
//!
//! // Multiple hooks (middleware stack)
//! let hooks = MiddlewareStack::new()
//!     .push(LoggingHooks)
//!     .push(AuthHooks::new(key));
//!
//! let server = McpServer::builder(broker)
//!     .with_hooks(hooks)
//!     .build();
//! ```
//!
//! Note: `ErrorData` is re-exported from `rmcp::model::ErrorData`.

mod hooks;
mod prompts;
mod resources;
mod server;
mod tools;

// Re-export hooks
pub use hooks::{
    blocked_result, MiddlewareStack, NoOpHooks, ServerHooks, ToolCallContext, ToolResultContext,
};

// Re-export server
pub use server::{McpServer, McpServerBuilder};

// Re-export handlers (for advanced use cases)
pub use prompts::{handle_prompts_get, handle_prompts_list};
pub use resources::handle_resources_list;
pub use tools::{handle_tools_call, handle_tools_list, RUN_PYTHON_TOOL};
