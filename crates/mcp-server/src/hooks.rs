//! Server hooks for intercepting MCP request/response lifecycle.
//!
//! This module provides the [`ServerHooks`] trait for customizing server behavior
//! and [`MiddlewareStack`] for chaining multiple hooks together.

use rmcp::model::{CallToolRequestParam, CallToolResult, ErrorData, Tool};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Context passed to hooks before a tool call.
#[derive(Debug)]
pub struct ToolCallContext {
    /// The tool name being called
    pub tool_name: String,
    /// The arguments passed to the tool (mutable for transformation)
    pub arguments: Option<serde_json::Map<String, Value>>,
    /// Request metadata for sharing data between hooks
    pub metadata: HashMap<String, Value>,
    /// Set to true to block execution
    pub blocked: bool,
    /// Reason for blocking (returned to client)
    pub block_reason: Option<String>,
}

impl ToolCallContext {
    /// Create context from request params
    pub fn from_params(params: &CallToolRequestParam) -> Self {
        Self {
            tool_name: params.name.to_string(),
            arguments: params.arguments.clone(),
            metadata: HashMap::new(),
            blocked: false,
            block_reason: None,
        }
    }

    /// Block this tool call with a reason
    pub fn block(&mut self, reason: impl Into<String>) {
        self.blocked = true;
        self.block_reason = Some(reason.into());
    }

    /// Mutable access to the arguments, for hooks that add or rewrite keys.
    pub fn arguments_mut(&mut self) -> &mut Option<serde_json::Map<String, Value>> {
        &mut self.arguments
    }

    /// Rebuild params with potentially modified arguments
    pub fn into_params(self) -> CallToolRequestParam {
        CallToolRequestParam {
            name: self.tool_name.into(),
            arguments: self.arguments,
        }
    }
}

/// Context passed to hooks after a tool call completes.
#[derive(Debug)]
pub struct ToolResultContext {
    /// The tool name that was called
    pub tool_name: String,
    /// The result (mutable for transformation)
    pub result: CallToolResult,
    /// Request metadata (same instance as before_tool_call)
    pub metadata: HashMap<String, Value>,
    /// Execution duration
    pub duration: std::time::Duration,
}

/// Hooks for customizing MCP server behavior.
///
/// Implement this trait to intercept and modify requests/responses.
/// All methods have default no-op implementations.
///
/// # Example
///
/// ```ignore
/// use mcp_server::{ServerHooks, ToolCallContext};
///
/// struct LoggingHooks;
///
/// impl ServerHooks for LoggingHooks {
///     fn before_tool_call(&self, ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
///         tracing::info!("Calling tool: {}", ctx.tool_name);
///         Ok(())
///     }
/// }
/// ```
pub trait ServerHooks: Send + Sync {
    /// Called before a tool is executed.
    ///
    /// Use this to:
    /// - Validate or transform arguments
    /// - Block calls by calling `ctx.block("reason")`
    /// - Add metadata for later hooks
    fn before_tool_call(&self, _ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
        Ok(())
    }

    /// Called after a tool is executed successfully.
    ///
    /// Use this to:
    /// - Transform or filter results
    /// - Log execution metrics
    /// - Audit trail
    fn after_tool_call(&self, _ctx: &mut ToolResultContext) -> Result<(), ErrorData> {
        Ok(())
    }

    /// Called when the tool list is requested.
    ///
    /// Use this to filter or modify the visible tools.
    fn on_list_tools(&self, _tools: &mut Vec<Tool>) {}

    /// Hook name for logging/debugging.
    fn name(&self) -> &'static str {
        "unnamed"
    }
}

/// Default no-op hooks implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHooks;

impl ServerHooks for NoOpHooks {}

/// A stack of middleware that executes hooks in order.
///
/// # Example
///
/// ```ignore
/// use mcp_server::{MiddlewareStack, ServerHooks};
///
/// let stack = MiddlewareStack::new()
///     .push(LoggingMiddleware)
///     .push(RateLimitMiddleware::new(100));
///
/// let server = McpServer::builder(broker)
///     .with_hooks(stack)
///     .build();
/// ```
pub struct MiddlewareStack {
    middlewares: Vec<Arc<dyn ServerHooks>>,
}

impl Default for MiddlewareStack {
    fn default() -> Self {
        Self::new()
    }
}

impl MiddlewareStack {
    /// Create an empty middleware stack.
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    /// Add a middleware to the stack.
    pub fn push<H: ServerHooks + 'static>(mut self, hooks: H) -> Self {
        self.middlewares.push(Arc::new(hooks));
        self
    }

    /// Add a middleware to the stack (Arc version).
    pub fn push_arc(mut self, hooks: Arc<dyn ServerHooks>) -> Self {
        self.middlewares.push(hooks);
        self
    }

    /// Check if stack is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Get number of middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }
}

impl ServerHooks for MiddlewareStack {
    fn before_tool_call(&self, ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
        for middleware in &self.middlewares {
            tracing::trace!(hook = middleware.name(), tool = %ctx.tool_name, "before_tool_call");
            middleware.before_tool_call(ctx)?;
            if ctx.blocked {
                tracing::debug!(
                    hook = middleware.name(),
                    tool = %ctx.tool_name,
                    reason = ?ctx.block_reason,
                    "Tool call blocked"
                );
                break;
            }
        }
        Ok(())
    }

    fn after_tool_call(&self, ctx: &mut ToolResultContext) -> Result<(), ErrorData> {
        // Run in reverse order (like middleware unwinding)
        for middleware in self.middlewares.iter().rev() {
            tracing::trace!(hook = middleware.name(), tool = %ctx.tool_name, "after_tool_call");
            middleware.after_tool_call(ctx)?;
        }
        Ok(())
    }

    fn on_list_tools(&self, tools: &mut Vec<Tool>) {
        for middleware in &self.middlewares {
            tracing::trace!(hook = middleware.name(), "on_list_tools");
            middleware.on_list_tools(tools);
        }
    }

    fn name(&self) -> &'static str {
        "middleware_stack"
    }
}

/// Create a blocked tool result.
pub fn blocked_result(reason: &str) -> CallToolResult {
    CallToolResult {
        content: Some(vec![rmcp::model::Content::text(format!(
            "Tool call blocked: {reason}"
        ))]),
        structured_content: None,
        is_error: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Tool;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHook {
        before: AtomicUsize,
        after: AtomicUsize,
    }

    impl ServerHooks for CountingHook {
        fn before_tool_call(&self, _ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn after_tool_call(&self, _ctx: &mut ToolResultContext) -> Result<(), ErrorData> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_params() -> CallToolRequestParam {
        CallToolRequestParam {
            name: "run_python".into(),
            arguments: Some(serde_json::Map::new()),
        }
    }

    #[test]
    fn middleware_stack_runs_hooks_in_order_before_call() {
        let stack = MiddlewareStack::new().push(CountingHook {
            before: AtomicUsize::new(0),
            after: AtomicUsize::new(0),
        });
        let mut ctx = ToolCallContext::from_params(&sample_params());
        stack.before_tool_call(&mut ctx).unwrap();
        assert!(!ctx.blocked);
    }

    #[test]
    fn blocking_hook_stops_the_chain() {
        struct Blocker;
        impl ServerHooks for Blocker {
            fn before_tool_call(&self, ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
                ctx.block("denied");
                Ok(())
            }
        }
        struct ShouldNotRun(std::sync::atomic::AtomicBool);
        impl ServerHooks for ShouldNotRun {
            fn before_tool_call(&self, _ctx: &mut ToolCallContext) -> Result<(), ErrorData> {
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
        }
        let marker = std::sync::Arc::new(ShouldNotRun(std::sync::atomic::AtomicBool::new(false)));
        let stack = MiddlewareStack::new()
            .push(Blocker)
            .push_arc(marker.clone());
        let mut ctx = ToolCallContext::from_params(&sample_params());
        stack.before_tool_call(&mut ctx).unwrap();
        assert!(ctx.blocked);
        assert_eq!(ctx.block_reason.as_deref(), Some("denied"));
        assert!(!marker.0.load(Ordering::SeqCst));
    }

    #[test]
    fn on_list_tools_runs_every_middleware() {
        struct Hider(String);
        impl ServerHooks for Hider {
            fn on_list_tools(&self, tools: &mut Vec<Tool>) {
                tools.retain(|t| t.name.as_ref() != self.0);
            }
        }
        let stack = MiddlewareStack::new().push(Hider("internal".to_string()));
        let mut tools = vec![
            Tool {
                name: "run_python".into(),
                description: None,
                input_schema: Arc::new(serde_json::Map::new()),
                annotations: None,
                output_schema: None,
                icons: None,
                title: None,
            },
            Tool {
                name: "internal".into(),
                description: None,
                input_schema: Arc::new(serde_json::Map::new()),
                annotations: None,
                output_schema: None,
                icons: None,
                title: None,
            },
        ];
        stack.on_list_tools(&mut tools);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name.as_ref(), "run_python");
    }

    #[test]
    fn blocked_result_marks_is_error() {
        let result = blocked_result("nope");
        assert_eq!(result.is_error, Some(true));
    }

    #[test]
    fn empty_middleware_stack_is_noop() {
        let stack = MiddlewareStack::new();
        assert!(stack.is_empty());
        let mut ctx = ToolCallContext::from_params(&sample_params());
        stack.before_tool_call(&mut ctx).unwrap();
        assert!(!ctx.blocked);
    }
}
