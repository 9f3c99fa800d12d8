//! Error taxonomy for the broker core.
//!
//! Every fallible operation that can be observed by a caller of
//! [`crate::Broker::run`] eventually collapses into a [`BrokerError`] variant.
//! Internal setup code is free to use [`anyhow::Error`] (file IO, JSON
//! parsing, process spawn failures) but must convert to a variant here before
//! crossing the public API boundary.

use thiserror::Error;

/// The broker's error taxonomy, as described in the execution model.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown tool server: {0}")]
    UnknownServer(String),

    #[error("no container runtime available (probed: {probed})")]
    RuntimeUnavailable { probed: String },

    #[error("failed to launch sandbox container: {0}")]
    ContainerLaunchFailed(String),

    #[error("tool server '{0}' failed to start: {1}")]
    ServerStartFailed(String, String),

    #[error("tool server '{0}' is unavailable: {1}")]
    ServerUnavailable(String, String),

    #[error("tool '{tool}' on server '{server}' reported an error: {message}")]
    ToolError {
        server: String,
        tool: String,
        message: String,
    },

    #[error("execution timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BrokerError {
    /// Map an error onto the narrow `status` surface returned to callers of
    /// [`crate::Broker::run`].
    pub fn status(&self) -> &'static str {
        match self {
            BrokerError::Validation(_) | BrokerError::UnknownServer(_) => "validation_error",
            BrokerError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
