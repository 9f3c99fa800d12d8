//! Core of a code-execution broker: a long-lived, rootless sandbox
//! container reused across many executions, fronted by a pool of
//! tool-server subprocesses the sandbox reaches through a correlated
//! request/response frame protocol.
//!
//! # Quick start
//!
//! ```ignore
//! use broker_core::Broker;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let broker = Broker::builder().build().await?;
//! let result = broker.run("print('hello')".to_string(), vec![], 30).await?;
//! println!("{}", result.stdout);
//! broker.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod alias;
mod broker;
mod config;
mod container;
mod discovery;
mod entrypoint;
mod error;
mod frame;
mod invocation;
mod ipc;
mod runtime;
mod search;
mod tool_server;

pub use broker::Broker;
pub use config::{BrokerBuilder, BrokerConfig};
pub use container::ContainerLimits;
pub use discovery::{ConfigDiscoverer, ToolServerRecord};
pub use error::{BrokerError, Result};
pub use frame::{ContainerFrame, DocDetail, HostFrame, RpcRequest, RpcResponse};
pub use invocation::{RunResult, RunStatus};
pub use runtime::RuntimeDetector;
pub use search::{search_tool_docs, SearchHit};
pub use tool_server::{ServerMetadata, ToolServerClient, ToolSpec};
