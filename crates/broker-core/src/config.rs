//! Builder and configuration for constructing a [`crate::Broker`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::container::ContainerLimits;
use crate::discovery::ToolServerRecord;
use crate::ipc::DEFAULT_RETAIN;

/// Fully-specified configuration for constructing a [`crate::Broker`].
#[derive(Clone)]
pub struct BrokerConfig {
    pub(crate) runtime_override: Option<String>,
    pub(crate) discovery_override: Option<PathBuf>,
    pub(crate) records: Option<Vec<ToolServerRecord>>,
    pub(crate) limits: ContainerLimits,
    pub(crate) default_timeout_secs: u64,
    pub(crate) max_timeout_secs: u64,
    pub(crate) state_dir: PathBuf,
    pub(crate) ipc_retain: usize,
}

impl BrokerConfig {
    pub fn limits(&self) -> &ContainerLimits {
        &self.limits
    }

    pub fn default_timeout_secs(&self) -> u64 {
        self.default_timeout_secs
    }

    pub fn max_timeout_secs(&self) -> u64 {
        self.max_timeout_secs
    }

    pub fn state_dir(&self) -> &std::path::Path {
        &self.state_dir
    }
}

/// Builder that validates inputs and produces a [`BrokerConfig`] or a fully
/// constructed [`crate::Broker`].
pub struct BrokerBuilder {
    runtime_override: Option<String>,
    discovery_override: Option<PathBuf>,
    records: Option<Vec<ToolServerRecord>>,
    limits: ContainerLimits,
    default_timeout_secs: u64,
    max_timeout_secs: u64,
    state_dir: Option<PathBuf>,
    ipc_retain: usize,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self {
            runtime_override: None,
            discovery_override: None,
            records: None,
            limits: ContainerLimits::default(),
            default_timeout_secs: 30,
            max_timeout_secs: 120,
            state_dir: None,
            ipc_retain: DEFAULT_RETAIN,
        }
    }

    pub fn with_runtime_override(mut self, runtime: impl Into<String>) -> Self {
        self.runtime_override = Some(runtime.into());
        self
    }

    pub fn with_discovery_override(mut self, path: impl Into<PathBuf>) -> Self {
        self.discovery_override = Some(path.into());
        self
    }

    /// Supply tool-server records directly, bypassing filesystem discovery.
    /// Primarily for tests and for embedding this crate with a programmatic
    /// server list.
    pub fn with_records(mut self, records: Vec<ToolServerRecord>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.limits.image = image.into();
        self
    }

    pub fn with_memory(mut self, memory: impl Into<String>) -> Self {
        self.limits.memory = memory.into();
        self
    }

    pub fn with_pids_limit(mut self, pids: u32) -> Self {
        self.limits.pids_limit = pids;
        self
    }

    pub fn with_cpus(mut self, cpus: impl Into<String>) -> Self {
        self.limits.cpus = cpus.into();
        self
    }

    pub fn with_container_user(mut self, user: impl Into<String>) -> Self {
        self.limits.container_user = user.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.limits.idle_timeout = idle;
        self
    }

    pub fn with_default_timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    pub fn with_max_timeout_secs(mut self, secs: u64) -> Self {
        self.max_timeout_secs = secs;
        self
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_ipc_retain(mut self, retain: usize) -> Self {
        self.ipc_retain = retain;
        self
    }

    pub fn build_config(self) -> Result<BrokerConfig> {
        let state_dir = match self.state_dir {
            Some(dir) => dir,
            None => default_state_dir()?,
        };
        Ok(BrokerConfig {
            runtime_override: self.runtime_override,
            discovery_override: self.discovery_override,
            records: self.records,
            limits: self.limits,
            default_timeout_secs: self.default_timeout_secs,
            max_timeout_secs: self.max_timeout_secs,
            state_dir,
            ipc_retain: self.ipc_retain,
        })
    }

    /// Construct a fully initialised [`crate::Broker`]: detects the
    /// runtime, runs discovery (unless records were supplied explicitly),
    /// and prunes stale IPC directories.
    pub async fn build(self) -> Result<crate::Broker> {
        let config = self.build_config()?;
        crate::Broker::from_config(config).await
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_state_dir() -> Result<PathBuf> {
    let strategy = etcetera::choose_base_strategy()?;
    Ok(strategy.data_dir().join("mcp-sandbox-broker"))
}
