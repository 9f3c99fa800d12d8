//! The Broker Facade: top-level object owning the tool-server pool, the
//! metadata cache, the alias map, and the single sandbox container.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{info, instrument, warn};

use crate::config::BrokerConfig;
use crate::container::{spawn_idle_watchdog, ContainerManager};
use crate::discovery::{ConfigDiscoverer, ToolServerRecord};
use crate::error::{BrokerError, Result};
use crate::invocation::{self, InvocationContext, RunResult};
use crate::ipc::IpcDirPool;
use crate::tool_server::{ServerMetadata, ToolServerClient};

/// Process-wide broker state. Exclusively owns every [`ToolServerClient`]
/// and the single [`ContainerManager`]. Cheaply cloneable: internals are
/// `Arc`-shared so a clone is a handle, not a deep copy.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

struct Inner {
    config: BrokerConfig,
    records: HashMap<String, ToolServerRecord>,
    aliases: HashMap<String, String>,
    clients: RwLock<HashMap<String, Arc<ToolServerClient>>>,
    /// Records the order servers were first loaded in, so `shutdown` can
    /// stop them in reverse start order.
    start_order: RwLock<Vec<String>>,
    metadata_cache: RwLock<HashMap<String, ServerMetadata>>,
    container: Arc<ContainerManager>,
    ipc_pool: IpcDirPool,
    idle_reset_tx: mpsc::UnboundedSender<()>,
}

impl Broker {
    pub fn builder() -> crate::config::BrokerBuilder {
        crate::config::BrokerBuilder::new()
    }

    pub(crate) async fn from_config(config: BrokerConfig) -> anyhow::Result<Self> {
        let records = match &config.records {
            Some(records) => records.clone(),
            None => {
                let home = etcetera::home_dir()?;
                let cwd = std::env::current_dir()?;
                let self_exe_hint = std::env::current_exe()
                    .ok()
                    .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()));
                ConfigDiscoverer::new(
                    &home,
                    &cwd,
                    config.discovery_override.clone(),
                    self_exe_hint,
                )
                .discover()
            }
        };

        let mut aliases = HashMap::new();
        let mut taken = HashSet::new();
        let mut by_name = HashMap::new();
        for record in records {
            let alias = crate::alias::unique_alias(&record.name, &taken);
            taken.insert(alias.clone());
            aliases.insert(record.name.clone(), alias);
            by_name.insert(record.name.clone(), record);
        }

        let known_servers: Vec<String> = by_name.keys().cloned().collect();
        let container = Arc::new(ContainerManager::new(
            config.runtime_override.clone(),
            config.limits().clone(),
            known_servers,
        ));

        let ipc_pool = IpcDirPool::new(config.state_dir().join("ipc"), config.ipc_retain);
        if let Err(e) = ipc_pool.prune_lru().await {
            warn!(error = %e, "failed to prune stale ipc directories at startup");
        }

        let (idle_reset_tx, idle_reset_rx) = mpsc::unbounded_channel();
        spawn_idle_watchdog(
            Arc::clone(&container),
            config.limits().idle_timeout,
            idle_reset_rx,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                records: by_name,
                aliases,
                clients: RwLock::new(HashMap::new()),
                start_order: RwLock::new(Vec::new()),
                metadata_cache: RwLock::new(HashMap::new()),
                container,
                ipc_pool,
                idle_reset_tx,
            }),
        })
    }

    /// Sandbox-safe alias for `server_name`, stable for the broker's
    /// lifetime.
    pub fn alias_for(&self, server_name: &str) -> Option<&str> {
        self.inner.aliases.get(server_name).map(String::as_str)
    }

    pub fn known_servers(&self) -> Vec<String> {
        self.inner.records.keys().cloned().collect()
    }

    /// Ensure a live client exists for `name`, spawning it on first use.
    #[instrument(skip(self))]
    async fn load_server(&self, name: &str) -> Result<Arc<ToolServerClient>> {
        if let Some(client) = self.inner.clients.read().await.get(name) {
            return Ok(Arc::clone(client));
        }

        let record = self
            .inner
            .records
            .get(name)
            .ok_or_else(|| BrokerError::UnknownServer(name.to_string()))?
            .clone();

        let client = Arc::new(ToolServerClient::new(record));
        client.start().await?;

        let mut clients = self.inner.clients.write().await;
        let newly_inserted = !clients.contains_key(name);
        let client = Arc::clone(clients.entry(name.to_string()).or_insert(client));
        if newly_inserted {
            self.inner.start_order.write().await.push(name.to_string());
        }
        Ok(client)
    }

    /// Ensure cached metadata exists for `name`, calling `list_tools` on
    /// first use. Metadata is immutable for the server's lifetime once
    /// cached, per the data model.
    async fn ensure_metadata(&self, name: &str, client: &ToolServerClient) -> Result<()> {
        if self.inner.metadata_cache.read().await.contains_key(name) {
            return Ok(());
        }
        let tools = client.list_tools().await?;
        let alias = self
            .inner
            .aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| crate::alias::sanitize(name));
        let metadata = ServerMetadata {
            name: name.to_string(),
            alias,
            tools,
        };
        self.inner
            .metadata_cache
            .write()
            .await
            .insert(name.to_string(), metadata);
        Ok(())
    }

    /// Execute `code` against `servers`. See [`invocation::run`] for the
    /// full validation/setup/dispatch/teardown sequence.
    #[instrument(skip(self, code), fields(servers = ?servers))]
    pub async fn run(
        &self,
        code: String,
        servers: Vec<String>,
        timeout_seconds: u64,
    ) -> Result<RunResult> {
        for server in &servers {
            if !self.inner.records.contains_key(server) {
                return Err(BrokerError::UnknownServer(server.clone()));
            }
        }

        let mut loaded_clients = HashMap::new();
        for server in &servers {
            let client = self.load_server(server).await?;
            self.ensure_metadata(server, &client).await?;
            loaded_clients.insert(server.clone(), client);
        }

        let metadata = self.inner.metadata_cache.read().await.clone();
        let timeout_seconds = if timeout_seconds == 0 {
            self.inner.config.default_timeout_secs()
        } else {
            timeout_seconds
        };

        let ctx = InvocationContext {
            container: &self.inner.container,
            clients: &loaded_clients,
            metadata: &metadata,
            ipc_pool: &self.inner.ipc_pool,
            idle_reset: &self.inner.idle_reset_tx,
            max_timeout_secs: self.inner.config.max_timeout_secs(),
            stdout_cap: self.inner.config.limits().stdout_cap_bytes,
            stderr_cap: self.inner.config.limits().stderr_cap_bytes,
        };

        invocation::run(&ctx, code, servers, timeout_seconds).await
    }

    /// Stop the container and every live tool-server client, in reverse
    /// order of start. Retains the alias map and metadata cache.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.inner.container.shutdown().await;
        let mut clients = self.inner.clients.write().await;
        let mut start_order = self.inner.start_order.write().await;
        let names: Vec<String> = start_order.drain(..).rev().collect();
        for name in names {
            if let Some(client) = clients.remove(&name) {
                client.stop().await;
            }
        }
        info!("broker shut down");
    }

    pub fn ipc_pool(&self) -> &IpcDirPool {
        &self.inner.ipc_pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(name: &str) -> ToolServerRecord {
        ToolServerRecord {
            name: name.to_string(),
            command: "true".to_string(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            description: String::new(),
            self_exclude: false,
        }
    }

    #[tokio::test]
    async fn run_rejects_unknown_server_before_touching_container() {
        let state_dir = tempfile::tempdir().unwrap();
        let config = Broker::builder()
            .with_records(vec![sample_record("a")])
            .with_state_dir(state_dir.path())
            .build_config()
            .unwrap();
        let broker = Broker::from_config(config).await.unwrap();
        let err = broker
            .run("print(1)".to_string(), vec!["ghost".to_string()], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownServer(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn aliases_assigned_for_every_known_server() {
        let state_dir = tempfile::tempdir().unwrap();
        let config = Broker::builder()
            .with_records(vec![sample_record("Weather Co")])
            .with_state_dir(state_dir.path())
            .build_config()
            .unwrap();
        let broker = Broker::from_config(config).await.unwrap();
        assert_eq!(broker.alias_for("Weather Co"), Some("weather_co"));
    }
}
