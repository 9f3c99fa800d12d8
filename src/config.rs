//! Layered configuration for the `mcp-sandbox-broker` binary: CLI flags
//! merged over `MCP_BRIDGE_`-prefixed environment variables merged over an
//! optional TOML file, via the same `figment` precedence chain the teacher
//! uses for its own component/secrets configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use broker_core::BrokerBuilder;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::commands::Serve;

fn default_image() -> String {
    "python:3.12-slim".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_pids() -> u32 {
    64
}

fn default_cpus() -> String {
    "1.0".to_string()
}

fn default_container_user() -> String {
    "65534:65534".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_timeout_secs() -> u64 {
    120
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_bind_address() -> String {
    "127.0.0.1:9001".to_string()
}

/// Get the default state directory based on the OS.
pub fn get_state_dir() -> Result<PathBuf, anyhow::Error> {
    let dir_strategy = etcetera::choose_base_strategy().context("Unable to get home directory")?;
    Ok(dir_strategy.data_dir().join("mcp-sandbox-broker"))
}

fn default_state_dir() -> PathBuf {
    get_state_dir().unwrap_or_else(|_| {
        eprintln!("WARN: Unable to determine default state directory, using `state` directory in the current working directory");
        PathBuf::from("./state")
    })
}

/// Configuration for the sandbox broker and its MCP server.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Container runtime executable override (`podman`, `docker`, or a path).
    #[serde(default)]
    pub runtime: Option<String>,

    /// Base container image.
    #[serde(default = "default_image")]
    pub image: String,

    /// Memory cap, runtime-native syntax.
    #[serde(default = "default_memory")]
    pub memory: String,

    /// Process count cap.
    #[serde(default = "default_pids")]
    pub pids: u32,

    /// CPU quota.
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Container user, as `UID:GID`.
    #[serde(default = "default_container_user")]
    pub container_user: String,

    /// Default per-run timeout, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Clamp ceiling for caller-supplied timeouts, in seconds.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    /// Idle TTL before the sandbox container is torn down, in seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Persistent state root (IPC pool, discovery cache).
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Override for tool-server discovery, replacing the default search list.
    #[serde(default)]
    pub servers_config: Option<PathBuf>,

    /// Bind address for HTTP-based transports (SSE and StreamableHttp).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Config {
    /// Returns a new [`Config`] by merging `cli_config` over
    /// `MCP_BRIDGE_`-prefixed environment variables over an optional TOML
    /// configuration file. The file is located at
    /// `$XDG_CONFIG_HOME/mcp-sandbox-broker/config.toml` unless
    /// `MCP_BRIDGE_CONFIG_FILE` points elsewhere.
    ///
    /// Precedence, highest first: CLI flags, then environment, then file.
    pub fn new<T: Serialize>(cli_config: &T) -> Result<Self, anyhow::Error> {
        let config_file_path = match std::env::var_os("MCP_BRIDGE_CONFIG_FILE") {
            Some(path) => PathBuf::from(path),
            None => etcetera::choose_base_strategy()
                .context("Unable to get home directory")?
                .config_dir()
                .join("mcp-sandbox-broker")
                .join("config.toml"),
        };
        Self::new_from_path(cli_config, config_file_path)
    }

    /// Same as [`Config::new`], but allows specifying a custom path for the
    /// configuration file.
    pub fn new_from_path<T: Serialize>(
        cli_config: &T,
        config_file_path: impl AsRef<Path>,
    ) -> Result<Self, anyhow::Error> {
        figment::Figment::new()
            .admerge(Toml::file(config_file_path))
            .admerge(Env::prefixed("MCP_BRIDGE_"))
            .admerge(Serialized::defaults(cli_config))
            .extract()
            .context("Unable to merge configs")
    }

    /// Creates a new config from a [`Serve`] CLI struct.
    pub fn from_serve(serve_config: &Serve) -> Result<Self, anyhow::Error> {
        Self::new(serve_config)
    }

    /// Build a [`broker_core::BrokerBuilder`] pre-populated from this config.
    pub fn broker_builder(&self) -> BrokerBuilder {
        let mut builder = BrokerBuilder::new()
            .with_image(self.image.clone())
            .with_memory(self.memory.clone())
            .with_pids_limit(self.pids)
            .with_cpus(self.cpus.clone())
            .with_container_user(self.container_user.clone())
            .with_idle_timeout(std::time::Duration::from_secs(self.idle_timeout_secs))
            .with_default_timeout_secs(self.timeout_secs)
            .with_max_timeout_secs(self.max_timeout_secs)
            .with_state_dir(self.state_dir.clone());

        if let Some(runtime) = &self.runtime {
            builder = builder.with_runtime_override(runtime.clone());
        }
        if let Some(servers_config) = &self.servers_config {
            builder = builder.with_discovery_override(servers_config.clone());
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn create_test_cli_config() -> Serve {
        Serve {
            runtime: None,
            image: None,
            transport: Default::default(),
            bind_address: None,
        }
    }

    struct SetEnv<'a> {
        old: Option<OsString>,
        key: &'a str,
    }

    impl Drop for SetEnv<'_> {
        fn drop(&mut self) {
            if let Some(old_value) = &self.old {
                std::env::set_var(self.key, old_value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    impl<'a> SetEnv<'a> {
        fn new(key: &'a str, value: &'a str) -> Self {
            let old_value = std::env::var_os(key);
            std::env::set_var(key, value);
            SetEnv {
                old: old_value,
                key,
            }
        }
    }

    #[test]
    fn test_config_file_not_exists_succeeds_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let non_existent_config = temp_dir.path().join("non_existent_config.toml");

        let serve_config = create_test_cli_config();
        let config = Config::new_from_path(&serve_config, &non_existent_config)
            .expect("Failed to create config");

        assert_eq!(config.image, "python:3.12-slim");
    }

    #[test]
    fn test_config_file_cli_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let toml_content = r#"
image = "python:3.11-slim"
"#;
        fs::write(&config_file, toml_content).unwrap();

        let mut serve_config = create_test_cli_config();
        serve_config.image = Some("python:3.12-alpine".to_string());

        let config =
            Config::new_from_path(&serve_config, &config_file).expect("Failed to create config");

        assert_eq!(config.image, "python:3.12-alpine");
    }

    #[test]
    fn test_config_file_values_used_without_cli_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let toml_content = r#"
image = "python:3.11-slim"
"#;
        fs::write(&config_file, toml_content).unwrap();

        let config = Config::new_from_path(&create_test_cli_config(), &config_file)
            .expect("Failed to create config");

        assert_eq!(config.image, "python:3.11-slim");
    }

    #[test]
    fn test_invalid_toml_file_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("invalid_config.toml");

        let invalid_toml = r#"
image = "python:3.12-slim"
memory = unclosed_string"
"#;
        fs::write(&config_file, invalid_toml).unwrap();

        let result = Config::new_from_path(&create_test_cli_config(), &config_file);
        assert!(result.is_err());
    }

    #[test]
    fn test_bind_address_default() {
        temp_env::with_vars_unset(vec!["MCP_BRIDGE_BIND_ADDRESS"], || {
            let temp_dir = TempDir::new().unwrap();
            let non_existent_config = temp_dir.path().join("non_existent_config.toml");

            let config = Config::new_from_path(&create_test_cli_config(), &non_existent_config)
                .expect("Failed to create config");

            assert_eq!(config.bind_address, "127.0.0.1:9001");
        });
    }

    #[test]
    fn test_bind_address_env_var() {
        temp_env::with_var("MCP_BRIDGE_BIND_ADDRESS", Some("10.0.0.1:3000"), || {
            let temp_dir = TempDir::new().unwrap();
            let non_existent_config = temp_dir.path().join("non_existent_config.toml");

            let config = Config::new_from_path(&create_test_cli_config(), &non_existent_config)
                .expect("Failed to create config");

            assert_eq!(config.bind_address, "10.0.0.1:3000");
        });
    }

    #[test]
    fn test_bind_address_cli_override() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("config.toml");

        let toml_content = r#"
bind_address = "0.0.0.0:8080"
"#;
        fs::write(&config_file, toml_content).unwrap();

        let mut serve_config = create_test_cli_config();
        serve_config.bind_address = Some("192.168.1.100:9090".to_string());

        let config =
            Config::new_from_path(&serve_config, &config_file).expect("Failed to create config");

        assert_eq!(config.bind_address, "192.168.1.100:9090");
    }

    #[test]
    fn test_runtime_override_threaded_into_builder() {
        let config = Config::new_from_path(
            &create_test_cli_config(),
            std::env::temp_dir().join("does-not-exist.toml"),
        )
        .unwrap();
        let mut config = config;
        config.runtime = Some("podman".to_string());
        let built = config.broker_builder().build_config().unwrap();
        assert_eq!(built.limits().image, "python:3.12-slim");
    }
}
