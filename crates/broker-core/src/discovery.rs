//! Discovery of tool-server configuration across a prioritised set of
//! filesystem locations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Immutable configuration for one spawnable tool server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolServerRecord {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub description: String,
    pub self_exclude: bool,
}

#[derive(Debug, Deserialize)]
struct RawServersFile {
    #[serde(default, rename = "mcpServers")]
    mcp_servers: HashMap<String, RawServerEntry>,
}

#[derive(Debug, Deserialize)]
struct RawServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    #[serde(rename = "self")]
    self_flag: bool,
}

enum Location {
    Dir(PathBuf),
    File(PathBuf),
}

/// Walks the fixed, priority-ordered discovery locations and produces a
/// deduplicated, ordered list of [`ToolServerRecord`].
pub struct ConfigDiscoverer {
    locations: Vec<Location>,
    self_exe_hint: Option<String>,
}

impl ConfigDiscoverer {
    /// Build the discoverer using the default, platform-appropriate location
    /// list, or a single explicit override file when `override_path` is set
    /// (`MCP_SERVERS_CONFIG`).
    pub fn new(home: &Path, cwd: &Path, override_path: Option<PathBuf>, self_exe_hint: Option<String>) -> Self {
        let locations = if let Some(path) = override_path {
            vec![Location::File(path)]
        } else {
            let strategy = etcetera::choose_base_strategy().ok();
            let mut locs = vec![
                Location::Dir(home.join("MCPs")),
                Location::Dir(home.join(".config").join("mcp").join("servers")),
                Location::Dir(cwd.join("mcp-servers")),
                Location::File(cwd.join(".vscode").join("mcp.json")),
                Location::File(home.join(".claude.json")),
                Location::File(home.join(".cursor").join("mcp.json")),
                Location::File(home.join(".opencode.json")),
                Location::File(
                    home.join(".codeium").join("windsurf").join("mcp_config.json"),
                ),
            ];
            if let Some(strategy) = strategy {
                locs.push(Location::File(
                    strategy.config_dir().join("mcp").join("mcp.json"),
                ));
            }
            locs
        };
        Self {
            locations,
            self_exe_hint,
        }
    }

    /// Run discovery, returning records in first-wins priority order.
    pub fn discover(&self) -> Vec<ToolServerRecord> {
        let mut seen = HashMap::new();
        let mut ordered = Vec::new();
        for location in &self.locations {
            let files = match location {
                Location::Dir(dir) => list_json_files(dir),
                Location::File(file) => {
                    if file.is_file() {
                        vec![file.clone()]
                    } else {
                        Vec::new()
                    }
                }
            };
            for file in files {
                for record in self.parse_file(&file) {
                    if seen.contains_key(&record.name) {
                        continue;
                    }
                    if record.self_exclude || self.looks_like_self(&record) {
                        continue;
                    }
                    seen.insert(record.name.clone(), ());
                    ordered.push(record);
                }
            }
        }
        ordered
    }

    fn parse_file(&self, path: &Path) -> Vec<ToolServerRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping unreadable mcp server config");
                return Vec::new();
            }
        };
        let parsed: RawServersFile = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "skipping malformed mcp server config");
                return Vec::new();
            }
        };
        parsed
            .mcp_servers
            .into_iter()
            .map(|(name, entry)| ToolServerRecord {
                name,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                cwd: entry.cwd,
                description: entry.description,
                self_exclude: entry.self_flag,
            })
            .collect()
    }

    fn looks_like_self(&self, record: &ToolServerRecord) -> bool {
        let Some(hint) = &self.self_exe_hint else {
            return false;
        };
        let command_matches = Path::new(&record.command)
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem == hint);
        let arg_matches = record.args.iter().any(|a| a.contains(hint.as_str()));
        command_matches && arg_matches
    }
}

fn list_json_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}
