//! Detection of a rootless-capable container runtime executable.

use std::path::Path;

use crate::error::{BrokerError, Result};

/// Candidate runtime binaries, tried in order. Rootless-friendly `podman` is
/// preferred over `docker`.
const CANDIDATES: &[&str] = &["podman", "docker"];

/// Resolves which container runtime executable this broker will invoke.
#[derive(Debug, Clone)]
pub struct RuntimeDetector {
    /// Directories to search, mirroring `PATH` unless overridden (for tests).
    search_path: Vec<std::path::PathBuf>,
}

impl RuntimeDetector {
    pub fn from_env() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self { search_path }
    }

    #[cfg(test)]
    fn with_search_path(paths: Vec<std::path::PathBuf>) -> Self {
        Self {
            search_path: paths,
        }
    }

    fn is_executable(path: &Path) -> bool {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            path.metadata()
                .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
        }
        #[cfg(not(unix))]
        {
            path.is_file()
        }
    }

    fn find_on_path(&self, name: &str) -> Option<std::path::PathBuf> {
        self.search_path.iter().find_map(|dir| {
            let candidate = dir.join(name);
            Self::is_executable(&candidate).then_some(candidate)
        })
    }

    /// Probe for a runtime. `override_runtime`, if set (from
    /// `MCP_BRIDGE_RUNTIME`), either names a candidate on `PATH` or an
    /// absolute/relative path that is itself checked for executability.
    pub fn detect(&self, override_runtime: Option<&str>) -> Result<String> {
        if let Some(name) = override_runtime {
            let as_path = Path::new(name);
            if as_path.components().count() > 1 {
                return if Self::is_executable(as_path) {
                    Ok(name.to_string())
                } else {
                    Err(BrokerError::RuntimeUnavailable {
                        probed: name.to_string(),
                    })
                };
            }
            return self
                .find_on_path(name)
                .map(|_| name.to_string())
                .ok_or_else(|| BrokerError::RuntimeUnavailable {
                    probed: name.to_string(),
                });
        }

        for candidate in CANDIDATES {
            if self.find_on_path(candidate).is_some() {
                return Ok((*candidate).to_string());
            }
        }

        Err(BrokerError::RuntimeUnavailable {
            probed: CANDIDATES.join(", "),
        })
    }
}

impl Default for RuntimeDetector {
    fn default() -> Self {
        Self::from_env()
    }
}
