//! The sandbox container: a single long-lived, reused child process whose
//! stdio carries the frame protocol in [`crate::frame`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, instrument, warn};

use crate::error::{BrokerError, Result};
use crate::frame::{encode_line, ContainerFrame, HostFrame};
use crate::runtime::RuntimeDetector;

/// Resource limits and runtime options assembled into the launch command.
#[derive(Debug, Clone)]
pub struct ContainerLimits {
    pub image: String,
    pub memory: String,
    pub pids_limit: u32,
    pub cpus: String,
    pub container_user: String,
    pub idle_timeout: Duration,
    pub stdout_cap_bytes: usize,
    pub stderr_cap_bytes: usize,
}

impl Default for ContainerLimits {
    fn default() -> Self {
        Self {
            image: "python:3.12-slim".to_string(),
            memory: "512m".to_string(),
            pids_limit: 64,
            cpus: "1.0".to_string(),
            container_user: "65534:65534".to_string(),
            idle_timeout: Duration::from_secs(300),
            stdout_cap_bytes: 1 << 20,
            stderr_cap_bytes: 1 << 20,
        }
    }
}

const TRUNCATION_SENTINEL: &str = "\n...truncated...\n";

struct RunningContainer {
    child: Child,
    stdin: tokio::process::ChildStdin,
}

/// A single frame emitted by the container, relayed to whichever invocation
/// is currently registered as active. Since at most one execution is ever in
/// flight per container (see the concurrency model), there is always at most
/// one active subscriber.
pub enum Dispatch {
    Frame(ContainerFrame),
}

/// Owns the single sandbox container for the lifetime of a broker.
pub struct ContainerManager {
    runtime_override: Option<String>,
    resolved_runtime: Mutex<Option<String>>,
    limits: ContainerLimits,
    known_servers: Vec<String>,
    current: Mutex<Option<RunningContainer>>,
    active_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Dispatch>>>>,
    /// Held by one invocation for the whole of `ensure_running`→`send_frame`→
    /// `drive_frame_loop`, so a second concurrent `run` call queues behind it
    /// instead of racing `active_tx` for the same container session.
    invocation_gate: Mutex<()>,
}

impl ContainerManager {
    pub fn new(
        runtime_override: Option<String>,
        limits: ContainerLimits,
        known_servers: Vec<String>,
    ) -> Self {
        Self {
            runtime_override,
            resolved_runtime: Mutex::new(None),
            limits,
            known_servers,
            current: Mutex::new(None),
            active_tx: Arc::new(Mutex::new(None)),
            invocation_gate: Mutex::new(()),
        }
    }

    /// Acquire the single-invocation gate. Held by the caller for the
    /// duration of one invocation's `ensure_running`/`send_frame`/
    /// `drive_frame_loop` sequence; a second concurrent `run` call blocks
    /// here until the first reports `execution_done` or is cancelled, per
    /// the at-most-one-invocation-in-flight guarantee.
    pub async fn lock_invocation(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.invocation_gate.lock().await
    }

    /// Ensure the container is running, launching it on first use, and
    /// register a fresh receiver as the active subscriber for the caller's
    /// upcoming `execute`. Runtime detection (see [`crate::runtime`]) is
    /// deferred to this first launch rather than broker construction, so a
    /// broker with no configured servers never needs a runtime at all.
    ///
    /// Callers must hold the [`Self::lock_invocation`] guard for the whole
    /// invocation; this method does not itself serialise against a second
    /// concurrent caller.
    #[instrument(skip(self, ipc_dir))]
    pub async fn ensure_running(
        &self,
        ipc_dir: &PathBuf,
        env_additions: &HashMap<String, String>,
    ) -> Result<mpsc::UnboundedReceiver<Dispatch>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.active_tx.lock().await = Some(tx);

        let mut current = self.current.lock().await;
        if current.is_some() {
            return Ok(rx);
        }

        let runtime = self.resolve_runtime().await?;

        let entrypoint_path = ipc_dir.join("entrypoint");
        tokio::fs::write(&entrypoint_path, crate::entrypoint::render(&self.known_servers))
            .await
            .context("failed to write entrypoint artefact")
            .map_err(BrokerError::Other)?;

        let mut command = Command::new(&runtime);
        command
            .arg("run")
            .arg("--rm")
            .arg("--interactive")
            .arg("--network")
            .arg("none")
            .arg("--read-only")
            .arg("--pids-limit")
            .arg(self.limits.pids_limit.to_string())
            .arg("--memory")
            .arg(&self.limits.memory)
            .arg("--cpus")
            .arg(&self.limits.cpus)
            .arg("--tmpfs")
            .arg("/tmp:rw,noexec,nosuid,nodev,size=64m")
            .arg("--tmpfs")
            .arg("/workspace:rw,noexec,nosuid,nodev,size=128m")
            .arg("--workdir")
            .arg("/workspace")
            .arg("--security-opt")
            .arg("no-new-privileges")
            .arg("--cap-drop")
            .arg("ALL")
            .arg("--user")
            .arg(&self.limits.container_user)
            .arg("--volume")
            .arg(format!("{}:/ipc:rw", ipc_dir.display()));

        for (key, value) in env_additions {
            command.arg("--env").arg(format!("{key}={value}"));
        }

        command
            .arg(&self.limits.image)
            .arg("python3")
            .arg("-u")
            .arg("/ipc/entrypoint")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| BrokerError::ContainerLaunchFailed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BrokerError::ContainerLaunchFailed("no stdin handle".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BrokerError::ContainerLaunchFailed("no stdout handle".into()))?;

        let active_tx = Arc::clone(&self.active_tx);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<ContainerFrame>(&line) {
                        Ok(frame) => {
                            let guard = active_tx.lock().await;
                            if let Some(sender) = guard.as_ref() {
                                let _ = sender.send(Dispatch::Frame(frame));
                            }
                        }
                        Err(e) => warn!(error = %e, line, "dropping unparseable container frame"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "error reading container stdout");
                        break;
                    }
                }
            }
            debug!("container stdout reader exiting");
        });

        *current = Some(RunningContainer { child, stdin });
        info!(image = %self.limits.image, "sandbox container launched");
        Ok(rx)
    }

    async fn resolve_runtime(&self) -> Result<String> {
        let mut resolved = self.resolved_runtime.lock().await;
        if let Some(runtime) = resolved.as_ref() {
            return Ok(runtime.clone());
        }
        let runtime = RuntimeDetector::from_env().detect(self.runtime_override.as_deref())?;
        *resolved = Some(runtime.clone());
        Ok(runtime)
    }

    pub async fn send_frame(&self, frame: &HostFrame) -> Result<()> {
        let mut current = self.current.lock().await;
        let Some(running) = current.as_mut() else {
            return Err(BrokerError::ContainerLaunchFailed(
                "container not running".into(),
            ));
        };
        let line = encode_line(frame).map_err(BrokerError::Other)?;
        running
            .stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BrokerError::ContainerLaunchFailed(e.to_string()))?;
        Ok(())
    }

    /// Apply the output cap to a buffer, appending the sentinel exactly once
    /// if truncation occurred. A no-op once `truncated` is already set: the
    /// sentinel was already appended and must not be re-truncated away by a
    /// later frame.
    pub fn cap_output(buffer: &mut String, cap: usize, truncated: &mut bool) {
        if *truncated {
            return;
        }
        if buffer.len() > cap {
            buffer.truncate(cap);
            buffer.push_str(TRUNCATION_SENTINEL);
            *truncated = true;
        }
    }

    pub fn limits(&self) -> &ContainerLimits {
        &self.limits
    }

    /// Graceful shutdown: terminate the child and clear session state. The
    /// next `ensure_running` relaunches transparently.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let mut current = self.current.lock().await;
        if let Some(mut running) = current.take() {
            let _ = running.stdin.shutdown().await;
            if let Err(e) = running.child.start_kill() {
                warn!(error = %e, "failed to signal container process");
            }
            let _ = running.child.wait().await;
            *self.active_tx.lock().await = None;
            info!("sandbox container shut down");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

/// Spawns a background idle-TTL watchdog that calls [`ContainerManager::shutdown`]
/// once `idle_timeout` has elapsed since the last reset.
pub fn spawn_idle_watchdog(
    manager: Arc<ContainerManager>,
    idle_timeout: Duration,
    mut reset_rx: mpsc::UnboundedReceiver<()>,
) {
    tokio::spawn(async move {
        loop {
            let sleep = tokio::time::sleep(idle_timeout);
            tokio::select! {
                _ = sleep => {
                    if manager.is_running().await {
                        info!("idle timeout reached, shutting down sandbox container");
                        manager.shutdown().await;
                    }
                }
                reset = reset_rx.recv() => {
                    if reset.is_none() {
                        break;
                    }
                }
            }
        }
    });
}
