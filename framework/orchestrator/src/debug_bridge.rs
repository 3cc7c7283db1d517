use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use scenario_pilot_core::prelude::{CancelListener, CancelledError};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::Instant;

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::launcher::RunningProcess;

/// Interpreter-side module that opens the debug protocol listener for remote attach.
pub const BRIDGE_MODULE: &str = "debugpy";

/// Asks the user whether a missing dependency may be installed into the interpreter
/// environment.
pub trait InstallConsent: Send + Sync {
    fn approve_install(&self, package: &str) -> bool;
}

/// Timing bounds for the readiness poll. Shortened in tests.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub poll_interval: Duration,
    pub ready_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Make sure the bridge module can be imported by `interpreter`, offering to install it
/// on demand. A missing module with install declined or failed aborts the run.
pub async fn ensure_bridge_module(
    interpreter: &Path,
    consent: &dyn InstallConsent,
) -> OrchestratorResult<()> {
    if import_probe(interpreter).await? {
        return Ok(());
    }

    if !consent.approve_install(BRIDGE_MODULE) {
        return Err(OrchestratorError::Environment(format!(
            "The '{BRIDGE_MODULE}' module is not available and installing it was declined"
        )));
    }

    log::info!("Installing '{BRIDGE_MODULE}' into {}", interpreter.display());
    let status = Command::new(interpreter)
        .args(["-m", "pip", "install", BRIDGE_MODULE])
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            OrchestratorError::Environment(format!(
                "Failed to run the package installer for '{BRIDGE_MODULE}': {e}"
            ))
        })?;
    if !status.success() {
        return Err(OrchestratorError::Environment(format!(
            "Installing '{BRIDGE_MODULE}' failed with {status}"
        )));
    }

    if import_probe(interpreter).await? {
        Ok(())
    } else {
        Err(OrchestratorError::Environment(format!(
            "The '{BRIDGE_MODULE}' module is still not importable after installation"
        )))
    }
}

async fn import_probe(interpreter: &Path) -> OrchestratorResult<bool> {
    let status = Command::new(interpreter)
        .arg("-c")
        .arg(format!("import {BRIDGE_MODULE}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| {
            OrchestratorError::Environment(format!(
                "Failed to run the interpreter {}: {e}",
                interpreter.display()
            ))
        })?;
    Ok(status.success())
}

/// Reserve a highly-likely-free ephemeral loopback port.
///
/// The listener is bound to port 0, the OS-assigned port is read back, and the listener is
/// closed immediately so the port is free for the bridge process. The port is not held
/// across the race window before the bridge starts listening; ownership passes to the
/// child once it binds.
pub fn allocate_loopback_port() -> OrchestratorResult<u16> {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(OrchestratorError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(OrchestratorError::PortAllocation)?
        .port();
    Ok(port)
}

/// An elevated bridge child waiting for the debugger to connect. Lives only for one
/// debug-attach flow; the child is killed on timeout, cancellation, or attach failure.
#[derive(Debug)]
pub struct DebugSession {
    pub port: u16,
    child: RunningProcess,
}

impl DebugSession {
    pub fn new(port: u16, child: RunningProcess) -> Self {
        Self { port, child }
    }

    /// Poll the bridge's loopback listener until it accepts a connection.
    ///
    /// Attempts run every `poll_interval` up to `ready_timeout`; the caller's task is free
    /// between attempts, so no event loop is ever stalled. On timeout or cancellation the
    /// child is killed and the session is consumed.
    pub async fn wait_until_ready(
        mut self,
        config: &BridgeConfig,
        cancel: &mut CancelListener,
    ) -> OrchestratorResult<Self> {
        let deadline = Instant::now() + config.ready_timeout;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.child.kill().await;
                    return Err(OrchestratorError::Cancelled(CancelledError::default()));
                }
                result = TcpStream::connect(("127.0.0.1", self.port)) => {
                    if result.is_ok() {
                        return Ok(self);
                    }
                }
            }

            if Instant::now() >= deadline {
                self.child.kill().await;
                return Err(OrchestratorError::Timeout(config.ready_timeout));
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.child.kill().await;
                    return Err(OrchestratorError::Cancelled(CancelledError::default()));
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
    }

    /// Tear the session down after a failed attach.
    pub async fn abort(self) {
        self.child.kill().await;
    }

    /// Hand the child over for background exit observation once the debugger is attached.
    pub fn into_child(self) -> RunningProcess {
        self.child
    }
}
