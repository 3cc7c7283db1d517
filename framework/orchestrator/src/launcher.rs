use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;

use scenario_pilot_core::prelude::LogSink;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::tokenizer::quote_if_needed;

/// Where a spawned child's output goes.
#[derive(Debug, Clone, Default)]
pub enum LaunchOutput {
    /// Stream lines into the shared log sink from the parent process.
    #[default]
    Sink,
    /// Let the child append raw output to a file it owns. Required for detached sessions
    /// started from a short-lived front end, where the parent's pipes would die with it.
    File(PathBuf),
    /// Discard the output entirely.
    Null,
}

/// Everything needed to spawn one child process. One spawn attempt per run, no retries.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    /// Strategy tag prefixed to every log line of this process.
    pub tag: String,
    /// Detach the child from the caller's session so it outlives the initiating action.
    pub detached: bool,
    pub output: LaunchOutput,
}

impl LaunchSpec {
    /// Human-readable echo of the command, for logging only.
    pub fn display_command(&self) -> String {
        let mut parts = vec![quote_if_needed(&self.program)];
        parts.extend(self.args.iter().map(|a| quote_if_needed(a)));
        parts.join(" ")
    }
}

/// A spawned child whose output is being streamed to the shared log sink.
#[derive(Debug)]
pub struct RunningProcess {
    child: Child,
    tag: String,
    sink: LogSink,
    readers: Vec<JoinHandle<()>>,
}

/// Spawn the process described by `spec`, streaming stdout and stderr interleaved into
/// `sink`. Spawn failure is reported immediately and writes no exit line.
pub fn launch(spec: &LaunchSpec, sink: &LogSink) -> OrchestratorResult<RunningProcess> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .current_dir(&spec.cwd)
        .stdin(Stdio::null());
    match &spec.output {
        LaunchOutput::Sink => {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }
        LaunchOutput::File(path) => {
            let open = |p: &std::path::Path| {
                OpenOptions::new().create(true).append(true).open(p).map_err(|e| {
                    OrchestratorError::Process(format!(
                        "Failed to open {} for '{}': {e}",
                        p.display(),
                        spec.tag
                    ))
                })
            };
            let out = open(path)?;
            let err = out.try_clone().map_err(|e| {
                OrchestratorError::Process(format!(
                    "Failed to reopen {} for '{}': {e}",
                    path.display(),
                    spec.tag
                ))
            })?;
            command.stdout(Stdio::from(out)).stderr(Stdio::from(err));
        }
        LaunchOutput::Null => {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
    }
    if spec.detached {
        #[cfg(unix)]
        command.process_group(0);
    }

    log::info!("[{}] {}", spec.tag, spec.display_command());
    let mut child = command.spawn().map_err(|e| {
        OrchestratorError::Process(format!(
            "Failed to spawn '{}': {e}",
            spec.program
        ))
    })?;

    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(forward_lines(stdout, spec.tag.clone(), sink.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(forward_lines(stderr, spec.tag.clone(), sink.clone()));
    }

    Ok(RunningProcess {
        child,
        tag: spec.tag.clone(),
        sink: sink.clone(),
        readers,
    })
}

fn forward_lines(
    stream: impl AsyncRead + Unpin + Send + 'static,
    tag: String,
    sink: LogSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.append(&tag, &line),
                Ok(None) => break,
                Err(e) => {
                    log::debug!("Stopped reading output for '{tag}': {e}");
                    break;
                }
            }
        }
    })
}

impl RunningProcess {
    /// Wait for the process to exit, drain its output, and record the exit line. Returns
    /// the numeric exit code, or `None` when it is unavailable.
    pub async fn wait(mut self) -> OrchestratorResult<Option<i32>> {
        let status = self.child.wait().await.map_err(|e| {
            OrchestratorError::Process(format!("Failed to wait for '{}': {e}", self.tag))
        })?;
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        self.sink.record_exit(&self.tag, status.code());
        Ok(status.code())
    }

    /// Kill the process and record an exit line with an unknown code. Used for
    /// cancellation and for tearing down a debug bridge that never became ready.
    pub async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            log::debug!("Failed to kill '{}': {e}", self.tag);
        }
        for reader in self.readers.drain(..) {
            let _ = reader.await;
        }
        self.sink.record_exit(&self.tag, None);
    }
}
