use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use scenario_pilot_core::prelude::{CancelHandle, LogSink};
use tokio::sync::watch;

use crate::debug_bridge::{
    allocate_loopback_port, ensure_bridge_module, BridgeConfig, DebugSession, InstallConsent,
    BRIDGE_MODULE,
};
use crate::debugger::{AttachDescriptor, DebugDescriptor, Debugger, LaunchDescriptor};
use crate::errors::{OrchestratorError, OrchestratorResult};
use crate::invocation::{build_invocation, Invocation};
use crate::last_execution::{resolve_last_execution, LastExecutionInfo};
use crate::launcher::{launch, LaunchOutput, LaunchSpec, RunningProcess};
use crate::profile::{resolve_interpreter, Profile};
use crate::session::{detached_session_name, now_ms};
use crate::sudo::{elevated_argv, ElevationManager, SecretPrompt, SudoEligibilityStore};
use crate::tokenizer::tokenize;

/// How a run is executed. Chosen once per user action; each arm of the dispatch owns its
/// own resource acquisition and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStrategy {
    /// Foreground run whose exit is awaited.
    Plain,
    /// Run under the host debugger, through the bridge when elevated.
    Debug,
    /// Named long-running session detached from the initiating action.
    Detached,
}

/// Everything resolved for one run. Built fresh per run, owned exclusively by the call
/// that built it, never shared across concurrent runs.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub base_path: PathBuf,
    pub interpreter_path: PathBuf,
    pub scenario_name: String,
    pub invocation: Invocation,
    pub extra_flags: Vec<String>,
    pub use_sudo: bool,
}

/// Turns a declarative run command template into a concrete running process.
///
/// Multiple runs may be in flight concurrently; the only state shared between them is the
/// append-only log sink and the last-execution cache, which is recomputed wholesale and
/// published last-writer-wins through a watch channel.
pub struct Orchestrator {
    profile: Profile,
    sink: LogSink,
    elevation: ElevationManager,
    store: Arc<dyn SudoEligibilityStore>,
    secrets: Arc<dyn SecretPrompt>,
    consent: Arc<dyn InstallConsent>,
    debugger: Arc<dyn Debugger>,
    bridge_config: BridgeConfig,
    detached_output: LaunchOutput,
    extra_flags: Mutex<Vec<String>>,
    cancel: CancelHandle,
    last_execution_tx: watch::Sender<Option<LastExecutionInfo>>,
}

impl Orchestrator {
    pub fn new(
        profile: Profile,
        sink: LogSink,
        store: Arc<dyn SudoEligibilityStore>,
        secrets: Arc<dyn SecretPrompt>,
        consent: Arc<dyn InstallConsent>,
        debugger: Arc<dyn Debugger>,
    ) -> Self {
        Self {
            profile,
            sink,
            elevation: ElevationManager::new(),
            store,
            secrets,
            consent,
            debugger,
            bridge_config: BridgeConfig::default(),
            detached_output: LaunchOutput::Sink,
            extra_flags: Mutex::new(Vec::new()),
            cancel: CancelHandle::new(),
            last_execution_tx: watch::channel(None).0,
        }
    }

    pub fn with_bridge_config(mut self, config: BridgeConfig) -> Self {
        self.bridge_config = config;
        self
    }

    pub fn with_elevation_manager(mut self, elevation: ElevationManager) -> Self {
        self.elevation = elevation;
        self
    }

    /// Where detached children write their output. Short-lived front ends must route it
    /// somewhere that outlives them (a file, or nowhere); the default streams through the
    /// sink and fits a long-lived host.
    pub fn with_detached_output(mut self, output: LaunchOutput) -> Self {
        self.detached_output = output;
        self
    }

    /// Handle used to cancel in-flight debug bridge startup. The handle is shared by every
    /// run this orchestrator starts, so cancelling aborts all in-flight readiness polls.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run the scenario in the foreground and wait for it to finish. A non-zero exit is a
    /// warning, not an error; a failing scenario program is a legitimate outcome.
    pub async fn run(&self, scenario_path: &Path) -> OrchestratorResult<()> {
        let ctx = self.prepare(scenario_path).await?;
        self.dispatch(RunStrategy::Plain, ctx).await.map(|_| ())
    }

    /// Run the scenario under the host debugger. Unprivileged runs are handed straight to
    /// the debugger's launch facility; elevated runs go through the debug bridge.
    pub async fn run_with_debugger(&self, scenario_path: &Path) -> OrchestratorResult<()> {
        let ctx = self.prepare(scenario_path).await?;
        self.dispatch(RunStrategy::Debug, ctx).await.map(|_| ())
    }

    /// Start the scenario as a named detached session and return the session name.
    pub async fn run_in_detached_session(
        &self,
        scenario_path: &Path,
    ) -> OrchestratorResult<String> {
        let ctx = self.prepare(scenario_path).await?;
        let name = self.dispatch(RunStrategy::Detached, ctx).await?;
        name.ok_or_else(|| {
            OrchestratorError::Process("Detached session produced no name".to_string())
        })
    }

    /// Flip the per-scenario elevation flag and return the new value.
    pub fn toggle_elevated(&self, scenario_path: &Path) -> OrchestratorResult<bool> {
        let scenario_name = scenario_name_of(scenario_path)?;
        let elevated = !self.store.is_elevated(&scenario_name);
        self.store
            .set_elevated(&scenario_name, elevated)
            .map_err(|e| {
                OrchestratorError::Environment(format!(
                    "Failed to persist the elevated flag for '{scenario_name}': {e:#}"
                ))
            })?;
        Ok(elevated)
    }

    /// Replace the flags appended to every subsequent run's arguments. The input is
    /// tokenized with the same rules as the run template.
    pub fn set_global_extra_flags(&self, flags: &str) {
        *self.extra_flags.lock() = tokenize(flags);
    }

    /// Change notification for the last-execution cache. Fires on every recomputation,
    /// carrying the new value or `None`.
    pub fn subscribe_last_execution(&self) -> watch::Receiver<Option<LastExecutionInfo>> {
        self.last_execution_tx.subscribe()
    }

    /// Recompute the last-execution cache now and return the result.
    pub fn refresh_last_execution(&self) -> Option<LastExecutionInfo> {
        publish_last_execution(&self.profile, &self.last_execution_tx);
        self.last_execution_tx.borrow().clone()
    }

    async fn prepare(&self, scenario_path: &Path) -> OrchestratorResult<RunContext> {
        if !scenario_path.is_dir() {
            return Err(OrchestratorError::Configuration(format!(
                "Scenario path {} does not exist",
                scenario_path.display()
            )));
        }
        let scenario_name = scenario_name_of(scenario_path)?;
        let interpreter_path =
            resolve_interpreter(&self.profile.base_path, &self.profile.interpreter)?;
        let invocation = build_invocation(
            &self.profile.run_command_template,
            &scenario_name,
            &self.profile.base_path,
        )?;
        let use_sudo = self
            .elevation
            .prepare(&scenario_name, self.store.as_ref(), self.secrets.as_ref())
            .await?;
        Ok(RunContext {
            base_path: self.profile.base_path.clone(),
            interpreter_path,
            scenario_name,
            invocation,
            extra_flags: self.extra_flags.lock().clone(),
            use_sudo,
        })
    }

    async fn dispatch(
        &self,
        strategy: RunStrategy,
        ctx: RunContext,
    ) -> OrchestratorResult<Option<String>> {
        match strategy {
            RunStrategy::Plain => {
                self.run_plain(ctx).await?;
                Ok(None)
            }
            RunStrategy::Debug => {
                self.run_debug(ctx).await?;
                Ok(None)
            }
            RunStrategy::Detached => self.run_detached(ctx).await.map(Some),
        }
    }

    async fn run_plain(&self, ctx: RunContext) -> OrchestratorResult<()> {
        let (program, args) = command_for(&ctx);
        let spec = LaunchSpec {
            program,
            args,
            cwd: ctx.base_path.clone(),
            tag: "run".to_string(),
            detached: false,
            output: LaunchOutput::Sink,
        };
        let process = launch(&spec, &self.sink)?;
        let code = process.wait().await?;
        if code != Some(0) {
            log::warn!(
                "Scenario '{}' exited with code {}",
                ctx.scenario_name,
                code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
            );
        }
        publish_last_execution(&self.profile, &self.last_execution_tx);
        Ok(())
    }

    async fn run_debug(&self, ctx: RunContext) -> OrchestratorResult<()> {
        if !ctx.use_sudo {
            // No bridge needed; the host debugger spawns the process itself.
            let descriptor = DebugDescriptor::Launch(LaunchDescriptor::for_invocation(
                &ctx.scenario_name,
                &ctx.base_path,
                &ctx.interpreter_path,
                &ctx.invocation,
                &ctx.extra_flags,
            ));
            if self.debugger.start(&descriptor) {
                return Ok(());
            }
            return Err(OrchestratorError::Process(format!(
                "Host debugger failed to launch scenario '{}'",
                ctx.scenario_name
            )));
        }

        ensure_bridge_module(&ctx.interpreter_path, self.consent.as_ref()).await?;
        let port = allocate_loopback_port()?;

        let interpreter = ctx.interpreter_path.display().to_string();
        let mut bridge_args = vec![
            "-m".to_string(),
            BRIDGE_MODULE.to_string(),
            "--listen".to_string(),
            format!("127.0.0.1:{port}"),
            "--wait-for-client".to_string(),
        ];
        bridge_args.extend(ctx.invocation.interpreter_args());
        bridge_args.extend(ctx.extra_flags.iter().cloned());
        let (program, args) = elevated_argv(&interpreter, &bridge_args);

        let spec = LaunchSpec {
            program,
            args,
            cwd: ctx.base_path.clone(),
            tag: "debug".to_string(),
            detached: false,
            output: LaunchOutput::Sink,
        };
        let child = launch(&spec, &self.sink)?;

        let mut cancel = self.cancel.new_listener();
        let session = DebugSession::new(port, child)
            .wait_until_ready(&self.bridge_config, &mut cancel)
            .await?;

        let descriptor = DebugDescriptor::Attach(AttachDescriptor::for_bridge(
            &ctx.scenario_name,
            &ctx.base_path,
            session.port,
        ));
        if !self.debugger.start(&descriptor) {
            session.abort().await;
            return Err(OrchestratorError::Process(format!(
                "Host debugger failed to attach to scenario '{}'",
                ctx.scenario_name
            )));
        }

        // The debugger owns the session from here; the exit is observed only for logging
        // and the last-execution refresh.
        self.observe_exit(session.into_child());
        Ok(())
    }

    async fn run_detached(&self, ctx: RunContext) -> OrchestratorResult<String> {
        let name = detached_session_name(&ctx.scenario_name, now_ms());
        let (program, args) = command_for(&ctx);
        let spec = LaunchSpec {
            program,
            args,
            cwd: ctx.base_path.clone(),
            // The session name doubles as the log tag so concurrent detached runs stay
            // distinguishable in the shared sink.
            tag: name.clone(),
            detached: true,
            output: self.detached_output.clone(),
        };
        let process = launch(&spec, &self.sink)?;
        log::info!(
            "Started detached session '{name}' for scenario '{}'",
            ctx.scenario_name
        );
        self.observe_exit(process);
        Ok(name)
    }

    /// Watch a child exit in the background, then refresh the last-execution cache.
    fn observe_exit(&self, process: RunningProcess) {
        let profile = self.profile.clone();
        let tx = self.last_execution_tx.clone();
        tokio::spawn(async move {
            match process.wait().await {
                Ok(Some(0)) => {}
                Ok(Some(code)) => log::warn!("Scenario process exited with code {code}"),
                Ok(None) => log::warn!("Scenario process exited without an exit code"),
                Err(e) => log::error!("{e}"),
            }
            publish_last_execution(&profile, &tx);
        });
    }
}

fn scenario_name_of(scenario_path: &Path) -> OrchestratorResult<String> {
    scenario_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "Scenario path {} has no folder name",
                scenario_path.display()
            ))
        })
}

/// Final argument vector for a run: interpreter, invocation, extra flags, wrapped with the
/// elevation tool when the run is elevated.
fn command_for(ctx: &RunContext) -> (String, Vec<String>) {
    let program = ctx.interpreter_path.display().to_string();
    let mut args = ctx.invocation.interpreter_args();
    args.extend(ctx.extra_flags.iter().cloned());
    if ctx.use_sudo {
        elevated_argv(&program, &args)
    } else {
        (program, args)
    }
}

fn publish_last_execution(
    profile: &Profile,
    tx: &watch::Sender<Option<LastExecutionInfo>>,
) {
    let info = resolve_last_execution(&profile.base_path, &profile.output_folder_name);
    tx.send_replace(info);
}
