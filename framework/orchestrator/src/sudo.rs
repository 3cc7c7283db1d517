use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Per-scenario elevation flags, persisted outside the orchestrator. The orchestrator only
/// reads and clears them.
pub trait SudoEligibilityStore: Send + Sync {
    fn is_elevated(&self, scenario_name: &str) -> bool;
    fn set_elevated(&self, scenario_name: &str, elevated: bool) -> anyhow::Result<()>;
}

/// Asks the user for a secret. `None` means the prompt was cancelled.
pub trait SecretPrompt: Send + Sync {
    fn request_secret(&self, message: &str) -> Option<String>;
}

/// Prepend the elevation tool to an argument vector. The original command is passed as
/// arguments, never joined into a shell string, and `-n` keeps the tool non-interactive so
/// no second prompt can appear mid-run.
pub fn elevated_argv(program: &str, args: &[String]) -> (String, Vec<String>) {
    let mut wrapped = vec!["-n".to_string(), program.to_string()];
    wrapped.extend(args.iter().cloned());
    ("sudo".to_string(), wrapped)
}

/// Decides whether a run proceeds elevated and obtains a usable elevation session.
///
/// There is intentionally no in-process session cache: the probe/prompt/validate sequence
/// repeats on every run so a revoked session is never silently reused. The OS elevation
/// tool's own short-lived timestamp cache is what makes the common case non-interactive.
#[derive(Debug)]
pub struct ElevationManager {
    platform_supported: bool,
    tool: PathBuf,
}

impl Default for ElevationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ElevationManager {
    pub fn new() -> Self {
        Self {
            platform_supported: cfg!(unix),
            tool: PathBuf::from("sudo"),
        }
    }

    /// Override platform support, so the downgrade path is testable on any host.
    pub fn with_support(platform_supported: bool) -> Self {
        Self {
            platform_supported,
            ..Self::new()
        }
    }

    /// Override the elevation tool binary, so the prompt and validation paths are testable
    /// without a real `sudo`.
    pub fn with_tool(mut self, tool: PathBuf) -> Self {
        self.tool = tool;
        self
    }

    /// Resolve whether the run for `scenario_name` should be elevated.
    ///
    /// Returns `Ok(false)` when the scenario is not flagged, or when the flag is set on a
    /// platform without an elevation mechanism; in the latter case the flag is durably
    /// cleared and the run proceeds unprivileged with a warning. Returns `Ok(true)` once a
    /// non-interactive elevation session is known to be usable.
    pub async fn prepare(
        &self,
        scenario_name: &str,
        store: &dyn SudoEligibilityStore,
        prompt: &dyn SecretPrompt,
    ) -> OrchestratorResult<bool> {
        if !store.is_elevated(scenario_name) {
            return Ok(false);
        }

        if !self.platform_supported {
            log::warn!(
                "Elevation is not supported on this platform; \
                 clearing the elevated flag for '{scenario_name}' and running unprivileged"
            );
            if let Err(e) = store.set_elevated(scenario_name, false) {
                log::error!("Failed to clear the elevated flag for '{scenario_name}': {e:#}");
            }
            return Ok(false);
        }

        if self.probe_session().await? {
            return Ok(true);
        }

        let secret = prompt
            .request_secret("Elevation password required to run this scenario")
            .ok_or_else(|| {
                OrchestratorError::Authentication("Password prompt was cancelled".to_string())
            })?;
        self.validate(&secret).await?;
        Ok(true)
    }

    /// Probe for an existing non-interactive elevation session with `sudo -n -v`.
    async fn probe_session(&self) -> OrchestratorResult<bool> {
        let status = Command::new(&self.tool)
            .args(["-n", "-v"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                OrchestratorError::Environment(format!("Failed to run the elevation tool: {e}"))
            })?;
        Ok(status.success())
    }

    /// Validate the secret by piping it to `sudo -S -v` on standard input.
    async fn validate(&self, secret: &str) -> OrchestratorResult<()> {
        let mut child = Command::new(&self.tool)
            .args(["-S", "-v"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                OrchestratorError::Environment(format!("Failed to run the elevation tool: {e}"))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let line = format!("{secret}\n");
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                log::debug!("Could not write the secret to the elevation tool: {e}");
            }
        }

        let status = child.wait().await.map_err(|e| {
            OrchestratorError::Environment(format!("Failed to wait for the elevation tool: {e}"))
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(OrchestratorError::Authentication(
                "The elevation tool rejected the password".to_string(),
            ))
        }
    }
}

/// JSON-file backed eligibility store, used by the CLI front end.
#[derive(Debug)]
pub struct FileEligibilityStore {
    path: PathBuf,
    flags: Mutex<HashMap<String, bool>>,
}

impl FileEligibilityStore {
    pub fn load(path: PathBuf) -> anyhow::Result<Self> {
        let flags = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            flags: Mutex::new(flags),
        })
    }

    fn persist(&self, flags: &HashMap<String, bool>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let raw = serde_json::to_string_pretty(flags)?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl SudoEligibilityStore for FileEligibilityStore {
    fn is_elevated(&self, scenario_name: &str) -> bool {
        self.flags
            .lock()
            .get(scenario_name)
            .copied()
            .unwrap_or(false)
    }

    fn set_elevated(&self, scenario_name: &str, elevated: bool) -> anyhow::Result<()> {
        let mut flags = self.flags.lock();
        if elevated {
            flags.insert(scenario_name.to_string(), true);
        } else {
            flags.remove(scenario_name);
        }
        self.persist(&flags)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    struct FixedFlag(AtomicBool);

    impl SudoEligibilityStore for FixedFlag {
        fn is_elevated(&self, _scenario_name: &str) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn set_elevated(&self, _scenario_name: &str, elevated: bool) -> anyhow::Result<()> {
            self.0.store(elevated, Ordering::SeqCst);
            Ok(())
        }
    }

    struct NeverPrompt;

    impl SecretPrompt for NeverPrompt {
        fn request_secret(&self, _message: &str) -> Option<String> {
            panic!("The prompt must not be reached in these tests");
        }
    }

    struct CancelledPrompt;

    impl SecretPrompt for CancelledPrompt {
        fn request_secret(&self, _message: &str) -> Option<String> {
            None
        }
    }

    struct FixedSecret(&'static str);

    impl SecretPrompt for FixedSecret {
        fn request_secret(&self, _message: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    /// A stand-in elevation tool: `-n` always fails (no cached session), `-S` accepts
    /// exactly the password "hunter2" on stdin.
    #[cfg(unix)]
    fn fake_tool(dir: &std::path::Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-sudo");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             case \"$1\" in\n\
             -n) exit 1 ;;\n\
             -S)\n\
               read -r secret\n\
               if [ \"$secret\" = \"hunter2\" ]; then exit 0; else exit 1; fi\n\
               ;;\n\
             esac\n\
             exit 1\n",
        )
        .unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn unflagged_scenario_runs_unprivileged() {
        let store = FixedFlag(AtomicBool::new(false));
        let manager = ElevationManager::with_support(true);
        let elevated = manager
            .prepare("run1", &store, &NeverPrompt)
            .await
            .unwrap();
        assert!(!elevated);
    }

    #[tokio::test]
    async fn unsupported_platform_clears_the_flag_and_downgrades() {
        let store = FixedFlag(AtomicBool::new(true));
        let manager = ElevationManager::with_support(false);

        let elevated = manager
            .prepare("run1", &store, &NeverPrompt)
            .await
            .unwrap();

        assert!(!elevated, "the run must still proceed, unprivileged");
        assert!(!store.is_elevated("run1"), "the flag must be durably cleared");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancelled_prompt_is_an_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixedFlag(AtomicBool::new(true));
        let manager = ElevationManager::with_support(true).with_tool(fake_tool(dir.path()));

        let err = manager
            .prepare("run1", &store, &CancelledPrompt)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Authentication(_)));
        assert!(store.is_elevated("run1"), "the flag must stay set");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn rejected_password_is_an_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixedFlag(AtomicBool::new(true));
        let manager = ElevationManager::with_support(true).with_tool(fake_tool(dir.path()));

        let err = manager
            .prepare("run1", &store, &FixedSecret("wrong"))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Authentication(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn accepted_password_elevates_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = FixedFlag(AtomicBool::new(true));
        let manager = ElevationManager::with_support(true).with_tool(fake_tool(dir.path()));

        let elevated = manager
            .prepare("run1", &store, &FixedSecret("hunter2"))
            .await
            .unwrap();

        assert!(elevated);
    }

    #[test]
    fn elevated_argv_keeps_the_command_as_a_vector() {
        let (program, args) = elevated_argv(
            "/usr/bin/python3",
            &["run1.py".to_string(), "--flag".to_string()],
        );
        assert_eq!(program, "sudo");
        assert_eq!(args, vec!["-n", "/usr/bin/python3", "run1.py", "--flag"]);
    }

    #[test]
    fn file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("elevated.json");

        let store = FileEligibilityStore::load(path.clone()).unwrap();
        assert!(!store.is_elevated("run1"));
        store.set_elevated("run1", true).unwrap();

        let reloaded = FileEligibilityStore::load(path).unwrap();
        assert!(reloaded.is_elevated("run1"));
        assert!(!reloaded.is_elevated("run2"));
    }
}
