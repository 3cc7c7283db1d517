use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, OrchestratorResult};

/// Configuration supplied by an external collaborator. Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Directory containing the scenario folders; also the working directory for every run.
    pub base_path: PathBuf,
    #[serde(default)]
    pub interpreter: InterpreterStrategy,
    /// Must contain the `<scenario_name>` placeholder.
    pub run_command_template: String,
    /// Name of the output subfolder inside each scenario folder.
    #[serde(default = "default_output_folder_name")]
    pub output_folder_name: String,
}

fn default_output_folder_name() -> String {
    "output".to_string()
}

/// How the interpreter executable for a profile is found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum InterpreterStrategy {
    /// Probe for a virtual environment under the base path, falling back to the system
    /// interpreter on the PATH.
    #[default]
    VirtualEnv,
    /// Use the given executable verbatim.
    Fixed { path: PathBuf },
}

/// Resolve the interpreter executable for a run. The result is treated as an opaque path
/// by everything downstream.
pub fn resolve_interpreter(
    base_path: &Path,
    strategy: &InterpreterStrategy,
) -> OrchestratorResult<PathBuf> {
    match strategy {
        InterpreterStrategy::Fixed { path } => Ok(path.clone()),
        InterpreterStrategy::VirtualEnv => {
            for dir in [".venv", "venv"] {
                let candidate = if cfg!(windows) {
                    base_path.join(dir).join("Scripts").join("python.exe")
                } else {
                    base_path.join(dir).join("bin").join("python")
                };
                if candidate.exists() {
                    log::debug!("Using virtual environment interpreter {}", candidate.display());
                    return Ok(candidate);
                }
            }
            which::which("python3")
                .or_else(|_| which::which("python"))
                .map_err(|e| {
                    OrchestratorError::Environment(format!(
                        "No virtual environment found under {} and no python interpreter on PATH: {e}",
                        base_path.display()
                    ))
                })
        }
    }
}
