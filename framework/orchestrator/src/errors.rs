use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy for the orchestrator. Every variant is terminal for its run and is
/// surfaced to the user; nothing is retried automatically.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Bad or missing run template, or an unresolvable scenario path. The run never starts.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Elevation validation failed or the password prompt was cancelled. The run never starts.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// A required feature is unsupported on this platform, or a required dependency is
    /// missing and could not be installed.
    #[error("Environment error: {0}")]
    Environment(String),

    /// The loopback listener used to reserve an ephemeral port could not be bound.
    #[error("Failed to allocate a loopback port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// The debug bridge did not accept a connection within the readiness bound.
    #[error("Debug bridge was not ready within {0:?}")]
    Timeout(Duration),

    /// Spawning the scenario process failed, or an already-running child could not be
    /// managed. Non-zero scenario exits are not errors; they are reported as warnings.
    #[error("Process error: {0}")]
    Process(String),

    /// The run was cancelled by the user; any partially started child has been killed.
    #[error(transparent)]
    Cancelled(#[from] scenario_pilot_core::prelude::CancelledError),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
