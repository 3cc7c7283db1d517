mod debug_bridge;
mod debugger;
mod errors;
mod invocation;
mod last_execution;
mod launcher;
mod orchestrator;
mod profile;
mod session;
mod sudo;
mod tokenizer;

pub mod prelude {
    pub use crate::debug_bridge::{
        allocate_loopback_port, ensure_bridge_module, BridgeConfig, DebugSession, InstallConsent,
        BRIDGE_MODULE,
    };
    pub use crate::debugger::{
        AttachDescriptor, ConnectAddress, DebugDescriptor, Debugger, LaunchDescriptor, PathMapping,
    };
    pub use crate::errors::{OrchestratorError, OrchestratorResult};
    pub use crate::invocation::{
        build_invocation, Invocation, MODULE_FLAG, SCENARIO_NAME_PLACEHOLDER,
    };
    pub use crate::last_execution::{resolve_last_execution, LastExecutionInfo};
    pub use crate::launcher::{launch, LaunchOutput, LaunchSpec, RunningProcess};
    pub use crate::orchestrator::{Orchestrator, RunContext, RunStrategy};
    pub use crate::profile::{resolve_interpreter, InterpreterStrategy, Profile};
    pub use crate::session::{detached_session_name, now_ms};
    pub use crate::sudo::{
        elevated_argv, ElevationManager, FileEligibilityStore, SecretPrompt, SudoEligibilityStore,
    };
    pub use crate::tokenizer::{quote_if_needed, tokenize};
}
