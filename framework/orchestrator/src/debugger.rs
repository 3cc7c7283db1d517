use std::path::Path;

use serde::Serialize;

use crate::invocation::Invocation;

/// Declarative request handed to the host debugger facility.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DebugDescriptor {
    Launch(LaunchDescriptor),
    Attach(AttachDescriptor),
}

/// Launch request for the unprivileged debug path; the host debugger starts the process
/// itself, so no bridge is involved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub request: String,
    pub name: String,
    pub cwd: String,
    pub python: String,
    pub console: String,
    #[serde(rename = "justMyCode")]
    pub just_my_code: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    pub args: Vec<String>,
}

impl LaunchDescriptor {
    pub fn for_invocation(
        name: &str,
        base_path: &Path,
        interpreter: &Path,
        invocation: &Invocation,
        extra_flags: &[String],
    ) -> Self {
        let (program, module, args) = match invocation {
            Invocation::Program { path, args } => {
                (Some(path.display().to_string()), None, args.clone())
            }
            Invocation::Module { name, args } => (None, Some(name.clone()), args.clone()),
        };
        let mut args = args;
        args.extend(extra_flags.iter().cloned());
        Self {
            kind: "python".to_string(),
            request: "launch".to_string(),
            name: name.to_string(),
            cwd: base_path.display().to_string(),
            python: interpreter.display().to_string(),
            console: "integratedTerminal".to_string(),
            just_my_code: false,
            program,
            module,
            args,
        }
    }
}

/// Attach request for the elevated debug path, pointing the host debugger at the bridge's
/// loopback listener. The debuggee runs on the same machine, so the path mapping maps the
/// base path to itself on both sides.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub request: String,
    pub name: String,
    pub connect: ConnectAddress,
    #[serde(rename = "pathMappings")]
    pub path_mappings: Vec<PathMapping>,
    #[serde(rename = "justMyCode")]
    pub just_my_code: bool,
}

impl AttachDescriptor {
    pub fn for_bridge(name: &str, base_path: &Path, port: u16) -> Self {
        Self {
            kind: "python".to_string(),
            request: "attach".to_string(),
            name: name.to_string(),
            connect: ConnectAddress {
                host: "127.0.0.1".to_string(),
                port,
            },
            path_mappings: vec![PathMapping {
                local_root: base_path.display().to_string(),
                remote_root: base_path.display().to_string(),
            }],
            just_my_code: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectAddress {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathMapping {
    #[serde(rename = "localRoot")]
    pub local_root: String,
    #[serde(rename = "remoteRoot")]
    pub remote_root: String,
}

/// Host debugger facility. Starts a debugging session from a descriptor and reports
/// success or failure only.
pub trait Debugger: Send + Sync {
    fn start(&self, descriptor: &DebugDescriptor) -> bool;
}
