use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use scenario_pilot_core::prelude::LogSink;
use scenario_pilot_orchestrator::prelude::*;

#[derive(Parser)]
#[command(about, long_about = None)]
struct Cli {
    /// Path to the profile JSON file describing the scenario workspace.
    #[clap(short, long)]
    profile: PathBuf,

    /// Append run output to this file instead of standard output.
    #[clap(long)]
    log_file: Option<PathBuf>,

    /// Extra flags appended to every run's arguments, tokenized like the run template.
    #[clap(long)]
    extra_flags: Option<String>,

    /// Seconds to wait for the debug bridge to accept connections before giving up.
    #[clap(long, default_value = "10")]
    bridge_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario in the foreground and wait for it to finish.
    Run { scenario: PathBuf },
    /// Run a scenario under the host debugger.
    Debug { scenario: PathBuf },
    /// Start a scenario as a named detached session.
    Detached { scenario: PathBuf },
    /// Flip the per-scenario elevation flag.
    ToggleElevated { scenario: PathBuf },
    /// Print the most recently produced run across all scenarios.
    LastRun,
}

/// Reads the elevation password from standard input.
struct StdinSecretPrompt;

impl SecretPrompt for StdinSecretPrompt {
    fn request_secret(&self, message: &str) -> Option<String> {
        eprint!("{message}: ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

/// Asks on standard input before installing anything into the interpreter environment.
struct StdinInstallConsent;

impl InstallConsent for StdinInstallConsent {
    fn approve_install(&self, package: &str) -> bool {
        eprint!("The '{package}' module is required but not installed. Install it now? [y/N] ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

/// Prints the descriptor as JSON for an editor wrapper to pick up. A real host would
/// start a debugging session from it; success here only means the hand-off happened.
struct DescriptorPrinter;

impl Debugger for DescriptorPrinter {
    fn start(&self, descriptor: &DebugDescriptor) -> bool {
        match serde_json::to_string_pretty(descriptor) {
            Ok(json) => {
                println!("{json}");
                true
            }
            Err(e) => {
                log::error!("Failed to serialize the debug descriptor: {e}");
                false
            }
        }
    }
}

fn load_profile(path: &PathBuf) -> anyhow::Result<Profile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read profile {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse profile {}", path.display()))
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let profile = load_profile(&cli.profile)?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    runtime.block_on(async move {
        let sink = match &cli.log_file {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file {}", path.display()))?;
                LogSink::new(file)
            }
            None => LogSink::stdout(),
        };

        let store = FileEligibilityStore::load(
            profile.base_path.join(".scenario-pilot").join("elevated.json"),
        )?;
        // Detached children must not depend on this process's pipes: once the command
        // below returns, the CLI exits and a piped child would die on its next write.
        // They append straight to the log file instead, or run silently without one.
        let detached_output = match &cli.log_file {
            Some(path) => LaunchOutput::File(path.clone()),
            None => LaunchOutput::Null,
        };
        let orchestrator = Orchestrator::new(
            profile,
            sink.clone(),
            Arc::new(store),
            Arc::new(StdinSecretPrompt),
            Arc::new(StdinInstallConsent),
            Arc::new(DescriptorPrinter),
        )
        .with_bridge_config(BridgeConfig {
            ready_timeout: std::time::Duration::from_secs(cli.bridge_timeout),
            ..BridgeConfig::default()
        })
        .with_detached_output(detached_output);

        // Ctrl-C cancels whatever the current run is waiting on, e.g. the debug bridge
        // readiness poll, which kills the partially started child.
        let cancel = orchestrator.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });

        if let Some(flags) = &cli.extra_flags {
            orchestrator.set_global_extra_flags(flags);
        }

        match cli.command {
            Command::Run { scenario } => orchestrator.run(&scenario).await?,
            Command::Debug { scenario } => orchestrator.run_with_debugger(&scenario).await?,
            Command::Detached { scenario } => {
                let name = orchestrator.run_in_detached_session(&scenario).await?;
                println!("{name}");
            }
            Command::ToggleElevated { scenario } => {
                let elevated = orchestrator.toggle_elevated(&scenario)?;
                println!(
                    "{}",
                    if elevated { "elevated" } else { "not elevated" }
                );
            }
            Command::LastRun => match orchestrator.refresh_last_execution() {
                Some(info) => {
                    println!(
                        "{} / {} ({} ms)",
                        info.scenario_name,
                        info.run_name.as_deref().unwrap_or("-"),
                        info.timestamp_ms
                    );
                }
                None => println!("no runs found"),
            },
        }

        sink.synced().await;
        Ok(())
    })
}
