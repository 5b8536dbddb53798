//! edgesync - incremental artifact sync for edge devices
//!
//! Pushes build artifacts to a device over SSH, uploading only what
//! changed, then runs an ordered plan of remote steps.

#![forbid(unsafe_code)]

mod commands;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgesync_common::{EdgeSyncConfig, LogConfig, SshSession, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "edgesync")]
#[command(author, version, about = "Incremental artifact sync for edge devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Manifest path (default: ./edgesync.toml or $EDGESYNC_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON on stdout
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync a single file to the device
    Sync {
        /// Local file
        local: PathBuf,

        /// Remote path; relative paths land under remote_base, a trailing
        /// `/` keeps the local file name
        remote: String,

        /// Trust matching sizes without comparing digests
        #[arg(long)]
        no_verify: bool,
    },

    /// Sync packages and artifacts from the manifest, then run its steps
    Deploy {
        /// Only sync; do not run the `[[step]]` plan
        #[arg(long)]
        skip_steps: bool,
    },

    /// Run one command on the device and print its output
    Run {
        /// Working directory (default: remote_base)
        #[arg(short, long)]
        workdir: Option<String>,

        /// Extract timings from stdout
        #[arg(long)]
        timing: bool,

        /// Command and arguments, passed to the remote shell as one line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Check connectivity and free space, optionally locating a file
    Probe {
        /// File name to search for
        #[arg(long)]
        name: Option<String>,

        /// Directory to search under (repeatable; default: remote_base)
        #[arg(long = "root")]
        roots: Vec<String>,
    },

    /// Download a file from the device
    Fetch {
        /// Remote path; relative paths resolve against remote_base
        remote: String,

        /// Local destination
        local: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = EdgeSyncConfig::load(cli.config.as_deref());

    let mut log_config = match &config {
        Ok(config) => config.log_config(),
        Err(_) => LogConfig::from_env("info"),
    }
    .with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    let _logging_guards = init_logging(&log_config)?;

    let config = config.context("failed to load configuration")?;
    debug!(host = %config.device.host, base = %config.device.remote_base, "configuration loaded");

    let mut session = SshSession::connect(&config.device)
        .await
        .with_context(|| format!("could not reach {}", config.device.destination()))?;

    let result = dispatch(cli.command, &mut session, &config, cli.json).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "failed to close SSH session cleanly");
    }

    let succeeded = result?;
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Run one subcommand. `Ok(false)` means it ran but something failed.
async fn dispatch(
    command: Commands,
    session: &mut SshSession,
    config: &EdgeSyncConfig,
    json: bool,
) -> Result<bool> {
    match command {
        Commands::Sync {
            local,
            remote,
            no_verify,
        } => commands::sync::run(session, config, &local, &remote, no_verify, json).await,
        Commands::Deploy { skip_steps } => commands::deploy::run(session, config, skip_steps, json).await,
        Commands::Run {
            workdir,
            timing,
            command,
        } => commands::run::run(session, config, workdir, timing, &command, json).await,
        Commands::Probe { name, roots } => {
            commands::probe::run(session, config, name.as_deref(), &roots, json).await
        }
        Commands::Fetch { remote, local } => {
            commands::fetch::run(session, config, &remote, &local, json).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_collects_trailing_args() {
        let cli = Cli::try_parse_from(["edgesync", "run", "-w", "/tmp", "./bench", "--iters", "10"]).unwrap();
        match cli.command {
            Commands::Run {
                workdir, command, ..
            } => {
                assert_eq!(workdir.as_deref(), Some("/tmp"));
                assert_eq!(command, vec!["./bench", "--iters", "10"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["edgesync", "deploy", "--skip-steps", "--json", "-v"]).unwrap();
        assert!(cli.json);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Deploy { skip_steps: true }));
    }

    #[test]
    fn test_probe_roots_repeat() {
        let cli = Cli::try_parse_from([
            "edgesync", "probe", "--name", "libQnnHtp.so", "--root", "/opt", "--root", "/usr/lib",
        ])
        .unwrap();
        match cli.command {
            Commands::Probe { name, roots } => {
                assert_eq!(name.as_deref(), Some("libQnnHtp.so"));
                assert_eq!(roots, vec!["/opt", "/usr/lib"]);
            }
            _ => panic!("expected probe"),
        }
    }
}
