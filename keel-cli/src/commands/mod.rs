//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod display;
mod init;
mod local;
mod remote;

pub use init::InitCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;
use crate::types::EventArgs;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a pipeline locally for an event
    Run {
        /// Pipeline definition file
        pipeline: PathBuf,

        #[command(flatten)]
        event: EventArgs,

        /// Run every job even if the triggers do not match
        #[arg(long)]
        force: bool,

        /// Secret store file (overrides KEEL_SECRETS_FILE)
        #[arg(long)]
        secrets: Option<PathBuf>,

        /// Directory of Lua actions (overrides KEEL_ACTIONS_DIR)
        #[arg(long)]
        actions_dir: Option<PathBuf>,

        /// Keep job workspaces after the run
        #[arg(long)]
        keep_workspace: bool,
    },
    /// Validate a pipeline definition and print a summary
    Check {
        /// Pipeline definition file
        pipeline: PathBuf,
    },
    /// Show which jobs an event would start; exits 1 when nothing matches
    Match {
        /// Pipeline definition file
        pipeline: PathBuf,

        #[command(flatten)]
        event: EventArgs,
    },
    /// Submit an event to the server
    Submit {
        #[command(flatten)]
        event: EventArgs,
    },
    /// Show a run from the server
    Status {
        /// Run ID or unambiguous prefix
        id: String,

        /// Also print job logs
        #[arg(short, long)]
        logs: bool,
    },
    /// Cancel a running run on the server
    Cancel {
        /// Run ID or unambiguous prefix
        id: String,
    },
    /// List runs on the server
    Runs {
        /// Only runs of this pipeline
        #[arg(short, long)]
        pipeline: Option<String>,
    },
    /// Initialize development environment
    Init {
        #[command(subcommand)]
        command: InitCommands,
    },
}

/// Handle a CLI command
///
/// Returns the process exit code.
pub async fn handle_command(command: Commands, config: &Config) -> Result<i32> {
    match command {
        Commands::Run {
            pipeline,
            event,
            force,
            secrets,
            actions_dir,
            keep_workspace,
        } => {
            let options = local::RunOptions {
                force,
                secrets,
                actions_dir,
                keep_workspace,
            };
            local::run_pipeline(&pipeline, &event, options).await
        }
        Commands::Check { pipeline } => local::check_pipeline(&pipeline),
        Commands::Match { pipeline, event } => local::match_pipeline(&pipeline, &event),
        Commands::Submit { event } => remote::submit_event(config, &event).await,
        Commands::Status { id, logs } => remote::show_run(config, &id, logs).await,
        Commands::Cancel { id } => remote::cancel_run(config, &id).await,
        Commands::Runs { pipeline } => remote::list_runs(config, pipeline.as_deref()).await,
        Commands::Init { command } => init::handle_init_command(command).map(|_| 0),
    }
}
