//! Main CLI application structure

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

use super::commands;
use super::output::{Output, OutputFormat};
use crate::domain::EffortDuration;
use crate::storage::EngineConfig;

#[derive(Parser)]
#[command(name = "plan")]
#[command(author, version, about = "Schedule project plans: constraints, effort allocation, critical path")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the configured one)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./plan.toml, then the user config)
    #[arg(long, global = true, env = "PLAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Enforce all constraints and print the resulting dates
    Schedule {
        /// Plan description (JSON)
        plan: PathBuf,
    },

    /// Print the critical path
    CriticalPath {
        /// Plan description (JSON)
        plan: PathBuf,
    },

    /// Allocate effort to a task's resources
    Allocate {
        /// Plan description (JSON)
        plan: PathBuf,

        /// Task name
        #[arg(long)]
        task: String,

        /// Effort to allocate, e.g. `20`, `20h` or `7h30m`
        #[arg(long)]
        hours: EffortDuration,

        /// Fill backwards from the task end
        #[arg(long)]
        backward: bool,
    },
}

/// Installs the stderr log subscriber
fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = EngineConfig::load(cli.config.as_deref())?;
    let format = cli.format.unwrap_or_else(|| config.default_format.into());
    let output = Output::new(format);
    debug!(?format, "plan starting");

    match cli.command {
        Commands::Schedule { plan } => commands::schedule(&output, &config, &plan)?,
        Commands::CriticalPath { plan } => commands::critical_path(&output, &config, &plan)?,
        Commands::Allocate {
            plan,
            task,
            hours,
            backward,
        } => commands::allocate(&output, &config, &plan, &task, hours, backward)?,
    }

    debug!("command completed");
    Ok(())
}
