//! CLI for the MDM media download orchestrator.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mdm_core::config;
use mdm_core::strategy::DownloadMode;
use mdm_core::task_queue::TaskQueue;

use commands::{run_add, run_clear, run_probe, run_queue, run_remove, run_retry, run_status, AddArgs};

/// Top-level CLI for the MDM media download orchestrator.
#[derive(Debug, Parser)]
#[command(name = "mdm")]
#[command(about = "MDM: network-aware media download orchestrator", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue a media URL for download.
    Add(AddArgs),

    /// Run pending jobs from the queue.
    Run {
        /// Run up to N jobs concurrently (default: max_concurrent_downloads from config).
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Override every job's mode for this run (speed, stable, harsh, auto).
        #[arg(long, value_name = "MODE")]
        mode: Option<DownloadMode>,
    },

    /// Show status of all jobs.
    Status,

    /// Remove a job from the queue by its ID.
    Remove {
        /// Job identifier.
        id: u64,
    },

    /// Put a failed job back into the queue.
    Retry {
        /// Job identifier.
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<u64>,
        /// Retry every failed job that still has retry budget.
        #[arg(long)]
        all: bool,
    },

    /// Remove completed jobs from the queue.
    Clear,

    /// Measure the network and show the strategy automatic mode would pick.
    Probe,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        if let CliCommand::Probe = cli.command {
            return run_probe(&cfg).await;
        }

        let mut queue = TaskQueue::open_default()?;
        match cli.command {
            CliCommand::Add(args) => run_add(&mut queue, &cfg, args)?,
            CliCommand::Run { jobs, mode } => run_queue(queue, &cfg, jobs, mode).await?,
            CliCommand::Status => run_status(&queue),
            CliCommand::Remove { id } => run_remove(&mut queue, id)?,
            CliCommand::Retry { id, all } => run_retry(&mut queue, id, all)?,
            CliCommand::Clear => run_clear(&mut queue)?,
            CliCommand::Probe => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
