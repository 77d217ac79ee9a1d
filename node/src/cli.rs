//! # CLI Interface
//!
//! Defines the command-line argument structure for `crossvault-node` using
//! `clap` derive. Supports three subcommands: `run`, `init` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// Crossvault devnet node.
///
/// Spins up an in-memory multi-chain network, deploys a parent vault and
/// plays a JSON scenario of investor, manager and relayer actions against
/// it, then reports the final vault state and relay metrics.
#[derive(Parser, Debug)]
#[command(
    name = "crossvault-node",
    about = "Crossvault multi-chain vault devnet",
    version,
    propagate_version = true
)]
pub struct CrossvaultNodeCli {
    /// Log output format.
    #[arg(long, global = true, env = "CROSSVAULT_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Play a scenario file against a fresh local network.
    Run(RunArgs),
    /// Write a sample scenario to get started with.
    Init(InitArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the scenario file (JSON).
    #[arg(long, short = 's', env = "CROSSVAULT_SCENARIO")]
    pub scenario: PathBuf,

    /// Pause between steps, in milliseconds. Zero plays the scenario as
    /// fast as possible.
    #[arg(long, env = "CROSSVAULT_STEP_DELAY_MS", default_value_t = 0)]
    pub step_delay_ms: u64,

    /// Abort on the first failing step instead of logging it and moving on.
    #[arg(long)]
    pub fail_fast: bool,

    /// Write the Prometheus text exposition to this file when the run ends.
    #[arg(long, env = "CROSSVAULT_METRICS_OUT")]
    pub metrics_out: Option<PathBuf>,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Where to write the sample scenario.
    #[arg(long, short = 'o', default_value = "scenario.json")]
    pub out: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}
