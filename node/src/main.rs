// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Crossvault Devnet Node
//!
//! Entry point for the `crossvault-node` binary. Parses CLI arguments,
//! initializes logging and metrics, then plays a scenario against an
//! in-memory multi-chain network and prints the resulting vault state.
//!
//! The binary supports three subcommands:
//!
//! - `run`: play a scenario file
//! - `init`: write a sample scenario
//! - `version`: print build version information

mod cli;
mod logging;
mod metrics;
mod scenario;

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use cli::{Commands, CrossvaultNodeCli};
use logging::LogFormat;
use metrics::NodeMetrics;
use scenario::{Devnet, Scenario};

const DEFAULT_LOG_FILTER: &str = "crossvault_node=info,crossvault_contracts=info,crossvault_protocol=warn";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CrossvaultNodeCli::parse();

    match cli.command {
        Commands::Run(args) => run_scenario(args, cli.log_format).await,
        Commands::Init(args) => init_scenario(args, cli.log_format),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Deploys the scenario's devnet and plays its steps in order. Ctrl+C stops
/// between steps and still reports.
async fn run_scenario(args: cli::RunArgs, format: LogFormat) -> Result<()> {
    logging::init_logging(DEFAULT_LOG_FILTER, format);

    let text = tokio::fs::read_to_string(&args.scenario)
        .await
        .with_context(|| format!("failed to read scenario {}", args.scenario.display()))?;
    let scenario = Scenario::from_json(&text)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;

    tracing::info!(
        scenario = %args.scenario.display(),
        chains = scenario.chains.len(),
        steps = scenario.steps.len(),
        started_at = %chrono::Utc::now().to_rfc3339(),
        "starting crossvault-node"
    );

    let metrics = NodeMetrics::new().context("failed to register metrics")?;
    let mut devnet = Devnet::deploy(&scenario).context("failed to deploy devnet")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut failed = 0usize;

    for (index, step) in scenario.steps.iter().enumerate() {
        if args.step_delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(args.step_delay_ms)) => {}
                _ = &mut shutdown => {
                    tracing::info!(step = index, "shutdown signal received, stopping");
                    break;
                }
            }
        }

        let started = Instant::now();
        let result = devnet.apply(step);
        metrics.step_duration_seconds.observe(started.elapsed().as_secs_f64());
        metrics.record_step(step.name(), result.is_ok());

        match result {
            Ok(()) => tracing::info!(step = index, action = step.name(), "step applied"),
            Err(e) => {
                failed += 1;
                tracing::warn!(step = index, action = step.name(), error = %format!("{e:#}"), "step failed");
                if args.fail_fast {
                    return Err(e.context(format!("step {index} ({}) failed", step.name())));
                }
            }
        }

        let net = devnet.network();
        let relayer = net.relayer();
        metrics.observe_relay(
            &net.stats(),
            relayer.stored_payloads().len(),
            relayer.stored_transfers().len(),
        );
        metrics.chain_time_seconds.set(net.now() as i64);
    }

    let report = devnet.report()?;
    metrics
        .holdings_opened_total
        .inc_by(report.holdings.len() as u64);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = &args.metrics_out {
        let text = metrics.encode().context("failed to encode metrics")?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
        tracing::info!(path = %path.display(), "metrics written");
    }

    tracing::info!(failed, "crossvault-node finished");
    Ok(())
}

/// Writes the sample scenario.
fn init_scenario(args: cli::InitArgs, format: LogFormat) -> Result<()> {
    logging::init_logging("crossvault_node=info", format);

    if args.out.exists() && !args.force {
        anyhow::bail!("{} already exists (pass --force to overwrite)", args.out.display());
    }
    let text = serde_json::to_string_pretty(&Scenario::sample())?;
    std::fs::write(&args.out, text)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    tracing::info!(path = %args.out.display(), "sample scenario written");
    println!("Scenario written to {}", args.out.display());
    println!("Run it with: crossvault-node run --scenario {}", args.out.display());
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("crossvault-node {}", env!("CARGO_PKG_VERSION"));
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed that signal is never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
