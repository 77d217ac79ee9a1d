//! # Logging
//!
//! Scenario runs log every step and every reverted transaction through
//! `tracing`. This module installs the subscriber: an `EnvFilter` seeded
//! with per-crate defaults, writing to stderr. The JSON report on stdout
//! can then be piped to `jq` untouched.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Colored single lines for a terminal.
    Pretty,
    /// One JSON object per line, for CI artifacts.
    Json,
}

/// Installs the global subscriber for this process.
///
/// `default_directives` applies only when `RUST_LOG` is unset. To trace
/// the vault state machines and the relayer while replaying a scenario:
///
/// ```text
/// RUST_LOG=crossvault_contracts=debug,crossvault_protocol=debug crossvault-node run -s devnet.json
/// ```
pub fn init_logging(default_directives: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    tracing::debug!(?format, directives = default_directives, "logging ready");
}
