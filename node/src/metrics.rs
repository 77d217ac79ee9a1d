//! # Prometheus Metrics
//!
//! Counters for scenario progress and the relayer, plus gauges for the
//! parent vault's headline numbers. Everything lives in a dedicated
//! [`prometheus::Registry`] under the `crossvault` namespace and is dumped in
//! text exposition format at the end of a run.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

use crossvault_protocol::relay::RelayStats;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Steps executed, labelled by action and outcome.
    pub steps_total: IntCounterVec,
    /// Wall-clock time spent executing one step, in seconds.
    pub step_duration_seconds: Histogram,
    pub packets_sent: IntGauge,
    pub packets_delivered: IntGauge,
    pub packets_failed: IntGauge,
    pub packets_retried: IntGauge,
    pub transfers_sent: IntGauge,
    pub transfers_settled: IntGauge,
    pub transfers_failed: IntGauge,
    /// Bridge transfers waiting for a retry.
    pub stored_transfers: IntGauge,
    /// Payloads currently parked on a blocked lane.
    pub stored_payloads: IntGauge,
    /// Simulated chain time, unix seconds.
    pub chain_time_seconds: IntGauge,
    /// Holdings opened on the parent vault.
    pub holdings_opened_total: IntCounter,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("crossvault".into()), None)?;

        let steps_total = IntCounterVec::new(
            Opts::new("scenario_steps_total", "Scenario steps executed"),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(steps_total.clone()))?;

        let step_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "scenario_step_duration_seconds",
                "Wall-clock time spent executing one scenario step",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        registry.register(Box::new(step_duration_seconds.clone()))?;

        let gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let g = IntGauge::new(name, help)?;
            registry.register(Box::new(g.clone()))?;
            Ok(g)
        };
        let packets_sent = gauge("relay_packets_sent", "Packets accepted by the relayer")?;
        let packets_delivered = gauge("relay_packets_delivered", "Packets executed on their destination")?;
        let packets_failed = gauge("relay_packets_failed", "Packets whose handler failed and were stored")?;
        let packets_retried = gauge("relay_packets_retried", "Stored packets retried")?;
        let transfers_sent = gauge("relay_transfers_sent", "Bridge transfers accepted by the router")?;
        let transfers_settled = gauge("relay_transfers_settled", "Bridge transfers paid out on their destination")?;
        let transfers_failed = gauge("relay_transfers_failed", "Bridge transfers refused by their destination")?;
        let stored_transfers = gauge("relay_stored_transfers", "Bridge transfers waiting for a retry")?;
        let stored_payloads = gauge("relay_stored_payloads", "Payloads blocking a lane")?;
        let chain_time_seconds = gauge("chain_time_seconds", "Simulated chain time")?;

        let holdings_opened_total =
            IntCounter::new("holdings_opened_total", "Holdings opened on the parent vault")?;
        registry.register(Box::new(holdings_opened_total.clone()))?;

        Ok(Self {
            registry,
            steps_total,
            step_duration_seconds,
            packets_sent,
            packets_delivered,
            packets_failed,
            packets_retried,
            transfers_sent,
            transfers_settled,
            transfers_failed,
            stored_transfers,
            stored_payloads,
            chain_time_seconds,
            holdings_opened_total,
        })
    }

    pub fn record_step(&self, action: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "failed" };
        self.steps_total.with_label_values(&[action, outcome]).inc();
    }

    /// Mirrors the relayer's counters.
    pub fn observe_relay(&self, stats: &RelayStats, stored: usize, stored_transfers: usize) {
        self.packets_sent.set(stats.packets_sent as i64);
        self.packets_delivered.set(stats.packets_delivered as i64);
        self.packets_failed.set(stats.packets_failed as i64);
        self.packets_retried.set(stats.packets_retried as i64);
        self.transfers_sent.set(stats.transfers_sent as i64);
        self.transfers_settled.set(stats.transfers_settled as i64);
        self.transfers_failed.set(stats.transfers_failed as i64);
        self.stored_transfers.set(stored_transfers as i64);
        self.stored_payloads.set(stored as i64);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_counters_are_exported() {
        let metrics = NodeMetrics::new().unwrap();
        let stats = RelayStats {
            packets_sent: 7,
            packets_delivered: 6,
            packets_failed: 1,
            ..RelayStats::default()
        };
        metrics.observe_relay(&stats, 1, 0);
        metrics.record_step("deposit", true);
        metrics.record_step("deposit", false);

        let text = metrics.encode().unwrap();
        assert!(text.contains("crossvault_relay_packets_sent 7"));
        assert!(text.contains("crossvault_relay_stored_payloads 1"));
        assert!(text.contains("crossvault_relay_stored_transfers 0"));
        assert!(text.contains(r#"crossvault_scenario_steps_total{action="deposit",outcome="failed"} 1"#));
    }
}
