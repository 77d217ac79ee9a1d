//! # CPIT: Cumulative Price Impact Tracker
//!
//! A per-vault circuit breaker. Every impact-relevant trade reports the
//! vault value before and after; the relative loss is accumulated into a
//! 6-hour bucket and the trailing four buckets (24h) must stay under the
//! vault's risk-profile cap. This bounds value leakage per rolling day
//! without needing a stateful fair-value oracle.
//!
//! A failed check leaves the tracker untouched, so the caller can reject
//! the trade without any cleanup.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{self, BIPS, CPIT_WINDOW_BUCKETS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpitError {
    #[error("price impact cap exceeded: window total {window_bips} bips > cap {cap_bips} bips")]
    CapExceeded {
        /// Window total including the rejected trade.
        window_bips: u64,
        cap_bips: u32,
    },
}

/// Rolling-window impact accumulator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CpitTracker {
    /// Bucket index → accumulated deviation in bips.
    buckets: BTreeMap<u64, u64>,
}

impl CpitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative loss between two values in bips. Gains count as zero.
    pub fn impact_bips(value_before: u128, value_after: u128) -> u64 {
        if value_before == 0 || value_after >= value_before {
            return 0;
        }
        let loss = value_before - value_after;
        // loss < value_before, so the quotient is < BIPS and fits.
        crate::math::mul_div(loss, BIPS, value_before).unwrap_or(BIPS) as u64
    }

    /// Sum of the trailing window ending at the bucket containing `now`.
    pub fn window_impact(&self, now: u64) -> u64 {
        let current = config::cpit_bucket(now);
        let first = current.saturating_sub(CPIT_WINDOW_BUCKETS - 1);
        self.buckets.range(first..=current).map(|(_, v)| *v).sum()
    }

    /// Records a trade. Fails without mutating if the window total would
    /// exceed `cap_bips`.
    pub fn record_trade(
        &mut self,
        now: u64,
        value_before: u128,
        value_after: u128,
        cap_bips: u32,
    ) -> Result<u64, CpitError> {
        let impact = Self::impact_bips(value_before, value_after);
        let window = self.window_impact(now) + impact;

        if window > cap_bips as u64 {
            return Err(CpitError::CapExceeded {
                window_bips: window,
                cap_bips,
            });
        }

        if impact > 0 {
            let bucket = config::cpit_bucket(now);
            *self.buckets.entry(bucket).or_insert(0) += impact;
            self.prune(bucket);
            debug!(impact, window, cap_bips, "cpit trade recorded");
        }

        Ok(impact)
    }

    fn prune(&mut self, current: u64) {
        let first = current.saturating_sub(CPIT_WINDOW_BUCKETS - 1);
        self.buckets = self.buckets.split_off(&first);
    }
}
