//! # Protocol Configuration & Constants
//!
//! Every magic number in Crossvault lives here. Values that operators are
//! expected to tune per deployment (liveliness threshold, deposit caps, CPIT
//! caps) only provide *defaults* here; the live values sit in the
//! [`Registry`](crate::registry::Registry) and the transport configuration.

// ---------------------------------------------------------------------------
// Fixed-Point Scales
// ---------------------------------------------------------------------------

/// Basis-point denominator. 10_000 bips = 100%.
pub const BIPS: u128 = 10_000;

/// Scale of a withdraw *portion*: `portion = shares × PORTION_SCALE / total`.
/// A portion of `PORTION_SCALE` means "everything".
pub const PORTION_SCALE: u128 = 1_000_000_000_000_000_000;

/// Scale of a unit price (value per share). A freshly seeded vault issues
/// shares 1:1 with USD value, so its unit price is exactly this.
pub const UNIT_PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

/// Scale of asset prices fed to the reference valuer: value = balance × price / scale.
pub const PRICE_SCALE: u128 = 1_000_000_000_000_000_000;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

pub const HOUR: u64 = 60 * 60;
pub const DAY: u64 = 24 * HOUR;

/// Streaming fees accrue per second over a 365-day year.
pub const SECONDS_PER_YEAR: u64 = 365 * DAY;

/// Default maximum age of a cached child value before the parent treats
/// it as stale.
pub const DEFAULT_LIVELINESS_THRESHOLD: u64 = 15 * 60;

// ---------------------------------------------------------------------------
// CPIT (Cumulative Price Impact Tracker)
// ---------------------------------------------------------------------------

/// Width of one CPIT bucket.
pub const CPIT_BUCKET_SECS: u64 = 6 * HOUR;

/// Number of trailing buckets summed: 4 × 6h = 24h.
pub const CPIT_WINDOW_BUCKETS: u64 = 4;

/// Default CPIT caps per risk profile, in bips of value lost per rolling day.
pub const DEFAULT_CPIT_CAP_LOW_BIPS: u32 = 100;
pub const DEFAULT_CPIT_CAP_MEDIUM_BIPS: u32 = 300;
pub const DEFAULT_CPIT_CAP_HIGH_BIPS: u32 = 1_000;

// ---------------------------------------------------------------------------
// Holdings & Fees
// ---------------------------------------------------------------------------

/// Holding that receives the manager's share of every levied fee.
pub const MANAGER_HOLDING_ID: u64 = 0;

/// Holding that receives the protocol's share of every levied fee.
pub const PROTOCOL_HOLDING_ID: u64 = 1;

/// First token id handed to an investor.
pub const FIRST_INVESTOR_HOLDING_ID: u64 = 2;

/// Absolute ceiling on the annual streaming fee.
pub const MAX_STREAMING_FEE_BIPS: u32 = 500;

/// Absolute ceiling on the performance fee.
pub const MAX_PERFORMANCE_FEE_BIPS: u32 = 5_000;

/// Largest streaming fee increase a single announcement may carry.
pub const MAX_STREAMING_FEE_STEP_BIPS: u32 = 100;

/// Largest performance fee increase a single announcement may carry.
pub const MAX_PERFORMANCE_FEE_STEP_BIPS: u32 = 1_000;

/// An announced fee increase can only be committed after this long.
pub const FEE_ANNOUNCEMENT_WINDOW: u64 = 30 * DAY;

/// Minimum time between two manager-initiated levies on the same holding.
pub const MANAGER_FEE_LEVY_INTERVAL: u64 = 7 * DAY;

/// Default protocol cut of every manager fee.
pub const DEFAULT_PROTOCOL_FEE_SHARE_BIPS: u32 = 2_000;

// ---------------------------------------------------------------------------
// Deposits
// ---------------------------------------------------------------------------

/// Default cap on a vault's total value (USD, 18 decimals): 1M USD.
pub const DEFAULT_DEPOSIT_LIMIT: u128 = 1_000_000 * UNIT_PRICE_SCALE;

/// Default minimum value of the first deposit into a new holding: 10 USD.
pub const DEFAULT_MIN_DEPOSIT_VALUE: u128 = 10 * UNIT_PRICE_SCALE;

/// Default number of assets a single vault may have enabled at once.
pub const DEFAULT_MAX_ACTIVE_ASSETS: usize = 12;

// ---------------------------------------------------------------------------
// Bridging
// ---------------------------------------------------------------------------

/// Hard slippage floor on bridge transfers: at least 99% must arrive.
pub const BRIDGE_MIN_AMOUNT_OUT_BIPS: u128 = 9_900;

/// Default delay after which anybody may cancel an unused bridge approval.
pub const DEFAULT_BRIDGE_APPROVAL_CANCEL_COOLDOWN: u64 = HOUR;

/// Lockout imposed on the manager after a non-manager cancelled an approval.
pub const MANAGER_BRIDGE_LOCKOUT: u64 = HOUR;

// ---------------------------------------------------------------------------
// Execution Budgets
// ---------------------------------------------------------------------------

/// Fixed cost charged on entry to any inbound handler.
pub const HANDLER_BASE_COST: u64 = 20_000;

/// Cost charged per asset touched by the accountant or a redeemer.
pub const PER_ASSET_COST: u64 = 25_000;

/// A failed valuation with less than this left in the budget is treated as
/// possible exhaustion, so the whole handler fails and the relayer retries.
pub const VALUE_HANDLER_BUDGET_FLOOR: u64 = 40_000;

/// Budget used for purely local work (parent valuing its own assets).
pub const LOCAL_EXECUTION_BUDGET: u64 = u64::MAX;

/// Default destination gas allowance for a message kind with no override.
pub const DEFAULT_DESTINATION_GAS: u64 = 500_000;

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Index of the CPIT bucket containing `timestamp`.
pub fn cpit_bucket(timestamp: u64) -> u64 {
    timestamp / CPIT_BUCKET_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpit_window_is_one_day() {
        assert_eq!(CPIT_BUCKET_SECS * CPIT_WINDOW_BUCKETS, DAY);
    }

    #[test]
    fn reserved_holdings_precede_investors() {
        assert!(MANAGER_HOLDING_ID < FIRST_INVESTOR_HOLDING_ID);
        assert!(PROTOCOL_HOLDING_ID < FIRST_INVESTOR_HOLDING_ID);
        assert_ne!(MANAGER_HOLDING_ID, PROTOCOL_HOLDING_ID);
    }

    #[test]
    fn fee_steps_fit_under_caps() {
        assert!(MAX_STREAMING_FEE_STEP_BIPS <= MAX_STREAMING_FEE_BIPS);
        assert!(MAX_PERFORMANCE_FEE_STEP_BIPS <= MAX_PERFORMANCE_FEE_BIPS);
        assert!((MAX_PERFORMANCE_FEE_BIPS as u128) < BIPS);
    }

    #[test]
    fn budget_floor_covers_one_asset() {
        assert!(VALUE_HANDLER_BUDGET_FLOOR > PER_ASSET_COST);
    }

    #[test]
    fn bucket_boundaries() {
        assert_eq!(cpit_bucket(0), 0);
        assert_eq!(cpit_bucket(CPIT_BUCKET_SECS - 1), 0);
        assert_eq!(cpit_bucket(CPIT_BUCKET_SECS), 1);
    }
}
