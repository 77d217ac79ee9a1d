//! Fee formulas.
//!
//! Both fees are expressed in *shares*, not value: a levy burns shares from
//! the charged holding and mints the same number to the fee holdings.

use serde::{Deserialize, Serialize};

use crate::config::{BIPS, SECONDS_PER_YEAR};
use crate::math::{mul_div_chain, MathError};

/// Outcome of a single levy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLevy {
    pub streaming_shares: u128,
    pub performance_shares: u128,
    /// Part of the total minted to the protocol holding.
    pub protocol_shares: u128,
    /// Part of the total minted to the manager holding.
    pub manager_shares: u128,
}

impl FeeLevy {
    pub fn total(&self) -> u128 {
        self.streaming_shares + self.performance_shares
    }
}

/// `shares × fee × elapsed × (1 − discount) / (365d × 10_000 × 10_000)`
pub fn streaming_fee_shares(
    shares: u128,
    fee_bips: u32,
    discount_bips: u32,
    elapsed_secs: u64,
) -> Result<u128, MathError> {
    if shares == 0 || fee_bips == 0 || elapsed_secs == 0 {
        return Ok(0);
    }
    let undiscounted = BIPS.saturating_sub(discount_bips as u128);
    mul_div_chain(
        &[shares, fee_bips as u128, elapsed_secs as u128, undiscounted],
        &[SECONDS_PER_YEAR as u128, BIPS, BIPS],
    )
}

/// `shares × fee × (1 − discount) × (price − hwm) / hwm / 10_000 / 10_000`
///
/// Zero unless `price` is strictly above a non-zero high-water mark. A zero
/// `price` (the "skip performance pricing" levy) therefore never charges.
pub fn performance_fee_shares(
    shares_after_streaming: u128,
    fee_bips: u32,
    discount_bips: u32,
    unit_price: u128,
    high_water_mark: u128,
) -> Result<u128, MathError> {
    if fee_bips == 0 || high_water_mark == 0 || unit_price <= high_water_mark {
        return Ok(0);
    }
    let undiscounted = BIPS.saturating_sub(discount_bips as u128);
    let fee = mul_div_chain(
        &[
            shares_after_streaming,
            fee_bips as u128,
            undiscounted,
            unit_price - high_water_mark,
        ],
        &[high_water_mark, BIPS, BIPS],
    )?;
    Ok(fee.min(shares_after_streaming))
}
