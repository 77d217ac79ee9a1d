//! Vault valuation.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{ExecutionMeter, Integrations, ValuationError};
use crate::assets::AssetBook;
use crate::config::PER_ASSET_COST;
use crate::registry::Registry;

/// Value band of a vault instance plus whether any held asset is
/// hard-deprecated (its value cannot be trusted).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultValue {
    pub min: u128,
    pub max: u128,
    pub has_hard_deprecated_asset: bool,
}

impl VaultValue {
    /// Sum of two bands. Saturates: a u128 of 18-decimal USD is far beyond
    /// anything a real vault holds.
    pub fn combine(self, other: VaultValue) -> VaultValue {
        VaultValue {
            min: self.min.saturating_add(other.min),
            max: self.max.saturating_add(other.max),
            has_hard_deprecated_asset: self.has_hard_deprecated_asset
                || other.has_hard_deprecated_asset,
        }
    }
}

/// Sums per-asset valuations over a vault's enabled assets.
pub struct Accountant;

impl Accountant {
    /// Values every enabled asset with a balance. Each asset costs
    /// [`PER_ASSET_COST`] on the meter before its valuer runs.
    pub fn vault_value(
        book: &AssetBook,
        registry: &Registry,
        integrations: &Integrations,
        meter: &mut ExecutionMeter,
    ) -> Result<VaultValue, ValuationError> {
        let mut total = VaultValue::default();
        for (asset, balance) in book.assets_with_balances() {
            meter.charge(PER_ASSET_COST)?;
            let kind = registry
                .valuer(&asset)
                .ok_or(ValuationError::NoValuer(asset))?;
            let valuer = integrations
                .valuer(kind)
                .ok_or(ValuationError::NoValuer(asset))?;
            let v = valuer.value(&asset, balance, meter)?;
            trace!(%asset, balance, min = v.min, max = v.max, "asset valued");
            total.min = total.min.saturating_add(v.min);
            total.max = total.max.saturating_add(v.max);
            if registry.hard_deprecated(&asset) {
                total.has_hard_deprecated_asset = true;
            }
        }
        Ok(total)
    }
}
