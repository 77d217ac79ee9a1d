//! Reference collaborators.
//!
//! Small, deterministic implementations of each role. The node wires them
//! into devnet scenarios and the test suites use them to drive every
//! vault path without external venues.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::debug;

use super::{
    AssetValuation, ExecutionError, ExecutionMeter, Executor, Payout, RedemptionError, Redeemer,
    Trade, ValuationError, Valuer,
};
use crate::assets::AssetBook;
use crate::config::{PORTION_SCALE, PRICE_SCALE};
use crate::math::mul_div;
use crate::types::AssetId;

/// Cost charged by a feed lookup, on top of the accountant's per-asset cost.
pub const PRICE_FEED_LOOKUP_COST: u64 = 5_000;

// ---------------------------------------------------------------------------
// PriceFeedValuer
// ---------------------------------------------------------------------------

/// Min/max price band for one unit of an asset, scaled by [`PRICE_SCALE`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PriceBand {
    pub min: u128,
    pub max: u128,
}

/// Values balances from an in-memory oracle table.
#[derive(Debug, Default)]
pub struct PriceFeedValuer {
    prices: RwLock<HashMap<AssetId, PriceBand>>,
    failing: RwLock<HashSet<AssetId>>,
}

impl PriceFeedValuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, asset: AssetId, price: u128) {
        self.set_price_band(asset, price, price);
    }

    pub fn set_price_band(&self, asset: AssetId, min: u128, max: u128) {
        self.prices.write().insert(asset, PriceBand { min, max });
    }

    /// Makes every valuation of `asset` fail with a non-budget error, as a
    /// broken oracle would.
    pub fn set_failing(&self, asset: AssetId, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(asset);
        } else {
            set.remove(&asset);
        }
    }
}

impl Valuer for PriceFeedValuer {
    fn value(
        &self,
        asset: &AssetId,
        balance: u128,
        meter: &mut ExecutionMeter,
    ) -> Result<AssetValuation, ValuationError> {
        meter.charge(PRICE_FEED_LOOKUP_COST)?;
        if self.failing.read().contains(asset) {
            return Err(ValuationError::Failed(format!("oracle for {asset} reverted")));
        }
        let band = self
            .prices
            .read()
            .get(asset)
            .copied()
            .ok_or(ValuationError::NoPrice(*asset))?;
        let min = mul_div(balance, band.min, PRICE_SCALE)
            .map_err(|e| ValuationError::Failed(e.to_string()))?;
        let max = mul_div(balance, band.max, PRICE_SCALE)
            .map_err(|e| ValuationError::Failed(e.to_string()))?;
        Ok(AssetValuation { min, max })
    }
}

// ---------------------------------------------------------------------------
// Redeemers
// ---------------------------------------------------------------------------

/// Pays out the withdrawer's portion of the raw balance.
#[derive(Debug, Default)]
pub struct TransferRedeemer;

impl Redeemer for TransferRedeemer {
    fn withdraw(
        &self,
        book: &mut AssetBook,
        asset: AssetId,
        portion: u128,
    ) -> Result<Vec<Payout>, RedemptionError> {
        let amount = mul_div(book.balance(&asset), portion, PORTION_SCALE)
            .map_err(|e| RedemptionError::Failed(e.to_string()))?;
        if amount == 0 {
            return Ok(Vec::new());
        }
        book.debit(asset, amount)?;
        book.update_active_asset(asset)?;
        Ok(vec![Payout { asset, amount }])
    }
}

/// Redeems a position by closing the withdrawer's slice of it in the
/// pre-phase and paying the proceeds out in a settlement asset.
///
/// The main phase is a no-op: by then the position has already shrunk by
/// the portion and the proceeds never touch the vault's settlement balance,
/// so the transfer redeemer for that asset pays out only the vault's own
/// share of it.
#[derive(Debug)]
pub struct ClosingPositionRedeemer {
    settlement: AssetId,
    /// Settlement units per position unit, scaled by [`PRICE_SCALE`].
    rate: RwLock<u128>,
}

impl ClosingPositionRedeemer {
    pub fn new(settlement: AssetId, rate: u128) -> Self {
        Self {
            settlement,
            rate: RwLock::new(rate),
        }
    }

    pub fn set_rate(&self, rate: u128) {
        *self.rate.write() = rate;
    }
}

impl Redeemer for ClosingPositionRedeemer {
    fn has_pre_withdraw(&self) -> bool {
        true
    }

    fn pre_withdraw(
        &self,
        book: &mut AssetBook,
        asset: AssetId,
        portion: u128,
    ) -> Result<Vec<Payout>, RedemptionError> {
        let units = mul_div(book.balance(&asset), portion, PORTION_SCALE)
            .map_err(|e| RedemptionError::Failed(e.to_string()))?;
        if units == 0 {
            return Ok(Vec::new());
        }
        let proceeds = mul_div(units, *self.rate.read(), PRICE_SCALE)
            .map_err(|e| RedemptionError::Failed(e.to_string()))?;
        book.debit(asset, units)?;
        book.update_active_asset(asset)?;
        debug!(%asset, units, proceeds, "position slice closed");
        if proceeds == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![Payout {
            asset: self.settlement,
            amount: proceeds,
        }])
    }

    fn withdraw(
        &self,
        _book: &mut AssetBook,
        _asset: AssetId,
        _portion: u128,
    ) -> Result<Vec<Payout>, RedemptionError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Executors
// ---------------------------------------------------------------------------

/// Swaps at fixed pair rates. Subject to CPIT.
#[derive(Debug, Default)]
pub struct FixedRateSwapExecutor {
    /// Buy units per sell unit, scaled by [`PRICE_SCALE`].
    rates: RwLock<HashMap<(AssetId, AssetId), u128>>,
}

impl FixedRateSwapExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rate(&self, sell: AssetId, buy: AssetId, rate: u128) {
        self.rates.write().insert((sell, buy), rate);
    }

    fn quote(&self, trade: &Trade) -> Result<u128, ExecutionError> {
        let rate = self
            .rates
            .read()
            .get(&(trade.sell, trade.buy))
            .copied()
            .ok_or_else(|| {
                ExecutionError::Unsupported(format!("no route {} -> {}", trade.sell, trade.buy))
            })?;
        mul_div(trade.amount, rate, PRICE_SCALE)
            .map_err(|e| ExecutionError::Unsupported(e.to_string()))
    }
}

impl Executor for FixedRateSwapExecutor {
    fn requires_cpit(&self) -> bool {
        true
    }

    fn execute(&self, book: &mut AssetBook, trade: &Trade) -> Result<(), ExecutionError> {
        let out = self.quote(trade)?;
        if out < trade.min_amount_out {
            return Err(ExecutionError::InsufficientOutput {
                got: out,
                min: trade.min_amount_out,
            });
        }
        book.debit(trade.sell, trade.amount)?;
        book.credit(trade.buy, out)?;
        book.add_active_asset(trade.buy)?;
        book.update_active_asset(trade.sell)?;
        Ok(())
    }
}

/// Opens positions one-to-one and locks the position asset so it stays in
/// the enabled set while the position is open. Not subject to CPIT.
#[derive(Debug, Default)]
pub struct PositionExecutor;

impl Executor for PositionExecutor {
    fn requires_cpit(&self) -> bool {
        false
    }

    fn execute(&self, book: &mut AssetBook, trade: &Trade) -> Result<(), ExecutionError> {
        if trade.amount < trade.min_amount_out {
            return Err(ExecutionError::InsufficientOutput {
                got: trade.amount,
                min: trade.min_amount_out,
            });
        }
        book.debit(trade.sell, trade.amount)?;
        book.credit(trade.buy, trade.amount)?;
        if !book.is_locked(&trade.buy) {
            book.add_asset_lock(trade.buy)?;
        }
        book.update_active_asset(trade.sell)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    const E18: u128 = 1_000_000_000_000_000_000;

    fn usdc() -> AssetId {
        Address::from_label("usdc")
    }

    fn weth() -> AssetId {
        Address::from_label("weth")
    }

    #[test]
    fn price_feed_values_band() {
        let feed = PriceFeedValuer::new();
        feed.set_price_band(weth(), 1_900 * E18, 2_000 * E18);
        let v = feed
            .value(&weth(), 2 * E18, &mut ExecutionMeter::unlimited())
            .unwrap();
        assert_eq!(v.min, 3_800 * E18);
        assert_eq!(v.max, 4_000 * E18);
    }

    #[test]
    fn price_feed_charges_meter() {
        let feed = PriceFeedValuer::new();
        feed.set_price(usdc(), E18);
        let mut meter = ExecutionMeter::new(PRICE_FEED_LOOKUP_COST - 1);
        let err = feed.value(&usdc(), 1, &mut meter).unwrap_err();
        assert!(err.is_budget_exhausted());
    }

    #[test]
    fn failing_feed_is_not_budget_error() {
        let feed = PriceFeedValuer::new();
        feed.set_price(usdc(), E18);
        feed.set_failing(usdc(), true);
        let err = feed
            .value(&usdc(), 1, &mut ExecutionMeter::unlimited())
            .unwrap_err();
        assert!(!err.is_budget_exhausted());
    }

    #[test]
    fn transfer_redeems_portion() {
        let mut book = AssetBook::new(4);
        book.credit(usdc(), 1_000).unwrap();
        book.add_active_asset(usdc()).unwrap();
        let out = TransferRedeemer
            .withdraw(&mut book, usdc(), PORTION_SCALE / 4)
            .unwrap();
        assert_eq!(out, vec![Payout { asset: usdc(), amount: 250 }]);
        assert_eq!(book.balance(&usdc()), 750);
    }

    #[test]
    fn closing_redeemer_pays_settlement_in_pre_phase() {
        let pos = Address::from_label("lp-usdc-weth");
        let mut book = AssetBook::new(4);
        book.credit(pos, 100).unwrap();
        book.add_asset_lock(pos).unwrap();
        let r = ClosingPositionRedeemer::new(usdc(), 2 * E18);
        assert!(r.has_pre_withdraw());
        let out = r.pre_withdraw(&mut book, pos, PORTION_SCALE / 2).unwrap();
        assert_eq!(out, vec![Payout { asset: usdc(), amount: 100 }]);
        assert_eq!(book.balance(&pos), 50);
        assert!(r.withdraw(&mut book, pos, PORTION_SCALE / 2).unwrap().is_empty());
    }

    #[test]
    fn swap_enforces_min_out() {
        let swap = FixedRateSwapExecutor::new();
        swap.set_rate(usdc(), weth(), E18 / 2_000);
        let mut book = AssetBook::new(4);
        book.credit(usdc(), 2_000 * E18).unwrap();
        book.add_active_asset(usdc()).unwrap();

        let trade = Trade {
            sell: usdc(),
            amount: 2_000 * E18,
            buy: weth(),
            min_amount_out: 2 * E18,
        };
        assert!(matches!(
            swap.execute(&mut book, &trade),
            Err(ExecutionError::InsufficientOutput { .. })
        ));
        assert_eq!(book.balance(&usdc()), 2_000 * E18);

        let trade = Trade { min_amount_out: E18, ..trade };
        swap.execute(&mut book, &trade).unwrap();
        assert_eq!(book.balance(&weth()), E18);
        assert!(!book.is_enabled(&usdc()));
        assert!(book.is_enabled(&weth()));
    }

    #[test]
    fn position_executor_locks_position() {
        let pos = Address::from_label("perp-eth");
        let mut book = AssetBook::new(4);
        book.credit(usdc(), 10).unwrap();
        book.add_active_asset(usdc()).unwrap();
        let trade = Trade { sell: usdc(), amount: 10, buy: pos, min_amount_out: 0 };
        PositionExecutor.execute(&mut book, &trade).unwrap();
        assert!(book.is_locked(&pos));
        assert!(!PositionExecutor.requires_cpit());
    }
}
