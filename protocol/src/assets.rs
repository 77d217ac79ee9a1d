//! # Asset Book
//!
//! What a single vault instance holds on its own chain: raw balances, the
//! enabled-asset set the accountant values, and per-asset locks.
//!
//! The enabled set is what redemptions and valuations iterate. Executors and
//! redeemers register their side effects on it through
//! [`add_active_asset`](AssetBook::add_active_asset),
//! [`update_active_asset`](AssetBook::update_active_asset) and
//! [`add_asset_lock`](AssetBook::add_asset_lock).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AssetId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("insufficient {asset} balance: have {available}, need {requested}")]
    InsufficientBalance {
        asset: AssetId,
        available: u128,
        requested: u128,
    },

    #[error("balance overflow for {0}")]
    Overflow(AssetId),

    #[error("too many active assets (max {0})")]
    TooManyActiveAssets(usize),

    #[error("asset {0} has no lock to remove")]
    NotLocked(AssetId),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AssetBook {
    balances: BTreeMap<AssetId, u128>,
    enabled: BTreeSet<AssetId>,
    locks: BTreeMap<AssetId, u32>,
    max_active: usize,
}

impl AssetBook {
    pub fn new(max_active: usize) -> Self {
        Self {
            balances: BTreeMap::new(),
            enabled: BTreeSet::new(),
            locks: BTreeMap::new(),
            max_active,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Changes the cap on the enabled set. Assets already enabled stay
    /// enabled even when the new cap is lower.
    pub fn set_max_active(&mut self, max_active: usize) {
        self.max_active = max_active;
    }

    pub fn balance(&self, asset: &AssetId) -> u128 {
        self.balances.get(asset).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, asset: AssetId, amount: u128) -> Result<u128, AssetError> {
        let entry = self.balances.entry(asset).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(AssetError::Overflow(asset))?;
        Ok(*entry)
    }

    pub fn debit(&mut self, asset: AssetId, amount: u128) -> Result<u128, AssetError> {
        let available = self.balance(&asset);
        if amount > available {
            return Err(AssetError::InsufficientBalance {
                asset,
                available,
                requested: amount,
            });
        }
        let remaining = available - amount;
        if remaining == 0 {
            self.balances.remove(&asset);
        } else {
            self.balances.insert(asset, remaining);
        }
        Ok(remaining)
    }

    pub fn is_enabled(&self, asset: &AssetId) -> bool {
        self.enabled.contains(asset)
    }

    /// Snapshot of the enabled set. Callers that may remove assets while
    /// iterating must iterate a snapshot.
    pub fn enabled_assets(&self) -> Vec<AssetId> {
        self.enabled.iter().copied().collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled.len()
    }

    /// Enabled assets with a non-zero balance, paired with that balance.
    pub fn assets_with_balances(&self) -> Vec<(AssetId, u128)> {
        self.enabled
            .iter()
            .map(|a| (*a, self.balance(a)))
            .filter(|(_, b)| *b > 0)
            .collect()
    }

    /// Adds an asset to the enabled set.
    pub fn add_active_asset(&mut self, asset: AssetId) -> Result<(), AssetError> {
        if self.enabled.contains(&asset) {
            return Ok(());
        }
        if self.max_active > 0 && self.enabled.len() >= self.max_active {
            return Err(AssetError::TooManyActiveAssets(self.max_active));
        }
        self.enabled.insert(asset);
        Ok(())
    }

    /// Re-evaluates membership: kept while it has a balance or a lock,
    /// removed otherwise.
    pub fn update_active_asset(&mut self, asset: AssetId) -> Result<(), AssetError> {
        if self.balance(&asset) > 0 || self.is_locked(&asset) {
            self.add_active_asset(asset)
        } else {
            self.enabled.remove(&asset);
            Ok(())
        }
    }

    pub fn add_asset_lock(&mut self, asset: AssetId) -> Result<(), AssetError> {
        *self.locks.entry(asset).or_insert(0) += 1;
        self.add_active_asset(asset)
    }

    pub fn remove_asset_lock(&mut self, asset: AssetId) -> Result<(), AssetError> {
        match self.locks.get_mut(&asset) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.locks.remove(&asset);
            }
            None => return Err(AssetError::NotLocked(asset)),
        }
        self.update_active_asset(asset)
    }

    pub fn is_locked(&self, asset: &AssetId) -> bool {
        self.locks.contains_key(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn usdc() -> AssetId {
        Address::from_label("usdc")
    }

    #[test]
    fn debit_beyond_balance_rejected() {
        let mut book = AssetBook::new(4);
        book.credit(usdc(), 10).unwrap();
        assert!(matches!(
            book.debit(usdc(), 11),
            Err(AssetError::InsufficientBalance { .. })
        ));
        assert_eq!(book.debit(usdc(), 10).unwrap(), 0);
    }

    #[test]
    fn update_removes_empty_unlocked_asset() {
        let mut book = AssetBook::new(4);
        book.add_active_asset(usdc()).unwrap();
        book.update_active_asset(usdc()).unwrap();
        assert!(!book.is_enabled(&usdc()));
    }

    #[test]
    fn lock_keeps_empty_asset_enabled() {
        let mut book = AssetBook::new(4);
        book.add_asset_lock(usdc()).unwrap();
        book.update_active_asset(usdc()).unwrap();
        assert!(book.is_enabled(&usdc()));
        book.remove_asset_lock(usdc()).unwrap();
        assert!(!book.is_enabled(&usdc()));
    }

    #[test]
    fn active_asset_limit() {
        let mut book = AssetBook::new(1);
        book.add_active_asset(usdc()).unwrap();
        assert_eq!(
            book.add_active_asset(Address::from_label("weth")),
            Err(AssetError::TooManyActiveAssets(1))
        );
    }

    #[test]
    fn assets_with_balances_skips_empty() {
        let mut book = AssetBook::new(4);
        book.add_active_asset(usdc()).unwrap();
        book.credit(Address::from_label("weth"), 5).unwrap();
        book.add_active_asset(Address::from_label("weth")).unwrap();
        assert_eq!(book.assets_with_balances(), vec![(Address::from_label("weth"), 5)]);
    }

    #[test]
    fn raising_the_cap_makes_room() {
        let mut book = AssetBook::new(1);
        let weth = Address::from_label("weth");
        book.add_active_asset(usdc()).unwrap();
        assert_eq!(book.add_active_asset(weth), Err(AssetError::TooManyActiveAssets(1)));

        book.set_max_active(2);
        book.add_active_asset(weth).unwrap();
        assert_eq!(book.enabled_count(), 2);

        // Lowering the cap never evicts.
        book.set_max_active(1);
        assert_eq!(book.enabled_count(), 2);
        assert_eq!(book.max_active(), 1);
    }
}
