//! Account balances outside the vaults.
//!
//! Investors, managers and the treasury hold token and native balances
//! here. Deposits debit them, redemptions and fee forwarding credit them.

use std::collections::BTreeMap;

use crossvault_protocol::math::MathError;
use crossvault_protocol::{Address, AssetId};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Wallets {
    tokens: BTreeMap<(Address, AssetId), u128>,
    native: BTreeMap<Address, u128>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, owner: &Address, asset: &AssetId) -> u128 {
        self.tokens.get(&(*owner, *asset)).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, owner: Address, asset: AssetId, amount: u128) -> Result<(), VaultError> {
        let entry = self.tokens.entry((owner, asset)).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(MathError::Overflow)?;
        Ok(())
    }

    pub fn debit(&mut self, owner: Address, asset: AssetId, amount: u128) -> Result<(), VaultError> {
        let available = self.balance(&owner, &asset);
        if amount > available {
            return Err(VaultError::InsufficientWalletBalance {
                owner,
                asset,
                available,
                requested: amount,
            });
        }
        self.tokens.insert((owner, asset), available - amount);
        Ok(())
    }

    pub fn native_balance(&self, owner: &Address) -> u128 {
        self.native.get(owner).copied().unwrap_or(0)
    }

    pub fn credit_native(&mut self, owner: Address, amount: u128) -> Result<(), VaultError> {
        let entry = self.native.entry(owner).or_insert(0);
        *entry = entry
            .checked_add(amount)
            .ok_or(MathError::Overflow)?;
        Ok(())
    }

    pub fn debit_native(&mut self, owner: Address, amount: u128) -> Result<(), VaultError> {
        let available = self.native_balance(&owner);
        if amount > available {
            return Err(VaultError::InsufficientNativeBalance {
                owner,
                available,
                requested: amount,
            });
        }
        self.native.insert(owner, available - amount);
        Ok(())
    }
}
