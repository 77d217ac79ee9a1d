//! Share issuance, burns and fee levies.

use std::collections::BTreeMap;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::fees::{performance_fee_shares, streaming_fee_shares, FeeLevy};
use super::governance::FeeSchedule;
use super::holding::{is_reserved, Holding};
use super::LedgerError;
use crate::config::{BIPS, FIRST_INVESTOR_HOLDING_ID, MANAGER_HOLDING_ID, PROTOCOL_HOLDING_ID};
use crate::math::{mul_div, mul_div_chain, MathError};
use crate::types::{Address, TokenId};

/// All holdings of one parent vault plus the global share total.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShareLedger {
    holdings: BTreeMap<TokenId, Holding>,
    total_shares: u128,
    next_token_id: TokenId,
}

impl ShareLedger {
    /// Creates the ledger with the two reserved fee holdings.
    pub fn new(manager: Address, treasury: Address, now: u64) -> Self {
        let mut holdings = BTreeMap::new();
        holdings.insert(
            MANAGER_HOLDING_ID,
            Holding::new(MANAGER_HOLDING_ID, manager, 0, 0, now),
        );
        holdings.insert(
            PROTOCOL_HOLDING_ID,
            Holding::new(PROTOCOL_HOLDING_ID, treasury, 0, 0, now),
        );
        Self {
            holdings,
            total_shares: 0,
            next_token_id: FIRST_INVESTOR_HOLDING_ID,
        }
    }

    pub fn total_shares(&self) -> u128 {
        self.total_shares
    }

    pub fn holding(&self, token_id: TokenId) -> Result<&Holding, LedgerError> {
        self.holdings
            .get(&token_id)
            .ok_or(LedgerError::HoldingNotFound(token_id))
    }

    fn holding_mut(&mut self, token_id: TokenId) -> Result<&mut Holding, LedgerError> {
        self.holdings
            .get_mut(&token_id)
            .ok_or(LedgerError::HoldingNotFound(token_id))
    }

    pub fn holdings(&self) -> impl Iterator<Item = &Holding> {
        self.holdings.values()
    }

    /// Opens a new investor holding at zero shares.
    pub fn create_holding(&mut self, owner: Address, fees: FeeSchedule, now: u64) -> TokenId {
        let token_id = self.next_token_id;
        self.next_token_id += 1;
        self.holdings.insert(
            token_id,
            Holding::new(
                token_id,
                owner,
                fees.streaming_fee_bips,
                fees.performance_fee_bips,
                now,
            ),
        );
        debug!(token_id, %owner, "holding created");
        token_id
    }

    /// Mints shares into a holding at `unit_price`, updating its
    /// share-weighted average entry price.
    pub fn mint(&mut self, token_id: TokenId, shares: u128, unit_price: u128) -> Result<(), LedgerError> {
        let new_total = self
            .total_shares
            .checked_add(shares)
            .ok_or(MathError::Overflow)?;
        let holding = self.holding_mut(token_id)?;
        let combined = holding
            .total_shares
            .checked_add(shares)
            .ok_or(MathError::Overflow)?;
        if combined > 0 {
            let weighted = U256::from(holding.total_shares) * U256::from(holding.average_entry_price)
                + U256::from(shares) * U256::from(unit_price);
            let average = weighted / U256::from(combined);
            if average > U256::from(u128::MAX) {
                return Err(MathError::Overflow.into());
            }
            holding.average_entry_price = average.as_u128();
        }
        holding.total_shares = combined;
        self.total_shares = new_total;
        Ok(())
    }

    /// Burns shares from a holding.
    pub fn burn(&mut self, token_id: TokenId, shares: u128, now: u64) -> Result<(), LedgerError> {
        let holding = self.holding_mut(token_id)?;
        if shares > holding.total_shares {
            return Err(LedgerError::InsufficientShares {
                token_id,
                available: holding.total_shares,
                requested: shares,
            });
        }
        holding.total_shares -= shares;
        holding.last_burn_time = now;
        self.total_shares -= shares;
        Ok(())
    }

    /// Levies outstanding streaming and performance fees on a holding.
    ///
    /// A `unit_price` of zero skips performance pricing entirely. Reserved
    /// holdings are exempt and return an empty levy. After charging, the
    /// holding adopts `current_fees` and the high-water mark rises to
    /// `unit_price` if it is higher.
    pub fn levy_fees(
        &mut self,
        token_id: TokenId,
        unit_price: u128,
        now: u64,
        protocol_share_bips: u32,
        current_fees: FeeSchedule,
    ) -> Result<FeeLevy, LedgerError> {
        if is_reserved(token_id) {
            return Ok(FeeLevy::default());
        }
        let holding = self.holding(token_id)?;

        let elapsed = now.saturating_sub(holding.last_streaming_fee_time);
        let streaming = streaming_fee_shares(
            holding.total_shares,
            holding.streaming_fee_bips,
            holding.fee_discount_bips,
            elapsed,
        )?
        .min(holding.total_shares);
        let after_streaming = holding.total_shares - streaming;
        let performance = performance_fee_shares(
            after_streaming,
            holding.performance_fee_bips,
            holding.fee_discount_bips,
            unit_price,
            holding.last_performance_fee_unit_price,
        )?;

        let total = streaming + performance;
        let protocol_shares = mul_div(total, protocol_share_bips as u128, BIPS)?;
        let levy = FeeLevy {
            streaming_shares: streaming,
            performance_shares: performance,
            protocol_shares,
            manager_shares: total - protocol_shares,
        };

        let holding = self.holding_mut(token_id)?;
        holding.total_shares -= total;
        holding.last_streaming_fee_time = now;
        if unit_price > holding.last_performance_fee_unit_price {
            holding.last_performance_fee_unit_price = unit_price;
        }
        holding.streaming_fee_bips = current_fees.streaming_fee_bips;
        holding.performance_fee_bips = current_fees.performance_fee_bips;

        self.holding_mut(PROTOCOL_HOLDING_ID)?.total_shares += levy.protocol_shares;
        self.holding_mut(MANAGER_HOLDING_ID)?.total_shares += levy.manager_shares;

        if total > 0 {
            debug!(
                token_id,
                streaming = levy.streaming_shares,
                performance = levy.performance_shares,
                "fees levied"
            );
        }
        Ok(levy)
    }

    /// Sets the high-water mark and unlock time of a freshly funded holding.
    pub fn initialise_position(&mut self, token_id: TokenId, unit_price: u128, unlock_time: u64) -> Result<(), LedgerError> {
        let holding = self.holding_mut(token_id)?;
        holding.last_performance_fee_unit_price = unit_price;
        holding.unlock_time = unlock_time;
        Ok(())
    }

    pub fn set_unlock_time(&mut self, token_id: TokenId, unlock_time: u64) -> Result<(), LedgerError> {
        self.holding_mut(token_id)?.unlock_time = unlock_time;
        Ok(())
    }

    pub fn set_discount(&mut self, token_id: TokenId, discount_bips: u32) -> Result<(), LedgerError> {
        if discount_bips as u128 > BIPS {
            return Err(LedgerError::InvalidDiscount(discount_bips));
        }
        if is_reserved(token_id) {
            return Err(LedgerError::ReservedHolding(token_id));
        }
        self.holding_mut(token_id)?.fee_discount_bips = discount_bips;
        Ok(())
    }

    pub fn mark_manager_levy(&mut self, token_id: TokenId, now: u64) -> Result<(), LedgerError> {
        self.holding_mut(token_id)?.last_manager_fee_levy_time = now;
        Ok(())
    }

    pub fn set_owner(&mut self, token_id: TokenId, owner: Address) -> Result<(), LedgerError> {
        self.holding_mut(token_id)?.owner = owner;
        Ok(())
    }

    /// Value-weighted share of `value` attributable to `shares`.
    pub fn value_of_shares(&self, shares: u128, vault_value: u128) -> Result<u128, LedgerError> {
        if self.total_shares == 0 {
            return Ok(0);
        }
        Ok(mul_div(shares, vault_value, self.total_shares)?)
    }

    /// Σ holding shares == total shares.
    pub fn check_invariant(&self) -> bool {
        let sum = self
            .holdings
            .values()
            .try_fold(0u128, |acc, h| acc.checked_add(h.total_shares));
        sum == Some(self.total_shares)
    }

    /// Shares issued for a deposit: `existing × deposit_value / current_value`,
    /// or 1:1 for the very first deposit.
    pub fn shares_for_deposit(&self, deposit_value: u128, current_value: u128) -> Result<u128, LedgerError> {
        if self.total_shares == 0 || current_value == 0 {
            return Ok(deposit_value);
        }
        Ok(mul_div_chain(&[self.total_shares, deposit_value], &[current_value])?)
    }
}
