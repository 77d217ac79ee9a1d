//! A single share position.

use serde::{Deserialize, Serialize};

use crate::config::{MANAGER_HOLDING_ID, PROTOCOL_HOLDING_ID};
use crate::types::{Address, TokenId};

/// One investor position in a parent vault.
///
/// Holdings are created on first deposit and never deleted; a fully
/// withdrawn holding simply sits at zero shares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub token_id: TokenId,
    pub owner: Address,
    pub total_shares: u128,
    /// Annual streaming fee rate the holding is currently charged.
    pub streaming_fee_bips: u32,
    pub performance_fee_bips: u32,
    /// Discount applied to both fees, granted by the manager.
    pub fee_discount_bips: u32,
    pub last_streaming_fee_time: u64,
    /// High-water mark: performance fees only accrue above this unit price.
    pub last_performance_fee_unit_price: u128,
    /// Share-weighted average unit price paid.
    pub average_entry_price: u128,
    /// Withdrawals are refused before this timestamp.
    pub unlock_time: u64,
    pub last_manager_fee_levy_time: u64,
    pub last_burn_time: u64,
}

impl Holding {
    pub fn new(token_id: TokenId, owner: Address, streaming_fee_bips: u32, performance_fee_bips: u32, now: u64) -> Self {
        Self {
            token_id,
            owner,
            total_shares: 0,
            streaming_fee_bips,
            performance_fee_bips,
            fee_discount_bips: 0,
            last_streaming_fee_time: now,
            last_performance_fee_unit_price: 0,
            average_entry_price: 0,
            unlock_time: 0,
            last_manager_fee_levy_time: now,
            last_burn_time: 0,
        }
    }

    /// Manager and protocol holdings receive fees and are never charged.
    pub fn is_fee_exempt(&self) -> bool {
        is_reserved(self.token_id)
    }
}

/// True for the two fee-collecting holdings.
pub fn is_reserved(token_id: TokenId) -> bool {
    token_id == MANAGER_HOLDING_ID || token_id == PROTOCOL_HOLDING_ID
}
