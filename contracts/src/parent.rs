//! # Parent Vault
//!
//! The canonical side of a Crossvault vault. It owns the share ledger, its
//! own local assets, and a cached view of every child chain's value.
//!
//! ## Sync State
//!
//! ```text
//!   NotSynced ──request_value_sync──► Syncing ──all replies fresh──► Synced
//!       ▲                                                               │
//!       └──────────── cache ages past liveliness / bridge ack ──────────┘
//! ```
//!
//! The state is derived, never stored: the vault is *Syncing* while value
//! requests are outstanding, *Synced* when every active child has a cached
//! value no older than the liveliness threshold, and *NotSynced* otherwise.
//! Stale values are never used: deposits and priced withdrawals fail with
//! [`VaultError::NotInSync`] instead.
//!
//! ## Locks
//!
//! Orthogonal to sync state, four coarse locks span many messages:
//! `bridge_in_progress` (with the approved destination),
//! `child_creation_in_progress`, the `withdraws_in_progress` counter, and
//! the terminal `closed` flag. Each is cleared only by its own completion
//! or cancellation message.

use std::collections::{BTreeMap, BTreeSet};

use crossvault_protocol::assets::AssetBook;
use crossvault_protocol::config::{
    MANAGER_BRIDGE_LOCKOUT, MANAGER_FEE_LEVY_INTERVAL, MANAGER_HOLDING_ID, PORTION_SCALE,
    UNIT_PRICE_SCALE,
};
use crossvault_protocol::cpit::CpitTracker;
use crossvault_protocol::integrations::{
    ExecutionMeter, ExecutorKind, Integrations, Payout, Trade, ValuationError, VaultValue,
};
use crossvault_protocol::ledger::{FeeGovernance, FeeLevy, FeeSchedule, Holding, ShareLedger};
use crossvault_protocol::math::{mul_div, MathError};
use crossvault_protocol::transport::{
    AddVaultSiblingRequest, BridgeApprovalRequest, BridgeAssetRequest, ChangeManagerRequest,
    Message, MessageKind, ValueUpdateRequest, VaultChildCreationRequest, WithdrawRequest,
};
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, AssetId, ChainId, TokenId, VaultRef};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::approval::BridgeApproval;
use crate::chain::{CallContext, ChainEnv};
use crate::custody::{self, TradeContext};
use crate::error::VaultError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Last value reported by one child chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValue {
    pub min_value: u128,
    pub max_value: u128,
    /// Child-side valuation time. Zero means invalidated.
    pub last_update: u64,
    pub has_hard_deprecated_asset: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    NotSynced,
    Syncing,
    Synced,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::NotSynced => write!(f, "NotSynced"),
            SyncState::Syncing => write!(f, "Syncing"),
            SyncState::Synced => write!(f, "Synced"),
        }
    }
}

/// Parameters fixed when a parent vault is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentParams {
    pub manager: Address,
    pub risk_profile: RiskProfile,
    pub fees: FeeSchedule,
}

// ---------------------------------------------------------------------------
// ParentVault
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct ParentVault {
    address: Address,
    chain_id: ChainId,
    manager: Address,
    risk_profile: RiskProfile,
    fees: FeeGovernance,
    ledger: ShareLedger,
    book: AssetBook,
    cpit: CpitTracker,
    children: BTreeMap<ChainId, Address>,
    chain_values: BTreeMap<ChainId, ChainValue>,
    /// Children that no bridge has targeted yet. Excluded from the
    /// aggregate value and from withdraw fan-out.
    inactive: BTreeSet<ChainId>,
    pending_value_requests: BTreeSet<ChainId>,
    bridge_in_progress: bool,
    bridge_approved_for: Option<ChainId>,
    /// Approval for bridges sourced from the parent chain itself.
    local_approval: BridgeApproval,
    child_creation_in_progress: Option<ChainId>,
    withdraws_in_progress: u32,
    closed: bool,
    manager_lockout_until: u64,
}

impl ParentVault {
    pub fn new(
        address: Address,
        env: &ChainEnv,
        params: ParentParams,
    ) -> Result<Self, VaultError> {
        Ok(Self {
            address,
            chain_id: env.chain_id,
            manager: params.manager,
            risk_profile: params.risk_profile,
            fees: FeeGovernance::new(params.fees)?,
            ledger: ShareLedger::new(params.manager, env.registry.treasury(), env.now),
            book: AssetBook::new(env.registry.max_active_assets()),
            cpit: CpitTracker::new(),
            children: BTreeMap::new(),
            chain_values: BTreeMap::new(),
            inactive: BTreeSet::new(),
            pending_value_requests: BTreeSet::new(),
            bridge_in_progress: false,
            bridge_approved_for: None,
            local_approval: BridgeApproval::default(),
            child_creation_in_progress: None,
            withdraws_in_progress: 0,
            closed: false,
            manager_lockout_until: 0,
        })
    }

    // -- queries ------------------------------------------------------------

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn vault_ref(&self) -> VaultRef {
        VaultRef::new(self.chain_id, self.address)
    }

    pub fn manager(&self) -> Address {
        self.manager
    }

    pub fn risk_profile(&self) -> RiskProfile {
        self.risk_profile
    }

    pub fn fees(&self) -> &FeeGovernance {
        &self.fees
    }

    pub fn ledger(&self) -> &ShareLedger {
        &self.ledger
    }

    pub fn book(&self) -> &AssetBook {
        &self.book
    }

    pub(crate) fn book_mut(&mut self) -> &mut AssetBook {
        &mut self.book
    }

    pub fn cpit(&self) -> &CpitTracker {
        &self.cpit
    }

    pub fn holding(&self, token_id: TokenId) -> Result<&Holding, VaultError> {
        Ok(self.ledger.holding(token_id)?)
    }

    pub fn children(&self) -> &BTreeMap<ChainId, Address> {
        &self.children
    }

    pub fn chain_value(&self, chain: ChainId) -> Option<ChainValue> {
        self.chain_values.get(&chain).copied()
    }

    pub fn is_inactive(&self, chain: ChainId) -> bool {
        self.inactive.contains(&chain)
    }

    /// Children that count towards value and withdraw fan-out.
    pub fn active_children(&self) -> Vec<ChainId> {
        self.children
            .keys()
            .filter(|c| !self.inactive.contains(c))
            .copied()
            .collect()
    }

    pub fn bridge_in_progress(&self) -> bool {
        self.bridge_in_progress
    }

    pub fn bridge_approved_for(&self) -> Option<ChainId> {
        self.bridge_approved_for
    }

    pub fn local_approval(&self) -> BridgeApproval {
        self.local_approval
    }

    pub fn child_creation_in_progress(&self) -> Option<ChainId> {
        self.child_creation_in_progress
    }

    pub fn withdraws_in_progress(&self) -> u32 {
        self.withdraws_in_progress
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn manager_lockout_until(&self) -> u64 {
        self.manager_lockout_until
    }

    /// Every active child has a cached value no older than `liveliness`.
    pub fn in_sync(&self, now: u64, liveliness: u64) -> bool {
        self.active_children().iter().all(|chain| {
            self.chain_values.get(chain).is_some_and(|cv| {
                cv.last_update > 0 && now.saturating_sub(cv.last_update) <= liveliness
            })
        })
    }

    pub fn sync_state(&self, now: u64, liveliness: u64) -> SyncState {
        if !self.pending_value_requests.is_empty() {
            SyncState::Syncing
        } else if self.in_sync(now, liveliness) {
            SyncState::Synced
        } else {
            SyncState::NotSynced
        }
    }

    /// Local value plus every active child's cached value. Does not check
    /// freshness; callers that price against it check [`in_sync`] first.
    ///
    /// [`in_sync`]: ParentVault::in_sync
    pub fn total_value_across_chains(
        &self,
        env: &ChainEnv,
        integrations: &Integrations,
    ) -> Result<VaultValue, VaultError> {
        let mut total = custody::local_value(&self.book, &env.registry, integrations)?;
        for chain in self.active_children() {
            if let Some(cv) = self.chain_values.get(&chain) {
                total = total.combine(VaultValue {
                    min: cv.min_value,
                    max: cv.max_value,
                    has_hard_deprecated_asset: cv.has_hard_deprecated_asset,
                });
            }
        }
        Ok(total)
    }

    /// Max value per share, scaled by [`UNIT_PRICE_SCALE`]. One unit before
    /// the first deposit.
    pub fn unit_price(&self, total_max: u128) -> Result<u128, VaultError> {
        let total_shares = self.ledger.total_shares();
        if total_shares == 0 {
            return Ok(UNIT_PRICE_SCALE);
        }
        Ok(mul_div(total_max, UNIT_PRICE_SCALE, total_shares)?)
    }

    // -- guards -------------------------------------------------------------

    fn only_manager(&self, caller: Address) -> Result<(), VaultError> {
        if caller != self.manager {
            return Err(VaultError::NotManager(caller));
        }
        Ok(())
    }

    fn ensure_in_sync(&self, env: &ChainEnv) -> Result<(), VaultError> {
        if !self.in_sync(env.now, env.registry.liveliness_threshold()) {
            return Err(VaultError::NotInSync);
        }
        Ok(())
    }

    fn child_ref(&self, chain: ChainId) -> Result<VaultRef, VaultError> {
        self.children
            .get(&chain)
            .map(|addr| VaultRef::new(chain, *addr))
            .ok_or(VaultError::UnknownChain(chain))
    }

    fn check_fee_count(expected: usize, fees: &[u128]) -> Result<(), VaultError> {
        if fees.len() != expected {
            return Err(VaultError::FeeCountMismatch {
                expected,
                got: fees.len(),
            });
        }
        Ok(())
    }

    fn check_attached(ctx: &CallContext, fees: &[u128]) -> Result<(), VaultError> {
        let required = fees
            .iter()
            .try_fold(0u128, |acc, f| acc.checked_add(*f))
            .ok_or(MathError::Overflow)?;
        if ctx.value < required {
            return Err(VaultError::InsufficientValue {
                required,
                provided: ctx.value,
            });
        }
        Ok(())
    }

    // -- value sync ---------------------------------------------------------

    /// Asks every active child for its current value, one prepaid request
    /// per child.
    pub fn request_value_sync(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        fees: &[u128],
    ) -> Result<(), VaultError> {
        env.registry.ensure_not_paused()?;
        if self.bridge_in_progress {
            return Err(VaultError::BridgeInProgress);
        }
        if self.withdraws_in_progress > 0 {
            return Err(VaultError::WithdrawInProgress(self.withdraws_in_progress));
        }
        let active = self.active_children();
        Self::check_fee_count(active.len(), fees)?;
        Self::check_attached(ctx, fees)?;

        for (chain, fee) in active.iter().zip(fees) {
            let msg = Message::ValueUpdateRequest(ValueUpdateRequest {
                parent: self.vault_ref(),
                child: self.child_ref(*chain)?,
            });
            env.transport.send(*chain, &msg, *fee)?;
            self.pending_value_requests.insert(*chain);
        }
        info!(vault = %self.address, children = active.len(), "value sync requested");
        Ok(())
    }

    /// Stores a child's reported value.
    ///
    /// Ignored while withdraws are in flight: the withdraw path has already
    /// discounted the cache and a value computed before the child paid out
    /// would undo that. Values for unknown or inactive chains are accepted
    /// and ignored.
    pub fn receive_child_value(&mut self, chain: ChainId, value: ChainValue) {
        self.pending_value_requests.remove(&chain);
        if self.withdraws_in_progress > 0 {
            debug!(vault = %self.address, chain, "child value ignored: withdraw in progress");
            return;
        }
        if !self.children.contains_key(&chain) || self.inactive.contains(&chain) {
            warn!(vault = %self.address, chain, "child value ignored: chain not active");
            return;
        }
        debug!(
            vault = %self.address,
            chain,
            min = value.min_value,
            max = value.max_value,
            "child value cached"
        );
        self.chain_values.insert(chain, value);
    }

    // -- deposits -----------------------------------------------------------

    /// Deposits `amount` of `asset` into a new (`token_id = None`) or
    /// existing holding. Returns the holding id.
    pub fn deposit(
        &mut self,
        env: &mut ChainEnv,
        integrations: &Integrations,
        ctx: &CallContext,
        token_id: Option<TokenId>,
        asset: AssetId,
        amount: u128,
    ) -> Result<TokenId, VaultError> {
        env.registry.ensure_not_paused()?;
        if self.closed {
            return Err(VaultError::Closed);
        }
        if self.bridge_in_progress {
            return Err(VaultError::BridgeInProgress);
        }
        self.ensure_in_sync(env)?;
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        if !env.registry.deposit_asset(&asset) {
            return Err(VaultError::AssetNotDepositable(asset));
        }

        let total = self.total_value_across_chains(env, integrations)?;
        if total.has_hard_deprecated_asset {
            return Err(VaultError::HardDeprecatedAsset);
        }

        let deposit_value = {
            let kind = env
                .registry
                .valuer(&asset)
                .ok_or(ValuationError::NoValuer(asset))?;
            let valuer = integrations
                .valuer(kind)
                .ok_or(ValuationError::NoValuer(asset))?;
            let mut meter = ExecutionMeter::unlimited();
            valuer.value(&asset, amount, &mut meter)?.min
        };

        let limit = env.registry.deposit_limit(&self.address);
        let after = total
            .max
            .checked_add(deposit_value)
            .ok_or(MathError::Overflow)?;
        if after > limit {
            return Err(VaultError::DepositLimitExceeded { value: after, limit });
        }

        let unit_price = self.unit_price(total.max)?;
        let current_fees = self.fees.current();
        let token_id = match token_id {
            Some(id) => {
                let holding = self.ledger.holding(id)?;
                if holding.owner != ctx.caller {
                    return Err(VaultError::NotHoldingOwner {
                        token_id: id,
                        caller: ctx.caller,
                    });
                }
                self.ledger.levy_fees(
                    id,
                    unit_price,
                    env.now,
                    env.registry.protocol_fee_share_bips(),
                    current_fees,
                )?;
                id
            }
            None => {
                let min = env.registry.min_deposit_value();
                if deposit_value < min {
                    return Err(VaultError::DepositTooSmall {
                        value: deposit_value,
                        min,
                    });
                }
                let id = self.ledger.create_holding(ctx.caller, current_fees, env.now);
                self.ledger.initialise_position(id, unit_price, 0)?;
                id
            }
        };

        let shares = self.ledger.shares_for_deposit(deposit_value, total.max)?;
        env.wallets.debit(ctx.caller, asset, amount)?;
        self.book.credit(asset, amount)?;
        self.book.add_active_asset(asset)?;
        self.ledger.mint(token_id, shares, unit_price)?;
        self.ledger
            .set_unlock_time(token_id, env.now.saturating_add(env.registry.deposit_lockup()))?;

        info!(
            vault = %self.address,
            token_id,
            %asset,
            amount,
            value = deposit_value,
            shares,
            "deposit"
        );
        Ok(token_id)
    }

    // -- withdrawals --------------------------------------------------------

    /// Burns `amount` shares of `token_id`, pays out the parent's local
    /// slice immediately and fans out a withdraw request per active child.
    pub fn withdraw(
        &mut self,
        env: &mut ChainEnv,
        integrations: &Integrations,
        ctx: &CallContext,
        token_id: TokenId,
        amount: u128,
        fees: &[u128],
    ) -> Result<Vec<Payout>, VaultError> {
        env.registry.ensure_not_paused()?;
        let holding = self.ledger.holding(token_id)?;
        if holding.owner != ctx.caller {
            return Err(VaultError::NotHoldingOwner {
                token_id,
                caller: ctx.caller,
            });
        }
        if env.now < holding.unlock_time {
            return Err(VaultError::HoldingLocked {
                token_id,
                unlock_time: holding.unlock_time,
            });
        }
        if self.bridge_in_progress {
            return Err(VaultError::BridgeInProgress);
        }
        if amount == 0 {
            return Err(VaultError::ZeroAmount);
        }
        let active = self.active_children();
        Self::check_fee_count(active.len(), fees)?;
        Self::check_attached(ctx, fees)?;

        let current_fees = self.fees.current();
        let in_sync = self.in_sync(env.now, env.registry.liveliness_threshold());
        let levy_price = if current_fees.performance_fee_bips == 0 && !in_sync {
            0
        } else {
            self.ensure_in_sync(env)?;
            let total = self.total_value_across_chains(env, integrations)?;
            self.unit_price(total.max)?
        };
        self.ledger.levy_fees(
            token_id,
            levy_price,
            env.now,
            env.registry.protocol_fee_share_bips(),
            current_fees,
        )?;

        let total_shares = self.ledger.total_shares();
        let portion = mul_div(amount, PORTION_SCALE, total_shares)?;
        self.ledger.burn(token_id, amount, env.now)?;

        let payouts = custody::redeem(&mut self.book, &env.registry, integrations, portion)?;
        for p in &payouts {
            env.wallets.credit(ctx.caller, p.asset, p.amount)?;
        }

        let remaining = PORTION_SCALE - portion;
        for chain in &active {
            if let Some(cv) = self.chain_values.get_mut(chain) {
                cv.min_value = mul_div(cv.min_value, remaining, PORTION_SCALE)?;
                cv.max_value = mul_div(cv.max_value, remaining, PORTION_SCALE)?;
            }
        }

        self.withdraws_in_progress = self
            .withdraws_in_progress
            .checked_add(active.len() as u32)
            .ok_or(MathError::Overflow)?;
        for (chain, fee) in active.iter().zip(fees) {
            let msg = Message::WithdrawRequest(WithdrawRequest {
                parent: self.vault_ref(),
                child: self.child_ref(*chain)?,
                token_id,
                withdrawer: ctx.caller,
                portion,
            });
            env.transport.send(*chain, &msg, *fee)?;
        }

        info!(
            vault = %self.address,
            token_id,
            shares = amount,
            portion,
            children = active.len(),
            "withdraw"
        );
        Ok(payouts)
    }

    pub fn receive_withdraw_complete(&mut self, chain: ChainId) -> Result<(), VaultError> {
        if !self.children.contains_key(&chain) {
            return Err(VaultError::UnknownChain(chain));
        }
        self.withdraws_in_progress = self.withdraws_in_progress.saturating_sub(1);
        debug!(
            vault = %self.address,
            chain,
            remaining = self.withdraws_in_progress,
            "child withdraw complete"
        );
        Ok(())
    }

    // -- bridging -----------------------------------------------------------

    /// Grants a single-use approval to bridge from `source_chain` to
    /// `dst_chain`.
    pub fn request_bridge_approval(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        source_chain: ChainId,
        dst_chain: ChainId,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.only_manager(ctx.caller)?;
        env.registry.ensure_not_paused()?;
        if self.bridge_in_progress {
            return Err(VaultError::BridgeInProgress);
        }
        if self.withdraws_in_progress > 0 {
            return Err(VaultError::WithdrawInProgress(self.withdraws_in_progress));
        }
        if env.now < self.manager_lockout_until {
            return Err(VaultError::ManagerLockout {
                until: self.manager_lockout_until,
            });
        }
        let is_member = |c: ChainId| c == self.chain_id || self.children.contains_key(&c);
        if !is_member(dst_chain) {
            return Err(VaultError::UnknownChain(dst_chain));
        }
        if source_chain == dst_chain {
            return Err(VaultError::InvalidTarget(dst_chain));
        }
        if source_chain != self.chain_id {
            if !self.children.contains_key(&source_chain) {
                return Err(VaultError::UnknownChain(source_chain));
            }
            if self.inactive.contains(&source_chain) {
                return Err(VaultError::InvalidTarget(source_chain));
            }
        }

        self.bridge_in_progress = true;
        self.bridge_approved_for = Some(dst_chain);
        self.inactive.remove(&dst_chain);

        if source_chain == self.chain_id {
            self.local_approval.grant(dst_chain, env.now);
        } else {
            let msg = Message::BridgeApprovalRequest(BridgeApprovalRequest {
                parent: self.vault_ref(),
                child: self.child_ref(source_chain)?,
                approved_for: dst_chain,
            });
            env.transport.send(source_chain, &msg, fee)?;
        }
        info!(vault = %self.address, source_chain, dst_chain, "bridge approval granted");
        Ok(())
    }

    /// Bridges local assets out of the parent chain using the local
    /// approval.
    #[allow(clippy::too_many_arguments)]
    pub fn bridge_asset(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        dst_chain: ChainId,
        asset: AssetId,
        amount: u128,
        min_amount_out: u128,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.only_manager(ctx.caller)?;
        env.registry.ensure_not_paused()?;
        match self.local_approval.approved_for() {
            None => return Err(VaultError::NoBridgeApproval),
            Some(approved) if approved != dst_chain => {
                return Err(VaultError::BridgeApprovalMismatch {
                    approved,
                    requested: dst_chain,
                })
            }
            Some(_) => {}
        }
        let dst_vault = self.child_ref(dst_chain)?.vault;
        self.local_approval.consume()?;
        let req = BridgeAssetRequest {
            dst_chain,
            dst_vault,
            src_vault: self.vault_ref(),
            parent: self.vault_ref(),
            asset,
            amount,
            min_amount_out,
        };
        env.transport.bridge_asset(&mut self.book, &req, fee)?;
        Ok(())
    }

    /// Cancels the parent-local approval.
    pub fn cancel_bridge_approval(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
    ) -> Result<(), VaultError> {
        let cooldown = env.transport.config().bridge_approval_cancel_cooldown();
        self.local_approval
            .cancel(ctx.caller, self.manager, env.now, cooldown)?;
        self.receive_bridge_approval_cancellation(ctx.caller, env.now);
        Ok(())
    }

    /// Releases the bridge lock. A cancellation forced by someone other
    /// than the manager locks the manager out of new approvals for an hour.
    pub fn receive_bridge_approval_cancellation(&mut self, requester: Address, now: u64) {
        self.bridge_in_progress = false;
        self.bridge_approved_for = None;
        if requester != self.manager {
            self.manager_lockout_until = now.saturating_add(MANAGER_BRIDGE_LOCKOUT);
        }
        info!(
            vault = %self.address,
            %requester,
            lockout_until = self.manager_lockout_until,
            "bridge approval cancelled"
        );
    }

    /// Assets landed on `chain`. Every cached child value is now stale.
    pub fn receive_bridged_asset_ack(&mut self, chain: ChainId) -> Result<(), VaultError> {
        if chain != self.chain_id && !self.children.contains_key(&chain) {
            return Err(VaultError::UnknownChain(chain));
        }
        self.bridge_in_progress = false;
        self.bridge_approved_for = None;
        self.inactive.remove(&chain);
        for cv in self.chain_values.values_mut() {
            cv.last_update = 0;
        }
        info!(vault = %self.address, chain, "bridged asset acknowledged; caches invalidated");
        Ok(())
    }

    /// Credits bridged assets that landed on the parent chain itself.
    pub fn receive_bridged_asset(&mut self, asset: AssetId, amount: u128) -> Result<(), VaultError> {
        self.book.credit(asset, amount)?;
        self.book.add_active_asset(asset)?;
        Ok(())
    }

    // -- child creation -----------------------------------------------------

    /// Asks `chain`'s transport to deploy a child vault. The fee covers the
    /// creation fee, the request, and the sibling broadcast that follows the
    /// reply.
    pub fn request_create_child(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        chain: ChainId,
        fee: u128,
    ) -> Result<(), VaultError> {
        self.only_manager(ctx.caller)?;
        env.registry.ensure_not_paused()?;
        if let Some(pending) = self.child_creation_in_progress {
            return Err(VaultError::ChildCreationInProgress(pending));
        }
        if chain == self.chain_id {
            return Err(VaultError::InvalidTarget(chain));
        }
        if self.children.contains_key(&chain) {
            return Err(VaultError::ChildExists(chain));
        }
        if ctx.value < fee {
            return Err(VaultError::InsufficientValue {
                required: fee,
                provided: ctx.value,
            });
        }

        let creation_fee = env.transport.config().vault_creation_fee();
        let request_quote = env
            .transport
            .quote(chain, MessageKind::VaultChildCreationRequest);
        let broadcast: u128 = self
            .children
            .keys()
            .map(|c| env.transport.quote(*c, MessageKind::AddVaultSiblingRequest))
            .sum();
        let required = creation_fee + request_quote + broadcast;
        if fee < required {
            return Err(VaultError::InsufficientValue {
                required,
                provided: fee,
            });
        }

        env.transport.debit(creation_fee)?;
        env.wallets
            .credit_native(env.registry.treasury(), creation_fee)?;

        let siblings = self
            .children
            .iter()
            .map(|(c, a)| VaultRef::new(*c, *a))
            .collect();
        let msg = Message::VaultChildCreationRequest(VaultChildCreationRequest {
            parent: self.vault_ref(),
            manager: self.manager,
            risk_profile: self.risk_profile,
            siblings,
        });
        // The broadcast share stays on the transport balance until the reply.
        env.transport.send(chain, &msg, fee - creation_fee - broadcast)?;
        self.child_creation_in_progress = Some(chain);
        info!(vault = %self.address, chain, "child creation requested");
        Ok(())
    }

    /// Records the new child as inactive and introduces it to every
    /// existing child.
    pub fn receive_child_created(
        &mut self,
        env: &mut ChainEnv,
        child: VaultRef,
    ) -> Result<(), VaultError> {
        if self.children.get(&child.chain_id) == Some(&child.vault) {
            debug!(vault = %self.address, chain = child.chain_id, "duplicate child creation reply");
            return Ok(());
        }
        if self.child_creation_in_progress != Some(child.chain_id) {
            return Err(VaultError::UnexpectedMessage {
                kind: MessageKind::ChildCreatedRequest,
                reason: format!("no child creation pending for chain {}", child.chain_id),
            });
        }

        let existing: Vec<VaultRef> = self
            .children
            .iter()
            .map(|(c, a)| VaultRef::new(*c, *a))
            .collect();
        self.children.insert(child.chain_id, child.vault);
        self.inactive.insert(child.chain_id);
        self.child_creation_in_progress = None;

        for sibling_of in existing {
            let msg = Message::AddVaultSiblingRequest(AddVaultSiblingRequest {
                child: sibling_of,
                sibling: child,
            });
            let fee = env
                .transport
                .quote(sibling_of.chain_id, MessageKind::AddVaultSiblingRequest);
            env.transport.send(sibling_of.chain_id, &msg, fee)?;
        }
        info!(vault = %self.address, child = %child, "child vault registered");
        Ok(())
    }

    // -- management ---------------------------------------------------------

    /// Hands the vault to `new_manager` on every chain. One fee per child,
    /// inactive ones included.
    pub fn change_manager(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        new_manager: Address,
        fees: &[u128],
    ) -> Result<(), VaultError> {
        self.only_manager(ctx.caller)?;
        env.registry.ensure_not_paused()?;
        Self::check_fee_count(self.children.len(), fees)?;
        Self::check_attached(ctx, fees)?;

        self.manager = new_manager;
        self.ledger.set_owner(MANAGER_HOLDING_ID, new_manager)?;

        let children: Vec<VaultRef> = self
            .children
            .iter()
            .map(|(c, a)| VaultRef::new(*c, *a))
            .collect();
        for (child, fee) in children.iter().zip(fees) {
            let msg = Message::ChangeManagerRequest(ChangeManagerRequest {
                parent: self.vault_ref(),
                child: *child,
                manager: new_manager,
            });
            env.transport.send(child.chain_id, &msg, *fee)?;
        }
        info!(vault = %self.address, manager = %new_manager, "manager changed");
        Ok(())
    }

    pub fn announce_fee_increase(
        &mut self,
        caller: Address,
        fees: FeeSchedule,
        now: u64,
    ) -> Result<(), VaultError> {
        self.only_manager(caller)?;
        self.fees.announce(fees, now)?;
        Ok(())
    }

    pub fn commit_fee_increase(&mut self, caller: Address, now: u64) -> Result<FeeSchedule, VaultError> {
        self.only_manager(caller)?;
        Ok(self.fees.commit(now)?)
    }

    pub fn renounce_fee_increase(&mut self, caller: Address) -> Result<(), VaultError> {
        self.only_manager(caller)?;
        self.fees.renounce()?;
        Ok(())
    }

    pub fn decrease_fees(&mut self, caller: Address, fees: FeeSchedule) -> Result<(), VaultError> {
        self.only_manager(caller)?;
        self.fees.decrease(fees)?;
        info!(
            vault = %self.address,
            streaming = fees.streaming_fee_bips,
            performance = fees.performance_fee_bips,
            "fees decreased"
        );
        Ok(())
    }

    pub fn set_holding_discount(
        &mut self,
        caller: Address,
        token_id: TokenId,
        discount_bips: u32,
    ) -> Result<(), VaultError> {
        self.only_manager(caller)?;
        self.ledger.set_discount(token_id, discount_bips)?;
        Ok(())
    }

    /// Levies fees on the given holdings at the current unit price. Each
    /// holding can be levied this way at most once per interval.
    pub fn levy_fees_on_holdings(
        &mut self,
        env: &mut ChainEnv,
        integrations: &Integrations,
        caller: Address,
        token_ids: &[TokenId],
    ) -> Result<Vec<FeeLevy>, VaultError> {
        self.only_manager(caller)?;
        env.registry.ensure_not_paused()?;
        self.ensure_in_sync(env)?;
        let total = self.total_value_across_chains(env, integrations)?;
        let price = self.unit_price(total.max)?;
        let current = self.fees.current();

        let mut levies = Vec::with_capacity(token_ids.len());
        for id in token_ids {
            let holding = self.ledger.holding(*id)?;
            let ready_at = holding
                .last_manager_fee_levy_time
                .saturating_add(MANAGER_FEE_LEVY_INTERVAL);
            if env.now < ready_at {
                return Err(VaultError::ManagerLevyTooSoon {
                    token_id: *id,
                    ready_at,
                });
            }
            let levy = self.ledger.levy_fees(
                *id,
                price,
                env.now,
                env.registry.protocol_fee_share_bips(),
                current,
            )?;
            self.ledger.mark_manager_levy(*id, env.now)?;
            levies.push(levy);
        }
        Ok(levies)
    }

    /// One-way. Blocks deposits; withdrawals keep working.
    pub fn close_vault(&mut self, caller: Address) -> Result<(), VaultError> {
        self.only_manager(caller)?;
        if self.closed {
            return Err(VaultError::Closed);
        }
        self.closed = true;
        info!(vault = %self.address, "vault closed");
        Ok(())
    }

    pub fn execute_trade(
        &mut self,
        env: &ChainEnv,
        integrations: &Integrations,
        caller: Address,
        kind: ExecutorKind,
        trade: &Trade,
    ) -> Result<u64, VaultError> {
        self.only_manager(caller)?;
        custody::execute_trade(
            TradeContext {
                book: &mut self.book,
                cpit: &mut self.cpit,
                risk_profile: self.risk_profile,
                registry: &env.registry,
                integrations,
                now: env.now,
            },
            kind,
            trade,
        )
    }
}
