//! Child vault: holds assets on a non-parent chain and acts only on
//! authenticated requests from its parent (and, for bridging, its
//! manager).

use std::collections::BTreeMap;

use crossvault_protocol::assets::AssetBook;
use crossvault_protocol::cpit::CpitTracker;
use crossvault_protocol::integrations::{ExecutorKind, Integrations, Payout, Trade};
use crossvault_protocol::transport::{
    BridgeApprovalCancellationRequest, BridgeAssetRequest, Message,
};
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, AssetId, ChainId, VaultRef};
use tracing::{debug, info};

use crate::approval::BridgeApproval;
use crate::chain::{CallContext, ChainEnv};
use crate::custody::{self, TradeContext};
use crate::error::VaultError;

#[derive(Clone, Debug)]
pub struct ChildVault {
    address: Address,
    chain_id: ChainId,
    parent: VaultRef,
    siblings: BTreeMap<ChainId, Address>,
    manager: Address,
    risk_profile: RiskProfile,
    book: AssetBook,
    cpit: CpitTracker,
    approval: BridgeApproval,
}

impl ChildVault {
    pub fn new(
        address: Address,
        env: &ChainEnv,
        parent: VaultRef,
        manager: Address,
        risk_profile: RiskProfile,
        siblings: &[VaultRef],
    ) -> Self {
        Self {
            address,
            chain_id: env.chain_id,
            parent,
            siblings: siblings.iter().map(|s| (s.chain_id, s.vault)).collect(),
            manager,
            risk_profile,
            book: AssetBook::new(env.registry.max_active_assets()),
            cpit: CpitTracker::new(),
            approval: BridgeApproval::default(),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn vault_ref(&self) -> VaultRef {
        VaultRef::new(self.chain_id, self.address)
    }

    pub fn parent(&self) -> VaultRef {
        self.parent
    }

    pub fn siblings(&self) -> &BTreeMap<ChainId, Address> {
        &self.siblings
    }

    pub fn manager(&self) -> Address {
        self.manager
    }

    pub fn risk_profile(&self) -> RiskProfile {
        self.risk_profile
    }

    pub fn book(&self) -> &AssetBook {
        &self.book
    }

    pub fn book_mut(&mut self) -> &mut AssetBook {
        &mut self.book
    }

    pub fn cpit(&self) -> &CpitTracker {
        &self.cpit
    }

    pub fn approval(&self) -> BridgeApproval {
        self.approval
    }

    fn only_manager(&self, caller: Address) -> Result<(), VaultError> {
        if caller != self.manager {
            return Err(VaultError::NotManager(caller));
        }
        Ok(())
    }

    /// Address of the vault on `chain`, which must be the parent or a
    /// known sibling.
    fn target(&self, chain: ChainId) -> Result<Address, VaultError> {
        if chain == self.parent.chain_id {
            return Ok(self.parent.vault);
        }
        self.siblings
            .get(&chain)
            .copied()
            .ok_or(VaultError::InvalidTarget(chain))
    }

    // -- parent requests ----------------------------------------------------

    /// Redeems `portion` of every enabled asset straight to `withdrawer`.
    pub fn receive_withdraw_request(
        &mut self,
        env: &mut ChainEnv,
        integrations: &Integrations,
        withdrawer: Address,
        portion: u128,
    ) -> Result<Vec<Payout>, VaultError> {
        let payouts = custody::redeem(&mut self.book, &env.registry, integrations, portion)?;
        for p in &payouts {
            env.wallets.credit(withdrawer, p.asset, p.amount)?;
        }
        info!(
            vault = %self.address,
            %withdrawer,
            portion,
            payouts = payouts.len(),
            "child withdraw processed"
        );
        Ok(payouts)
    }

    pub fn receive_bridge_approval(&mut self, approved_for: ChainId, now: u64) {
        self.approval.grant(approved_for, now);
        info!(vault = %self.address, approved_for, "bridge approval received");
    }

    pub fn receive_add_sibling(&mut self, sibling: VaultRef) {
        if sibling.chain_id == self.chain_id || sibling.chain_id == self.parent.chain_id {
            debug!(vault = %self.address, sibling = %sibling, "sibling ignored");
            return;
        }
        self.siblings.insert(sibling.chain_id, sibling.vault);
        debug!(vault = %self.address, sibling = %sibling, "sibling added");
    }

    pub fn receive_manager_change(&mut self, manager: Address) {
        self.manager = manager;
        info!(vault = %self.address, %manager, "manager changed");
    }

    // -- manager operations -------------------------------------------------

    /// Bridges assets to the chain named in the approval.
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
        match self.approval.approved_for() {
            None => return Err(VaultError::NoBridgeApproval),
            Some(approved) if approved != dst_chain => {
                return Err(VaultError::BridgeApprovalMismatch {
                    approved,
                    requested: dst_chain,
                })
            }
            Some(_) => {}
        }
        let dst_vault = self.target(dst_chain)?;
        self.approval.consume()?;

        let req = BridgeAssetRequest {
            dst_chain,
            dst_vault,
            src_vault: self.vault_ref(),
            parent: self.parent,
            asset,
            amount,
            min_amount_out,
        };
        env.transport.bridge_asset(&mut self.book, &req, fee)?;
        Ok(())
    }

    /// Cancels an unused approval and tells the parent to release its lock.
    pub fn cancel_bridge_approval(
        &mut self,
        env: &mut ChainEnv,
        ctx: &CallContext,
        fee: u128,
    ) -> Result<(), VaultError> {
        let cooldown = env.transport.config().bridge_approval_cancel_cooldown();
        self.approval
            .cancel(ctx.caller, self.manager, env.now, cooldown)?;
        let msg = Message::BridgeApprovalCancellationRequest(BridgeApprovalCancellationRequest {
            parent: self.parent,
            child: self.vault_ref(),
            requester: ctx.caller,
        });
        env.transport.send(self.parent.chain_id, &msg, fee)?;
        info!(vault = %self.address, requester = %ctx.caller, "bridge approval cancelled");
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
