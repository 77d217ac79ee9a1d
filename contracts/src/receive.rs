//! Inbound message and bridge delivery handling.
//!
//! Every packet is authenticated against the transport's trusted remotes,
//! decoded, and dispatched under an execution meter sized by the packet's
//! gas limit. Handlers check the origin of each message against the vault
//! topology they already know: a child only obeys its own parent, a parent
//! only listens to its registered children.

use std::collections::BTreeMap;

use crossvault_protocol::config::{HANDLER_BASE_COST, PER_ASSET_COST, VALUE_HANDLER_BUDGET_FLOOR};
use crossvault_protocol::integrations::{Accountant, ExecutionMeter};
use crossvault_protocol::transport::{
    BridgeDelivery, BridgedAssetAcknowledgement, ChildCreatedRequest, InboundPacket, Message,
    MessageKind, ValueUpdatedRequest, WithdrawComplete,
};
use crossvault_protocol::{Address, ChainId, VaultRef};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::child::ChildVault;
use crate::error::VaultError;
use crate::parent::{ChainValue, ParentVault};

// ---------------------------------------------------------------------------
// Origin checks
// ---------------------------------------------------------------------------

fn unexpected(kind: MessageKind, reason: impl Into<String>) -> VaultError {
    VaultError::UnexpectedMessage {
        kind,
        reason: reason.into(),
    }
}

/// The local child `child`, provided the message came from its parent.
fn child_from_parent<'a>(
    children: &'a mut BTreeMap<Address, ChildVault>,
    chain_id: ChainId,
    src_chain: ChainId,
    parent: VaultRef,
    child: VaultRef,
    kind: MessageKind,
) -> Result<&'a mut ChildVault, VaultError> {
    if child.chain_id != chain_id {
        return Err(unexpected(kind, format!("addressed to chain {}", child.chain_id)));
    }
    if parent.chain_id != src_chain {
        return Err(unexpected(kind, format!("parent on chain {} sent from {src_chain}", parent.chain_id)));
    }
    let vault = children
        .get_mut(&child.vault)
        .ok_or(VaultError::UnknownVault(child.vault))?;
    if vault.parent() != parent {
        return Err(unexpected(kind, format!("{parent} is not the parent of {child}")));
    }
    Ok(vault)
}

/// The local parent `parent`, provided `child` is its registered child on
/// the sending chain.
fn parent_from_child<'a>(
    parents: &'a mut BTreeMap<Address, ParentVault>,
    chain_id: ChainId,
    src_chain: ChainId,
    parent: VaultRef,
    child: VaultRef,
    kind: MessageKind,
) -> Result<&'a mut ParentVault, VaultError> {
    if parent.chain_id != chain_id {
        return Err(unexpected(kind, format!("addressed to chain {}", parent.chain_id)));
    }
    if child.chain_id != src_chain {
        return Err(unexpected(kind, format!("child on chain {} sent from {src_chain}", child.chain_id)));
    }
    let vault = parents
        .get_mut(&parent.vault)
        .ok_or(VaultError::UnknownVault(parent.vault))?;
    if vault.children().get(&src_chain) != Some(&child.vault) {
        return Err(unexpected(kind, format!("{child} is not a child of {parent}")));
    }
    Ok(vault)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

impl Chain {
    /// Entry point called by the messaging endpoint.
    ///
    /// An `Err` means the packet must be stored and retried; every change
    /// the handler made has been rolled back.
    pub fn receive_packet(&mut self, caller: Address, packet: &InboundPacket) -> Result<(), VaultError> {
        self.transact("receive_packet", |chain| {
            chain
                .env
                .transport
                .authenticate(caller, packet.src_chain, packet.src_address)?;
            chain.env.transport.credit(packet.airdrop)?;

            let message = Message::decode(&packet.payload)?;
            let kind = message.kind();
            let mut meter = ExecutionMeter::new(packet.gas_limit);
            meter.charge(HANDLER_BASE_COST)?;
            debug!(
                chain = chain.env.chain_id,
                id = %packet.id,
                ?kind,
                src = packet.src_chain,
                gas = packet.gas_limit,
                "packet received"
            );
            chain.dispatch(packet.src_chain, message, &mut meter)
        })
    }

    fn dispatch(
        &mut self,
        src_chain: ChainId,
        message: Message,
        meter: &mut ExecutionMeter,
    ) -> Result<(), VaultError> {
        let kind = message.kind();
        let chain_id = self.env.chain_id;
        match message {
            Message::ValueUpdateRequest(m) => self.handle_value_request(src_chain, m.parent, m.child, meter),

            Message::ValueUpdatedRequest(m) => {
                let parent = parent_from_child(&mut self.parents, chain_id, src_chain, m.parent, m.child, kind)?;
                parent.receive_child_value(
                    src_chain,
                    ChainValue {
                        min_value: m.min_value,
                        max_value: m.max_value,
                        last_update: m.time,
                        has_hard_deprecated_asset: m.has_hard_deprecated_asset,
                    },
                );
                Ok(())
            }

            Message::WithdrawRequest(m) => {
                let child = child_from_parent(&mut self.children, chain_id, src_chain, m.parent, m.child, kind)?;
                let assets = child.book().enabled_count() as u64;
                meter.charge(PER_ASSET_COST.saturating_mul(assets))?;
                child.receive_withdraw_request(&mut self.env, &self.integrations, m.withdrawer, m.portion)?;

                let reply = Message::WithdrawComplete(WithdrawComplete {
                    parent: m.parent,
                    child: m.child,
                });
                let fee = self.env.transport.quote(m.parent.chain_id, MessageKind::WithdrawComplete);
                self.env.transport.send(m.parent.chain_id, &reply, fee)?;
                Ok(())
            }

            Message::WithdrawComplete(m) => {
                let parent = parent_from_child(&mut self.parents, chain_id, src_chain, m.parent, m.child, kind)?;
                parent.receive_withdraw_complete(src_chain)
            }

            Message::VaultChildCreationRequest(m) => {
                if m.parent.chain_id != src_chain {
                    return Err(unexpected(kind, format!("parent on chain {} sent from {src_chain}", m.parent.chain_id)));
                }
                // Duplicate delivery: answer again with the existing child.
                let child = match self.child_of(m.parent) {
                    Some(existing) => existing.vault_ref(),
                    None => self.deploy_child(m.parent, m.manager, m.risk_profile, &m.siblings),
                };
                let reply = Message::ChildCreatedRequest(ChildCreatedRequest {
                    parent: m.parent,
                    child,
                });
                let fee = self.env.transport.quote(src_chain, MessageKind::ChildCreatedRequest);
                self.env.transport.send(src_chain, &reply, fee)?;
                Ok(())
            }

            Message::ChildCreatedRequest(m) => {
                if m.parent.chain_id != chain_id || m.child.chain_id != src_chain {
                    return Err(unexpected(kind, format!("{} does not live on chain {src_chain}", m.child)));
                }
                let parent = self
                    .parents
                    .get_mut(&m.parent.vault)
                    .ok_or(VaultError::UnknownVault(m.parent.vault))?;
                parent.receive_child_created(&mut self.env, m.child)
            }

            Message::BridgeApprovalRequest(m) => {
                let child = child_from_parent(&mut self.children, chain_id, src_chain, m.parent, m.child, kind)?;
                child.receive_bridge_approval(m.approved_for, self.env.now);
                Ok(())
            }

            Message::BridgeApprovalCancellationRequest(m) => {
                let parent = parent_from_child(&mut self.parents, chain_id, src_chain, m.parent, m.child, kind)?;
                parent.receive_bridge_approval_cancellation(m.requester, self.env.now);
                Ok(())
            }

            Message::ChangeManagerRequest(m) => {
                let child = child_from_parent(&mut self.children, chain_id, src_chain, m.parent, m.child, kind)?;
                child.receive_manager_change(m.manager);
                Ok(())
            }

            Message::AddVaultSiblingRequest(m) => {
                if m.child.chain_id != chain_id {
                    return Err(unexpected(kind, format!("addressed to chain {}", m.child.chain_id)));
                }
                let child = self
                    .children
                    .get_mut(&m.child.vault)
                    .ok_or(VaultError::UnknownVault(m.child.vault))?;
                if child.parent().chain_id != src_chain {
                    return Err(unexpected(kind, format!("sent from chain {src_chain}, not the parent chain")));
                }
                child.receive_add_sibling(m.sibling);
                Ok(())
            }

            Message::BridgedAssetAcknowledgement(m) => {
                let parent = parent_from_child(&mut self.parents, chain_id, src_chain, m.parent, m.receiver, kind)?;
                parent.receive_bridged_asset_ack(src_chain)
            }
        }
    }

    /// Values the child and reports back to the parent.
    ///
    /// A valuation failure that may be budget exhaustion fails the handler
    /// so the relayer retries with the stored payload. Any other failure is
    /// logged and absorbed: the parent simply stays without a fresh value.
    fn handle_value_request(
        &mut self,
        src_chain: ChainId,
        parent: VaultRef,
        child: VaultRef,
        meter: &mut ExecutionMeter,
    ) -> Result<(), VaultError> {
        let chain_id = self.env.chain_id;
        let vault = child_from_parent(
            &mut self.children,
            chain_id,
            src_chain,
            parent,
            child,
            MessageKind::ValueUpdateRequest,
        )?;

        let value = match Accountant::vault_value(vault.book(), &self.env.registry, &self.integrations, meter) {
            Ok(v) => v,
            Err(e) if e.is_budget_exhausted() || meter.remaining() < VALUE_HANDLER_BUDGET_FLOOR => {
                return Err(VaultError::Delivery(format!(
                    "valuation failed with {} gas left: {e}",
                    meter.remaining()
                )));
            }
            Err(e) => {
                warn!(vault = %child.vault, error = %e, "valuation failed; value request absorbed");
                return Ok(());
            }
        };

        let reply = Message::ValueUpdatedRequest(ValueUpdatedRequest {
            parent,
            child,
            min_value: value.min,
            max_value: value.max,
            time: self.env.now,
            has_hard_deprecated_asset: value.has_hard_deprecated_asset,
        });
        let fee = self.env.transport.quote(parent.chain_id, MessageKind::ValueUpdatedRequest);
        self.env.transport.send(parent.chain_id, &reply, fee)?;
        debug!(vault = %child.vault, min = value.min, max = value.max, "value reported");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bridge deliveries
    // -----------------------------------------------------------------------

    /// Entry point called by the bridge router when a transfer lands.
    pub fn receive_bridged_asset(&mut self, caller: Address, delivery: &BridgeDelivery) -> Result<(), VaultError> {
        self.transact("receive_bridged_asset", |chain| {
            chain.env.transport.authenticate_bridge(caller)?;
            chain.env.transport.credit(delivery.airdrop)?;
            let asset = chain.env.transport.pool_asset(delivery.dst_pool)?;
            let payload = delivery.payload;
            let amount = delivery.amount_received;
            let chain_id = chain.env.chain_id;

            if let Some(parent) = chain.parents.get_mut(&payload.dst_vault) {
                if payload.parent != parent.vault_ref() {
                    return Err(VaultError::UnknownVault(payload.dst_vault));
                }
                parent.receive_bridged_asset(asset, amount)?;
                parent.receive_bridged_asset_ack(chain_id)?;
                info!(vault = %payload.dst_vault, %asset, amount, "bridged asset received by parent");
                return Ok(());
            }

            let child = chain
                .children
                .get_mut(&payload.dst_vault)
                .ok_or(VaultError::UnknownVault(payload.dst_vault))?;
            if child.parent() != payload.parent {
                return Err(VaultError::UnknownVault(payload.dst_vault));
            }
            child.book_mut().credit(asset, amount)?;
            child.book_mut().add_active_asset(asset)?;
            let receiver = child.vault_ref();

            let ack = Message::BridgedAssetAcknowledgement(BridgedAssetAcknowledgement {
                parent: payload.parent,
                receiver,
            });
            let fee = chain
                .env
                .transport
                .quote(payload.parent.chain_id, MessageKind::BridgedAssetAcknowledgement);
            chain.env.transport.send(payload.parent.chain_id, &ack, fee)?;
            info!(vault = %payload.dst_vault, %asset, amount, "bridged asset received by child");
            Ok(())
        })
    }
}
