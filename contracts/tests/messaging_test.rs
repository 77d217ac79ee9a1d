//! Integration tests for cross-chain messaging: child creation, sibling
//! links, manager propagation, value sync and stored payload retries.

mod common;

use common::{usdc, Harness, CHAIN_B, CHAIN_C, ONE, PARENT};
use crossvault_contracts::chain::transport_address;
use crossvault_contracts::{CallContext, Delivery, SyncState, VaultError};
use crossvault_protocol::config::MANAGER_HOLDING_ID;
use crossvault_protocol::relay::PacketPath;
use crossvault_protocol::transport::{
    InboundPacket, Message, MessageKind, TransportError, ValueUpdatedRequest,
};
use crossvault_protocol::{Address, VaultRef};
use uuid::Uuid;

fn funded_child() -> Harness {
    let mut h = Harness::new();
    h.create_child(CHAIN_B);
    h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    h.bridge_from_parent(CHAIN_B, 50 * ONE);
    h
}

fn sync_state(h: &Harness) -> SyncState {
    h.net.chain(PARENT).unwrap().sync_state(&h.vault).unwrap()
}

// ---------------------------------------------------------------------------
// Child creation
// ---------------------------------------------------------------------------

#[test]
fn children_learn_about_each_other() {
    let mut h = Harness::new();
    let b = h.create_child(CHAIN_B);
    let c = h.create_child(CHAIN_C);

    let p = h.parent();
    assert_eq!(p.children().get(&CHAIN_B), Some(&b));
    assert_eq!(p.children().get(&CHAIN_C), Some(&c));
    assert!(p.is_inactive(CHAIN_B) && p.is_inactive(CHAIN_C));
    assert_eq!(p.child_creation_in_progress(), None);

    assert_eq!(h.child(CHAIN_B).siblings().get(&CHAIN_C), Some(&c));
    assert_eq!(h.child(CHAIN_C).siblings().get(&CHAIN_B), Some(&b));
    assert_eq!(h.child(CHAIN_C).parent(), h.parent_ref());
    assert_eq!(h.child(CHAIN_C).manager(), h.manager);
}

#[test]
fn creation_fee_goes_to_the_treasury() {
    let mut h = Harness::new();
    let owner = h.owner;
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .transport_mut()
        .set_vault_creation_fee(owner, 5 * ONE / 1_000)
        .unwrap();
    h.create_child(CHAIN_B);
    assert_eq!(
        h.net
            .chain(PARENT)
            .unwrap()
            .wallets()
            .native_balance(&h.treasury),
        5 * ONE / 1_000
    );
}

#[test]
fn one_child_creation_at_a_time() {
    let mut h = Harness::new();
    let fee = h.quote(PARENT, CHAIN_B, MessageKind::VaultChildCreationRequest);
    let (manager, vault) = (h.manager, h.vault);
    let parent = h.net.chain_mut(PARENT).unwrap();
    parent
        .request_create_child(CallContext::with_value(manager, fee), vault, CHAIN_B, fee)
        .unwrap();
    assert_eq!(
        parent
            .request_create_child(CallContext::with_value(manager, fee), vault, CHAIN_C, fee)
            .unwrap_err(),
        VaultError::ChildCreationInProgress(CHAIN_B)
    );
    h.net.deliver_all();
    assert_eq!(
        h.net
            .chain_mut(PARENT)
            .unwrap()
            .request_create_child(CallContext::with_value(manager, fee), vault, CHAIN_B, fee)
            .unwrap_err(),
        VaultError::ChildExists(CHAIN_B)
    );
}

#[test]
fn underpaid_creation_is_rejected() {
    let mut h = Harness::new();
    let fee = h.quote(PARENT, CHAIN_B, MessageKind::VaultChildCreationRequest);
    let (manager, vault) = (h.manager, h.vault);
    let err = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .request_create_child(CallContext::with_value(manager, fee - 1), vault, CHAIN_B, fee - 1)
        .unwrap_err();
    assert_eq!(
        err,
        VaultError::InsufficientValue {
            required: fee,
            provided: fee - 1
        }
    );
    assert_eq!(h.net.relayer().pending_packets(), 0);
}

// ---------------------------------------------------------------------------
// Manager change
// ---------------------------------------------------------------------------

#[test]
fn manager_change_reaches_every_child() {
    let mut h = Harness::new();
    h.create_child(CHAIN_B);
    h.create_child(CHAIN_C);
    let new_manager = Address::from_label("new-manager");

    // Inactive children are told too.
    let fees: Vec<u128> = [CHAIN_B, CHAIN_C]
        .iter()
        .map(|c| h.quote(PARENT, *c, MessageKind::ChangeManagerRequest))
        .collect();
    let total: u128 = fees.iter().sum();
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .change_manager(CallContext::with_value(manager, total), vault, new_manager, &fees)
        .unwrap();
    h.net.deliver_all();

    let p = h.parent();
    assert_eq!(p.manager(), new_manager);
    assert_eq!(p.ledger().holding(MANAGER_HOLDING_ID).unwrap().owner, new_manager);
    assert_eq!(h.child(CHAIN_B).manager(), new_manager);
    assert_eq!(h.child(CHAIN_C).manager(), new_manager);

    assert_eq!(
        h.net
            .chain_mut(PARENT)
            .unwrap()
            .close_vault(CallContext::new(manager), vault)
            .unwrap_err(),
        VaultError::NotManager(manager)
    );
}

// ---------------------------------------------------------------------------
// Value sync
// ---------------------------------------------------------------------------

#[test]
fn value_sync_round_trip() {
    let mut h = funded_child();
    assert_eq!(sync_state(&h), SyncState::NotSynced);

    let fees = h.fan_out_fees(MessageKind::ValueUpdateRequest);
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .request_value_sync(CallContext::with_value(manager, fees[0]), vault, &fees)
        .unwrap();
    assert_eq!(sync_state(&h), SyncState::Syncing);

    // Request out, reply back.
    assert_eq!(h.net.deliver_all(), 2);
    assert_eq!(sync_state(&h), SyncState::Synced);
    let cv = h.parent().chain_value(CHAIN_B).unwrap();
    assert_eq!(cv.min_value, 50 * ONE);
    assert_eq!(cv.last_update, h.net.now());
}

#[test]
fn failing_valuation_is_absorbed() {
    let mut h = funded_child();
    h.prices.set_failing(usdc(CHAIN_B), true);
    h.sync();

    assert!(h.net.relayer().stored_payloads().is_empty());
    assert_eq!(sync_state(&h), SyncState::Syncing);

    h.prices.set_failing(usdc(CHAIN_B), false);
    h.sync();
    assert_eq!(sync_state(&h), SyncState::Synced);
}

#[test]
fn exhausted_budget_stores_the_payload_for_retry() {
    let mut h = funded_child();
    let owner = h.owner;
    // Enough for the handler entry, not for a price lookup.
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .transport_mut()
        .set_destination_gas(owner, CHAIN_B, MessageKind::ValueUpdateRequest, 22_000)
        .unwrap();
    h.sync();

    let path = PacketPath {
        src_chain: PARENT,
        src_address: transport_address(PARENT),
        dst_chain: CHAIN_B,
    };
    let stored = h.net.relayer().stored_payloads();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].packet.path(), path);
    assert!(h.net.relayer().is_blocked(&path));
    assert_eq!(sync_state(&h), SyncState::Syncing);

    // Same budget fails again and stays stored.
    assert!(matches!(
        h.net.retry_stored(&path, None),
        Some(Delivery::Stored { dst_chain: CHAIN_B, .. })
    ));
    assert_eq!(
        h.net.retry_stored(&path, Some(500_000)),
        Some(Delivery::Delivered { dst_chain: CHAIN_B })
    );
    assert!(!h.net.relayer().is_blocked(&path));
    h.net.deliver_all();
    assert_eq!(sync_state(&h), SyncState::Synced);
}

#[test]
fn sync_fee_count_must_match_active_children() {
    let mut h = funded_child();
    h.create_child(CHAIN_C);
    let (manager, vault) = (h.manager, h.vault);
    // C is inactive, so only B is asked.
    assert_eq!(
        h.net
            .chain_mut(PARENT)
            .unwrap()
            .request_value_sync(CallContext::new(manager), vault, &[0, 0])
            .unwrap_err(),
        VaultError::FeeCountMismatch { expected: 1, got: 2 }
    );
}

#[test]
fn value_reply_from_an_inactive_child_is_accepted_and_ignored() {
    let mut h = funded_child();
    h.create_child(CHAIN_C);
    assert!(h.parent().is_inactive(CHAIN_C));
    let before = h.parent().chain_value(CHAIN_C);
    let child_c = h.child(CHAIN_C).address();

    let reply = Message::ValueUpdatedRequest(ValueUpdatedRequest {
        parent: h.parent_ref(),
        child: VaultRef::new(CHAIN_C, child_c),
        min_value: 999 * ONE,
        max_value: 999 * ONE,
        time: h.net.now(),
        has_hard_deprecated_asset: false,
    });
    let packet = InboundPacket {
        id: Uuid::new_v4(),
        src_chain: CHAIN_C,
        src_address: transport_address(CHAIN_C),
        dst_address: transport_address(PARENT),
        payload: reply.encode().unwrap(),
        gas_limit: 500_000,
        airdrop: 0,
    };
    let endpoint = {
        use crossvault_protocol::transport::MessagingEndpoint;
        h.net.relayer().address()
    };
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .receive_packet(endpoint, &packet)
        .unwrap();

    let p = h.parent();
    assert!(p.is_inactive(CHAIN_C));
    assert_eq!(p.chain_value(CHAIN_C), before);
    assert_eq!(p.active_children(), vec![CHAIN_B]);
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[test]
fn packets_only_accepted_from_the_endpoint_and_trusted_remotes() {
    let mut h = Harness::new();
    let fee = h.quote(PARENT, CHAIN_B, MessageKind::VaultChildCreationRequest);
    let (manager, stranger, vault) = (h.manager, h.stranger, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .request_create_child(CallContext::with_value(manager, fee), vault, CHAIN_B, fee)
        .unwrap();
    let queued = h.net.relayer().next_packet().unwrap();
    let endpoint = {
        use crossvault_protocol::transport::MessagingEndpoint;
        h.net.relayer().address()
    };
    let chain_b = h.net.chain_mut(CHAIN_B).unwrap();

    assert_eq!(
        chain_b.receive_packet(stranger, &queued.packet).unwrap_err(),
        VaultError::Transport(TransportError::NotEndpoint(stranger))
    );

    let mut forged = queued.packet.clone();
    forged.src_address = stranger;
    assert_eq!(
        chain_b.receive_packet(endpoint, &forged).unwrap_err(),
        VaultError::Transport(TransportError::UntrustedSource {
            chain: PARENT,
            address: stranger
        })
    );
    assert_eq!(chain_b.child_vaults().count(), 0);

    chain_b.receive_packet(endpoint, &queued.packet).unwrap();
    assert_eq!(chain_b.child_vaults().count(), 1);
}

#[test]
fn duplicate_creation_request_reuses_the_child() {
    let mut h = Harness::new();
    let fee = h.quote(PARENT, CHAIN_B, MessageKind::VaultChildCreationRequest);
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .request_create_child(CallContext::with_value(manager, fee), vault, CHAIN_B, fee)
        .unwrap();
    let queued = h.net.relayer().next_packet().unwrap();
    let endpoint = {
        use crossvault_protocol::transport::MessagingEndpoint;
        h.net.relayer().address()
    };
    let chain_b = h.net.chain_mut(CHAIN_B).unwrap();
    chain_b.receive_packet(endpoint, &queued.packet).unwrap();
    chain_b.receive_packet(endpoint, &queued.packet).unwrap();
    assert_eq!(chain_b.child_vaults().count(), 1);

    // Both replies land; the second is a no-op.
    h.net.deliver_all();
    assert_eq!(h.parent().children().len(), 1);
    assert!(h.net.relayer().stored_payloads().is_empty());
}
