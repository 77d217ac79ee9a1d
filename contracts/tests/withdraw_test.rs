//! Integration tests for withdrawals across the parent and its children.
//!
//! These run the whole message flow over the local network: withdraw
//! fan-out, child redemption, completion acknowledgements and the cache
//! discount applied in between.

mod common;

use common::{usdc, Harness, CHAIN_B, CHAIN_C, ONE, PARENT};
use crossvault_contracts::{CallContext, SyncState, VaultError};
use crossvault_protocol::config::{DAY, PORTION_SCALE};
use crossvault_protocol::ledger::FeeSchedule;
use crossvault_protocol::transport::MessageKind;

/// Parent on chain 1 with children on B and C holding 100 and 50 USDC.
/// B's USDC is valued in a 1.0–1.2 band, so B reports {100, 120}.
fn funded_bc() -> (Harness, u64) {
    let mut h = Harness::new();
    h.create_child(CHAIN_B);
    h.create_child(CHAIN_C);
    let token = h.deposit(h.investor, usdc(PARENT), 150 * ONE).unwrap();

    h.bridge_from_parent(CHAIN_B, 100 * ONE);
    h.bridge_from_parent(CHAIN_C, 50 * ONE);
    h.prices.set_price_band(usdc(CHAIN_B), ONE, 12 * ONE / 10);
    h.sync();
    (h, token)
}

fn withdraw(h: &mut Harness, token: u64, shares: u128) -> Result<(), VaultError> {
    let fees = h.fan_out_fees(MessageKind::WithdrawRequest);
    let total: u128 = fees.iter().sum();
    let (investor, vault) = (h.investor, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::with_value(investor, total), vault, token, shares, &fees)
        .map(|_| ())
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[test]
fn half_withdraw_discounts_child_caches_until_both_complete() {
    let (mut h, token) = funded_bc();

    let total = h.net.chain(PARENT).unwrap().total_value(&h.vault).unwrap();
    assert_eq!((total.min, total.max), (150 * ONE, 170 * ONE));
    assert_eq!(
        h.net.chain(PARENT).unwrap().sync_state(&h.vault).unwrap(),
        SyncState::Synced
    );

    withdraw(&mut h, token, 75 * ONE).unwrap();

    let p = h.parent();
    let b = p.chain_value(CHAIN_B).unwrap();
    let c = p.chain_value(CHAIN_C).unwrap();
    assert_eq!((b.min_value, b.max_value), (50 * ONE, 60 * ONE));
    assert_eq!((c.min_value, c.max_value), (25 * ONE, 25 * ONE));
    assert_eq!(p.withdraws_in_progress(), 2);

    // Both requests land before either acknowledgement comes back.
    h.net.deliver_next().unwrap();
    h.net.deliver_next().unwrap();
    assert_eq!(h.parent().withdraws_in_progress(), 2);

    h.net.deliver_next().unwrap();
    assert_eq!(h.parent().withdraws_in_progress(), 1);
    h.net.deliver_next().unwrap();
    assert_eq!(h.parent().withdraws_in_progress(), 0);

    assert_eq!(h.wallet(CHAIN_B, h.investor, usdc(CHAIN_B)), 50 * ONE);
    assert_eq!(h.wallet(CHAIN_C, h.investor, usdc(CHAIN_C)), 25 * ONE);
    assert_eq!(h.child(CHAIN_B).book().balance(&usdc(CHAIN_B)), 50 * ONE);
}

#[test]
fn value_sync_refused_while_withdraws_in_flight() {
    let (mut h, token) = funded_bc();
    withdraw(&mut h, token, 15 * ONE).unwrap();

    let fees = h.fan_out_fees(MessageKind::ValueUpdateRequest);
    let (manager, vault) = (h.manager, h.vault);
    let total: u128 = fees.iter().sum();
    let err = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .request_value_sync(CallContext::with_value(manager, total), vault, &fees)
        .unwrap_err();
    assert_eq!(err, VaultError::WithdrawInProgress(2));

    h.net.deliver_all();
    h.sync();
    let b = h.parent().chain_value(CHAIN_B).unwrap();
    // 10% of B's USDC left with the investor.
    assert_eq!(b.min_value, 90 * ONE);
}

#[test]
fn value_replies_in_flight_when_a_withdraw_starts_are_ignored() {
    let (mut h, token) = funded_bc();
    let fees = h.fan_out_fees(MessageKind::ValueUpdateRequest);
    let total: u128 = fees.iter().sum();
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .request_value_sync(CallContext::with_value(manager, total), vault, &fees)
        .unwrap();

    // Both children value themselves; the replies are still on the wire.
    h.net.deliver_next().unwrap();
    h.net.deliver_next().unwrap();
    withdraw(&mut h, token, 75 * ONE).unwrap();
    let b = h.parent().chain_value(CHAIN_B).unwrap();
    assert_eq!((b.min_value, b.max_value), (50 * ONE, 60 * ONE));

    // The pre-withdraw values {100, 120} and {50, 50} land and are dropped.
    h.net.deliver_next().unwrap();
    h.net.deliver_next().unwrap();
    let p = h.parent();
    let b = p.chain_value(CHAIN_B).unwrap();
    let c = p.chain_value(CHAIN_C).unwrap();
    assert_eq!((b.min_value, b.max_value), (50 * ONE, 60 * ONE));
    assert_eq!((c.min_value, c.max_value), (25 * ONE, 25 * ONE));
    assert_ne!(
        h.net.chain(PARENT).unwrap().sync_state(&vault).unwrap(),
        SyncState::Syncing
    );

    h.net.deliver_all();
    assert_eq!(h.parent().withdraws_in_progress(), 0);
    assert_eq!(h.parent().chain_value(CHAIN_B).unwrap().min_value, 50 * ONE);
}

#[test]
fn fee_count_must_match_active_children() {
    let (mut h, token) = funded_bc();
    let (investor, vault) = (h.investor, h.vault);
    let err = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::new(investor), vault, token, ONE, &[0])
        .unwrap_err();
    assert_eq!(err, VaultError::FeeCountMismatch { expected: 2, got: 1 });
    assert_eq!(h.parent().ledger().holding(token).unwrap().total_shares, 150 * ONE);
}

// ---------------------------------------------------------------------------
// Single chain
// ---------------------------------------------------------------------------

#[test]
fn deposit_then_full_withdraw_returns_everything() {
    let mut h = Harness::new();
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    assert_eq!(h.wallet(PARENT, h.investor, usdc(PARENT)), 0);

    let payouts = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::new(h.investor), h.vault, token, 100 * ONE, &[])
        .unwrap();

    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount, 100 * ONE);
    assert_eq!(h.wallet(PARENT, h.investor, usdc(PARENT)), 100 * ONE);
    let ledger = h.parent().ledger();
    assert_eq!(ledger.total_shares(), 0);
    assert!(ledger.check_invariant());
    assert!(!h.parent().book().is_enabled(&usdc(PARENT)));
}

#[test]
fn only_the_owner_withdraws() {
    let mut h = Harness::new();
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    let err = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::new(h.stranger), h.vault, token, ONE, &[])
        .unwrap_err();
    assert_eq!(
        err,
        VaultError::NotHoldingOwner {
            token_id: token,
            caller: h.stranger
        }
    );
}

#[test]
fn locked_holding_waits_for_unlock() {
    let mut h = Harness::new();
    let owner = h.owner;
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .registry_mut()
        .set_deposit_lockup(owner, DAY)
        .unwrap();
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();

    let (investor, vault) = (h.investor, h.vault);
    let err = h
        .net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::new(investor), vault, token, ONE, &[])
        .unwrap_err();
    assert!(matches!(err, VaultError::HoldingLocked { .. }));

    h.net.advance_time(DAY);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .withdraw(CallContext::new(investor), vault, token, ONE, &[])
        .unwrap();
}

#[test]
fn stale_caches_only_block_withdraws_with_a_performance_fee() {
    // Without a performance fee the holding is levied at price zero, which
    // never needs fresh child values.
    let (mut h, token) = funded_bc();
    h.net.advance_time(DAY);
    assert_eq!(
        h.net.chain(PARENT).unwrap().sync_state(&h.vault).unwrap(),
        SyncState::NotSynced
    );
    withdraw(&mut h, token, 15 * ONE).unwrap();
    h.net.deliver_all();

    let mut h = Harness::with_fees(FeeSchedule::new(0, 1_000));
    h.create_child(CHAIN_B);
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    h.bridge_from_parent(CHAIN_B, 50 * ONE);
    h.sync();
    h.net.advance_time(DAY);
    assert_eq!(withdraw(&mut h, token, ONE), Err(VaultError::NotInSync));

    h.sync();
    withdraw(&mut h, token, ONE).unwrap();
}

#[test]
fn portion_is_share_of_total_supply() {
    let (mut h, token) = funded_bc();
    let second = h.deposit(h.stranger, usdc(PARENT), 150 * ONE).unwrap();
    // 150 USDC at a max unit price of 170/150 buys 150 × 150 / 170 shares.
    let issued = h.parent().ledger().holding(second).unwrap().total_shares;
    assert_eq!(issued, 150 * ONE * 150 / 170);

    withdraw(&mut h, token, 150 * ONE).unwrap();
    let supply_before = 150 * ONE + issued;
    let expected = 150 * ONE * PORTION_SCALE / supply_before;
    let b = h.parent().chain_value(CHAIN_B).unwrap();
    assert_eq!(b.min_value, 100 * ONE * (PORTION_SCALE - expected) / PORTION_SCALE);
}
