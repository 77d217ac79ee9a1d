//! Integration tests for fee governance and manager-initiated levies.

mod common;

use common::{usdc, Harness, ONE, PARENT, START};
use crossvault_contracts::{CallContext, ErrorClass, VaultError};
use crossvault_protocol::config::{
    DAY, FEE_ANNOUNCEMENT_WINDOW, MANAGER_FEE_LEVY_INTERVAL, MANAGER_HOLDING_ID,
    PROTOCOL_HOLDING_ID, SECONDS_PER_YEAR,
};
use crossvault_protocol::ledger::{FeeSchedule, LedgerError};

fn announce(h: &mut Harness, fees: FeeSchedule) -> Result<(), VaultError> {
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .announce_fee_increase(CallContext::new(manager), vault, fees)
}

fn commit(h: &mut Harness) -> Result<FeeSchedule, VaultError> {
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .commit_fee_increase(CallContext::new(manager), vault)
}

fn levy(h: &mut Harness, ids: &[u64]) -> Result<Vec<crossvault_protocol::ledger::FeeLevy>, VaultError> {
    let (manager, vault) = (h.manager, h.vault);
    h.net
        .chain_mut(PARENT)
        .unwrap()
        .levy_fees_on_holdings(CallContext::new(manager), vault, ids)
}

// ---------------------------------------------------------------------------
// Governance
// ---------------------------------------------------------------------------

#[test]
fn increase_waits_out_the_announcement_window() {
    let mut h = Harness::new();
    announce(&mut h, FeeSchedule::new(100, 0)).unwrap();
    assert_eq!(
        h.parent().fees().pending().map(|a| a.fees),
        Some(FeeSchedule::new(100, 0))
    );

    let err = commit(&mut h).unwrap_err();
    assert_eq!(
        err,
        VaultError::Ledger(LedgerError::AnnouncementWindowOpen {
            ready_at: START + FEE_ANNOUNCEMENT_WINDOW
        })
    );
    assert_eq!(err.class(), ErrorClass::Governance);
    assert_eq!(h.parent().fees().current(), FeeSchedule::new(0, 0));

    h.net.advance_time(FEE_ANNOUNCEMENT_WINDOW);
    assert_eq!(commit(&mut h).unwrap(), FeeSchedule::new(100, 0));
    assert_eq!(h.parent().fees().current(), FeeSchedule::new(100, 0));
    assert!(h.parent().fees().pending().is_none());
}

#[test]
fn increases_are_bounded_per_step() {
    let mut h = Harness::new();
    assert_eq!(
        announce(&mut h, FeeSchedule::new(200, 0)).unwrap_err(),
        VaultError::Ledger(LedgerError::FeeStepTooLarge {
            kind: "streaming",
            step: 200,
            max_step: 100
        })
    );
    assert_eq!(
        announce(&mut h, FeeSchedule::new(0, 0)).unwrap_err(),
        VaultError::Ledger(LedgerError::NotAnIncrease)
    );
    assert!(h.parent().fees().pending().is_none());
}

#[test]
fn renounce_drops_the_pending_increase() {
    let mut h = Harness::new();
    announce(&mut h, FeeSchedule::new(50, 500)).unwrap();
    let (manager, vault) = (h.manager, h.vault);
    let chain = h.net.chain_mut(PARENT).unwrap();
    chain
        .renounce_fee_increase(CallContext::new(manager), vault)
        .unwrap();
    assert_eq!(
        chain
            .renounce_fee_increase(CallContext::new(manager), vault)
            .unwrap_err(),
        VaultError::Ledger(LedgerError::NoPendingAnnouncement)
    );
    h.net.advance_time(FEE_ANNOUNCEMENT_WINDOW);
    assert_eq!(
        commit(&mut h).unwrap_err(),
        VaultError::Ledger(LedgerError::NoPendingAnnouncement)
    );
}

#[test]
fn decreases_apply_at_once() {
    let mut h = Harness::with_fees(FeeSchedule::new(200, 1_000));
    let (manager, stranger, vault) = (h.manager, h.stranger, h.vault);
    let chain = h.net.chain_mut(PARENT).unwrap();

    assert_eq!(
        chain
            .decrease_fees(CallContext::new(stranger), vault, FeeSchedule::new(0, 0))
            .unwrap_err(),
        VaultError::NotManager(stranger)
    );
    chain
        .decrease_fees(CallContext::new(manager), vault, FeeSchedule::new(100, 1_000))
        .unwrap();
    assert_eq!(
        chain
            .decrease_fees(CallContext::new(manager), vault, FeeSchedule::new(300, 0))
            .unwrap_err(),
        VaultError::Ledger(LedgerError::NotADecrease)
    );
    assert_eq!(h.parent().fees().current(), FeeSchedule::new(100, 1_000));
}

#[test]
fn only_the_manager_announces() {
    let mut h = Harness::new();
    let (stranger, vault) = (h.stranger, h.vault);
    assert_eq!(
        h.net
            .chain_mut(PARENT)
            .unwrap()
            .announce_fee_increase(CallContext::new(stranger), vault, FeeSchedule::new(100, 0))
            .unwrap_err(),
        VaultError::NotManager(stranger)
    );
}

// ---------------------------------------------------------------------------
// Levies
// ---------------------------------------------------------------------------

#[test]
fn streaming_fee_for_a_year_split_with_the_protocol() {
    let mut h = Harness::with_fees(FeeSchedule::new(200, 0));
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    h.net.advance_time(SECONDS_PER_YEAR);

    let levies = levy(&mut h, &[token]).unwrap();
    assert_eq!(levies[0].streaming_shares, 2 * ONE);
    // Default protocol share is 20%.
    assert_eq!(levies[0].protocol_shares, 4 * ONE / 10);
    assert_eq!(levies[0].manager_shares, 16 * ONE / 10);

    let ledger = h.parent().ledger();
    assert_eq!(ledger.holding(token).unwrap().total_shares, 98 * ONE);
    assert_eq!(ledger.holding(MANAGER_HOLDING_ID).unwrap().total_shares, 16 * ONE / 10);
    assert_eq!(ledger.holding(PROTOCOL_HOLDING_ID).unwrap().total_shares, 4 * ONE / 10);
    assert_eq!(ledger.total_shares(), 100 * ONE);
    assert!(ledger.check_invariant());

    let now = h.net.now();
    assert_eq!(
        levy(&mut h, &[token]).unwrap_err(),
        VaultError::ManagerLevyTooSoon {
            token_id: token,
            ready_at: now + MANAGER_FEE_LEVY_INTERVAL
        }
    );
}

#[test]
fn performance_fee_only_above_the_high_water_mark() {
    let mut h = Harness::with_fees(FeeSchedule::new(0, 1_000));
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    h.net.advance_time(MANAGER_FEE_LEVY_INTERVAL);

    // Flat price: nothing to charge.
    assert_eq!(levy(&mut h, &[token]).unwrap()[0].performance_shares, 0);

    // The vault doubles: 10% of the gain, measured in shares.
    h.prices.set_price(usdc(PARENT), 2 * ONE);
    h.net.advance_time(MANAGER_FEE_LEVY_INTERVAL);
    let levies = levy(&mut h, &[token]).unwrap();
    assert_eq!(levies[0].performance_shares, 10 * ONE);
    let holding = h.parent().holding(token).unwrap();
    assert_eq!(holding.total_shares, 90 * ONE);
    assert_eq!(holding.last_performance_fee_unit_price, 2 * ONE);

    // Same price again: the mark has moved up.
    h.net.advance_time(MANAGER_FEE_LEVY_INTERVAL);
    assert_eq!(levy(&mut h, &[token]).unwrap()[0].performance_shares, 0);
}

#[test]
fn discounts_scale_both_fees() {
    let mut h = Harness::with_fees(FeeSchedule::new(200, 0));
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    let (manager, vault) = (h.manager, h.vault);
    let chain = h.net.chain_mut(PARENT).unwrap();
    chain
        .set_holding_discount(CallContext::new(manager), vault, token, 5_000)
        .unwrap();
    assert_eq!(
        chain
            .set_holding_discount(CallContext::new(manager), vault, MANAGER_HOLDING_ID, 5_000)
            .unwrap_err(),
        VaultError::Ledger(LedgerError::ReservedHolding(MANAGER_HOLDING_ID))
    );
    assert_eq!(
        chain
            .set_holding_discount(CallContext::new(manager), vault, token, 10_001)
            .unwrap_err(),
        VaultError::Ledger(LedgerError::InvalidDiscount(10_001))
    );

    h.net.advance_time(SECONDS_PER_YEAR);
    assert_eq!(levy(&mut h, &[token]).unwrap()[0].streaming_shares, ONE);
}

#[test]
fn committed_schedule_reaches_holdings_on_their_next_levy() {
    let mut h = Harness::new();
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    announce(&mut h, FeeSchedule::new(100, 0)).unwrap();
    h.net.advance_time(FEE_ANNOUNCEMENT_WINDOW);
    commit(&mut h).unwrap();
    assert_eq!(h.parent().holding(token).unwrap().streaming_fee_bips, 0);

    // The first levy charges the old zero rate, then adopts the new one.
    levy(&mut h, &[token]).unwrap();
    assert_eq!(h.parent().holding(token).unwrap().streaming_fee_bips, 100);
    assert_eq!(h.parent().holding(token).unwrap().total_shares, 100 * ONE);

    h.net.advance_time(365 * DAY);
    assert_eq!(levy(&mut h, &[token]).unwrap()[0].streaming_shares, ONE);
}

#[test]
fn non_manager_cannot_levy() {
    let mut h = Harness::with_fees(FeeSchedule::new(200, 0));
    let token = h.deposit(h.investor, usdc(PARENT), 100 * ONE).unwrap();
    let (stranger, vault) = (h.stranger, h.vault);
    assert_eq!(
        h.net
            .chain_mut(PARENT)
            .unwrap()
            .levy_fees_on_holdings(CallContext::new(stranger), vault, &[token])
            .unwrap_err(),
        VaultError::NotManager(stranger)
    );
}
