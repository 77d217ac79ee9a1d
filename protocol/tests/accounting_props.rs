//! Property-based tests for the share ledger, fee math and the CPIT
//! window.

use crossvault_protocol::config::{
    BIPS, CPIT_BUCKET_SECS, CPIT_WINDOW_BUCKETS, SECONDS_PER_YEAR, UNIT_PRICE_SCALE,
};
use crossvault_protocol::cpit::CpitTracker;
use crossvault_protocol::ledger::{FeeSchedule, ShareLedger};
use crossvault_protocol::math::mul_div;
use crossvault_protocol::Address;
use proptest::prelude::*;

const ONE: u128 = UNIT_PRICE_SCALE;

fn ledger() -> ShareLedger {
    ShareLedger::new(Address::from_label("manager"), Address::from_label("treasury"), 0)
}

#[derive(Clone, Debug)]
enum LedgerOp {
    Mint { holding: usize, shares: u128 },
    Burn { holding: usize, bips: u128 },
    Levy { holding: usize, secs: u64, price_pct: u128 },
}

fn ledger_op() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (0usize..3, 1u128..1_000_000).prop_map(|(holding, shares)| LedgerOp::Mint {
            holding,
            shares: shares * ONE,
        }),
        (0usize..3, 0u128..=10_000).prop_map(|(holding, bips)| LedgerOp::Burn { holding, bips }),
        (0usize..3, 0u64..SECONDS_PER_YEAR, 50u128..300).prop_map(|(holding, secs, price_pct)| {
            LedgerOp::Levy {
                holding,
                secs,
                price_pct,
            }
        }),
    ]
}

proptest! {
    /// Property: minting, burning and levying never break
    /// Σ holding shares == total shares.
    #[test]
    fn prop_ledger_invariant_holds(ops in prop::collection::vec(ledger_op(), 1..40)) {
        let fees = FeeSchedule::new(500, 5_000);
        let mut l = ledger();
        let ids: Vec<u64> = (0..3)
            .map(|i| l.create_holding(Address::from_label(&format!("investor-{i}")), fees, 0))
            .collect();
        let mut now = 0u64;

        for op in ops {
            match op {
                LedgerOp::Mint { holding, shares } => {
                    l.mint(ids[holding], shares, ONE).unwrap();
                }
                LedgerOp::Burn { holding, bips } => {
                    let held = l.holding(ids[holding]).unwrap().total_shares;
                    l.burn(ids[holding], held * bips / BIPS, now).unwrap();
                }
                LedgerOp::Levy { holding, secs, price_pct } => {
                    now += secs;
                    let before = l.total_shares();
                    let levy = l
                        .levy_fees(ids[holding], price_pct * ONE / 100, now, 2_000, fees)
                        .unwrap();
                    prop_assert_eq!(levy.protocol_shares + levy.manager_shares, levy.total());
                    prop_assert_eq!(l.total_shares(), before);
                }
            }
            prop_assert!(l.check_invariant());
        }
    }

    /// Property: a levy never takes more shares than the holding has.
    #[test]
    fn prop_levy_bounded_by_holding(
        shares in 1u128..1_000_000_000,
        secs in 0u64..(20 * SECONDS_PER_YEAR),
        price_pct in 1u128..10_000,
    ) {
        let fees = FeeSchedule::new(500, 5_000);
        let mut l = ledger();
        let id = l.create_holding(Address::from_label("alice"), fees, 0);
        l.mint(id, shares, ONE).unwrap();
        l.initialise_position(id, ONE, 0).unwrap();

        let levy = l.levy_fees(id, price_pct * ONE / 100, secs, 2_000, fees).unwrap();
        prop_assert!(levy.total() <= shares);
        prop_assert_eq!(l.holding(id).unwrap().total_shares, shares - levy.total());
    }

    /// Property: shares issued for a deposit are worth no more than the
    /// deposit at the post-deposit price.
    #[test]
    fn prop_deposit_never_dilutes_existing_holders(
        existing in 1u128..1_000_000,
        vault_value in 1u128..1_000_000,
        deposit in 1u128..1_000_000,
    ) {
        let mut l = ledger();
        let id = l.create_holding(Address::from_label("alice"), FeeSchedule::default(), 0);
        l.mint(id, existing * ONE, ONE).unwrap();

        let issued = l.shares_for_deposit(deposit * ONE, vault_value * ONE).unwrap();
        let total_after = existing * ONE + issued;
        let value_after = (vault_value + deposit) * ONE;
        let worth = mul_div(issued, value_after, total_after).unwrap();
        prop_assert!(worth <= deposit * ONE);
    }

    /// Property: the window total equals the sum of impacts recorded in the
    /// trailing buckets and never exceeds the cap.
    #[test]
    fn prop_cpit_window_respects_cap(
        trades in prop::collection::vec((0u64..CPIT_BUCKET_SECS, 0u128..500), 1..40),
        cap in 1u32..1_000,
    ) {
        let mut t = CpitTracker::new();
        let mut now = 0u64;
        let mut accepted: Vec<(u64, u64)> = Vec::new();

        for (gap, loss) in trades {
            now += gap;
            if let Ok(impact) = t.record_trade(now, 10_000, 10_000 - loss, cap) {
                accepted.push((now / CPIT_BUCKET_SECS, impact));
            }
            let current = now / CPIT_BUCKET_SECS;
            let first = current.saturating_sub(CPIT_WINDOW_BUCKETS - 1);
            let expected: u64 = accepted
                .iter()
                .filter(|(bucket, _)| *bucket >= first && *bucket <= current)
                .map(|(_, impact)| *impact)
                .sum();
            prop_assert_eq!(t.window_impact(now), expected);
            prop_assert!(t.window_impact(now) <= cap as u64);
        }
    }
}
