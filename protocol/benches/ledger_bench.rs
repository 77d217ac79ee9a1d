// Accounting and codec benchmarks for Crossvault.
//
// Covers fee levies on a single holding, deposit share pricing, CPIT trade
// recording over a rolling window, and message encode/decode at growing
// sibling-list sizes.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use crossvault_protocol::config::{DAY, HOUR, UNIT_PRICE_SCALE};
use crossvault_protocol::cpit::CpitTracker;
use crossvault_protocol::ledger::{FeeSchedule, ShareLedger};
use crossvault_protocol::transport::{Message, VaultChildCreationRequest};
use crossvault_protocol::types::RiskProfile;
use crossvault_protocol::{Address, VaultRef};

const ONE: u128 = UNIT_PRICE_SCALE;

fn funded_ledger() -> (ShareLedger, u64) {
    let mut ledger = ShareLedger::new(Address::from_label("manager"), Address::from_label("treasury"), 0);
    let id = ledger.create_holding(Address::from_label("alice"), FeeSchedule::new(200, 2_000), 0);
    ledger.mint(id, 1_000_000 * ONE, ONE).unwrap();
    ledger.initialise_position(id, ONE, 0).unwrap();
    (ledger, id)
}

fn bench_levy_fees(c: &mut Criterion) {
    let fees = FeeSchedule::new(200, 2_000);

    c.bench_function("ledger/levy_fees", |b| {
        b.iter_batched(
            funded_ledger,
            |(mut ledger, id)| ledger.levy_fees(id, 3 * ONE / 2, 30 * DAY, 2_000, fees).unwrap(),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_shares_for_deposit(c: &mut Criterion) {
    let (ledger, _) = funded_ledger();

    c.bench_function("ledger/shares_for_deposit", |b| {
        b.iter(|| ledger.shares_for_deposit(12_345 * ONE, 1_250_000 * ONE).unwrap());
    });
}

fn bench_cpit_record_trade(c: &mut Criterion) {
    c.bench_function("cpit/record_trade", |b| {
        b.iter_batched(
            || {
                let mut tracker = CpitTracker::new();
                for i in 0..16u64 {
                    tracker.record_trade(i * HOUR, 1_000_000, 999_990, 10_000).unwrap();
                }
                tracker
            },
            |mut tracker| tracker.record_trade(16 * HOUR, 1_000_000, 999_900, 10_000),
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_message_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("transport/message_codec");
    let parent = VaultRef::new(1, Address::from_label("parent"));

    for siblings in [0usize, 4, 16, 64] {
        let msg = Message::VaultChildCreationRequest(VaultChildCreationRequest {
            parent,
            manager: Address::from_label("manager"),
            risk_profile: RiskProfile::Medium,
            siblings: (0..siblings)
                .map(|i| VaultRef::new(2 + i as u64, Address::from_label(&format!("child-{i}"))))
                .collect(),
        });
        let bytes = msg.encode().unwrap();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::new("encode", siblings), &msg, |b, msg| {
            b.iter(|| msg.encode().unwrap());
        });
        group.bench_with_input(BenchmarkId::new("decode", siblings), &bytes, |b, bytes| {
            b.iter(|| Message::decode(bytes).unwrap());
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_levy_fees,
    bench_shares_for_deposit,
    bench_cpit_record_trade,
    bench_message_codec,
);
criterion_main!(benches);
