//! Criterion benchmarks for the Paddy tick pipeline.
//!
//! Two benchmark groups:
//! - `village_tick`: a mid-game village, one 100 ms tick
//! - `offline_catch_up`: an eight-hour absence credited in one call

use criterion::{criterion_group, criterion_main, Criterion};
use paddy_core::engine::Engine;
use paddy_core::test_utils::*;

const T0: u64 = 1_700_000_000_000;

/// A village with every building type owned and upgrades bought.
fn build_village() -> Engine {
    let mut engine = village_engine();
    engine.add_resource("rice", 1_000_000.0);
    engine.add_resource("coins", 100_000.0);
    engine.add_resource("water", 10_000.0);
    engine.purchase_building("paddy_field", 40);
    engine.purchase_building("well", 20);
    engine.purchase_building("buffalo", 10);
    engine.purchase_building("brewery", 5);
    engine.purchase_building("trading_boat", 3);
    engine.purchase_building("fishing_hut", 10);
    engine.purchase_upgrade("iron_sickle");
    for _ in 0..3 {
        engine.purchase_upgrade("irrigation");
    }
    engine
        .process_tick(0.0, T0)
        .expect("initial tick succeeds");
    engine
}

fn bench_village_tick(c: &mut Criterion) {
    let mut engine = build_village();
    let mut now = T0;
    c.bench_function("village_tick", |b| {
        b.iter(|| {
            now += 100;
            engine.process_tick(0.1, now).expect("tick succeeds");
        })
    });
}

fn bench_offline_catch_up(c: &mut Criterion) {
    c.bench_function("offline_catch_up", |b| {
        b.iter_batched(
            build_village,
            |mut engine| engine.apply_offline(T0 + 8 * 3_600_000).expect("offline succeeds"),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_village_tick, bench_offline_catch_up);
criterion_main!(benches);
