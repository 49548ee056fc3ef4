//! Menagerie Benchmark Suite
//!
//! Per-tick cost should follow online owners and the companions near them,
//! not registry size:
//!   tick_fast_capture/* ...... one owner, 8 nearby pets, growing registry
//!   dead_sweep/* ............. sweep cost against registry size
//!   whistle_call_8_pets ...... cross-partition recall of 8 pets

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use menagerie_core::clock::SystemClock;
use menagerie_core::commands::{execute, Command, Invoker};
use menagerie_core::scheduler::on_tick;
use menagerie_core::{CompanionKind, Kennel, MenagerieConfig, OwnerId, PartitionId, Position};
use menagerie_sim::{sim_kennel, SimObject, SimPartition};

/// A kennel with `far` registered pets well away from the owner and eight
/// pets at their feet.
fn populated(config: MenagerieConfig, far: usize) -> (Kennel<SimPartition>, OwnerId) {
    let mut kennel = sim_kennel(config, Arc::new(SystemClock));
    let owner = OwnerId::new();
    let mut overworld = SimPartition::new("overworld");
    overworld.join(owner, Position::new(0.0, 64.0, 0.0));
    let near: Vec<_> = (0..8)
        .map(|i| overworld.spawn(SimObject::pet(owner, "cat").at(Position::new(f64::from(i), 64.0, 1.0))))
        .collect();
    let idx = kennel.add_partition(overworld);
    kennel.add_partition(SimPartition::new("nether"));

    let others: Vec<_> = (0..far)
        .map(|i| {
            let stranger = OwnerId::new();
            let x = 1_000.0 + (i % 1_000) as f64 * 3.0;
            let z = 1_000.0 + (i / 1_000) as f64 * 3.0;
            SimObject::pet(stranger, "wolf").at(Position::new(x, 64.0, z))
        })
        .collect();
    for object in others {
        let key = kennel.shards[idx].partition.spawn(object);
        kennel.capture(idx, key).expect("capture");
    }
    for key in near {
        kennel.capture(idx, key).expect("capture");
    }
    (kennel, owner)
}

/// Benchmark: fast-capture tick against registry size.
fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick_fast_capture");
    for far in [0usize, 1_000, 10_000] {
        let (mut kennel, _) = populated(MenagerieConfig::default(), far);
        let tick = kennel.config.schedule.fast_capture_every;
        group.bench_with_input(BenchmarkId::from_parameter(far), &far, |b, _| {
            b.iter(|| black_box(on_tick(&mut kennel, black_box(tick))));
        });
    }
    group.finish();
}

/// Benchmark: dead sweep against registry size.
fn bench_dead_sweep(c: &mut Criterion) {
    let mut group = c.benchmark_group("dead_sweep");
    group.sample_size(20);
    for far in [1_000usize, 10_000] {
        let (mut kennel, _) = populated(MenagerieConfig::default(), far);
        let tick = kennel.config.schedule.dead_sweep_every;
        group.bench_with_input(BenchmarkId::from_parameter(far), &far, |b, _| {
            b.iter(|| black_box(on_tick(&mut kennel, black_box(tick))));
        });
    }
    group.finish();
}

/// Benchmark: whistle eight pets into another partition.
fn bench_whistle(c: &mut Criterion) {
    let mut config = MenagerieConfig::default();
    config.whistle.cooldown_seconds = 0;
    c.bench_function("whistle_call_8_pets", |b| {
        b.iter_batched(
            || populated(config.clone(), 0),
            |(mut kennel, owner)| {
                let here = Invoker {
                    owner,
                    partition: PartitionId::new("nether"),
                    position: Position::new(0.0, 40.0, 0.0),
                };
                black_box(execute(&mut kennel, &here, Command::Call { kind: CompanionKind::Pet, name: None }))
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_tick, bench_dead_sweep, bench_whistle);
criterion_main!(benches);
