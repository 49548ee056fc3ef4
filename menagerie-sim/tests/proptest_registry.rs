//! Property-based tests for registry invariants.
//!
//! - Last-writer-wins does not depend on arrival order.
//! - Cross-partition aggregation never yields more entries than distinct keys.
//! - Any sequence of relocations keeps at most one live copy per key.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use menagerie_core::clock::ManualClock;
use menagerie_core::store::SnapshotStore;
use menagerie_core::{relocate, CompanionKind, CompanionRecord, EntityKey, Kennel, OwnerId, PartitionId, Position};
use menagerie_sim::{sim_kennel, SimObject, SimPartition};

const PARTITIONS: [&str; 3] = ["overworld", "nether", "end"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
}

fn record(key: EntityKey, owner: OwnerId, offset_secs: i64) -> CompanionRecord {
    CompanionRecord {
        key,
        owner,
        kind: CompanionKind::Pet,
        position: Position::new(offset_secs as f64, 0.0, 0.0),
        snapshot: None,
        display_name: None,
        last_updated: t0() + Duration::seconds(offset_secs),
        alive: true,
    }
}

fn kennel() -> Kennel<SimPartition> {
    let mut kennel = sim_kennel(Default::default(), Arc::new(ManualClock::new(t0())));
    for id in PARTITIONS {
        kennel.add_partition(SimPartition::new(id));
    }
    kennel
}

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

/// Distinct timestamps in two independent orders.
fn arb_offsets_two_orders() -> impl Strategy<Value = (Vec<i64>, Vec<i64>)> {
    prop::collection::btree_set(0i64..100_000, 1..24).prop_flat_map(|set| {
        let ordered: Vec<i64> = set.into_iter().collect();
        (Just(ordered.clone()).prop_shuffle(), Just(ordered).prop_shuffle())
    })
}

// ---------------------------------------------------------------------------
// Property: last-writer-wins is order independent
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn last_writer_wins_ignores_arrival_order((first, second) in arb_offsets_two_orders()) {
        let (key, owner) = (EntityKey::new(), OwnerId::new());
        let mut a = SnapshotStore::new();
        let mut b = SnapshotStore::new();
        for offset in &first {
            a.put(record(key, owner, *offset));
        }
        for offset in &second {
            b.put(record(key, owner, *offset));
        }

        let newest = first.iter().copied().max().unwrap();
        prop_assert_eq!(a.get(&key), b.get(&key));
        prop_assert_eq!(a.get(&key).map(|r| r.last_updated), Some(t0() + Duration::seconds(newest)));
        prop_assert_eq!(a.len(), 1);
    }
}

// ---------------------------------------------------------------------------
// Property: aggregation is bounded by distinct keys
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn aggregation_never_exceeds_distinct_keys(
        writes in prop::collection::vec((0usize..8, 0usize..3, 0i64..1_000), 0..40)
    ) {
        let owner = OwnerId::new();
        let keys: Vec<EntityKey> = (0..8).map(|_| EntityKey::new()).collect();
        let mut kennel = kennel();

        for &(k, shard, offset) in &writes {
            kennel.shards[shard].store.put(record(keys[k], owner, offset));
        }

        let distinct: BTreeSet<usize> = writes.iter().map(|&(k, _, _)| k).collect();
        let aggregated = kennel.aggregate(owner, None);
        prop_assert_eq!(aggregated.len(), distinct.len());

        for rec in &aggregated {
            let newest = kennel
                .shards
                .iter()
                .filter_map(|s| s.store.get(&rec.key))
                .map(|r| r.last_updated)
                .max();
            prop_assert_eq!(Some(rec.last_updated), newest);
        }
        prop_assert!(kennel.aggregate(OwnerId::new(), None).is_empty());
    }
}

// ---------------------------------------------------------------------------
// Property: single residency under arbitrary relocation sequences
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn relocations_keep_one_live_copy(
        moves in prop::collection::vec((0usize..3, 0usize..3, -50.0..50.0f64), 1..20)
    ) {
        let owner = OwnerId::new();
        let mut kennel = kennel();
        let home = PartitionId::new(PARTITIONS[0]);
        let pets: Vec<EntityKey> = ["wolf", "cat", "parrot"]
            .into_iter()
            .map(|species| {
                let shard = kennel.shard_mut(&home).unwrap();
                let key = shard.partition.spawn(SimObject::pet(owner, species));
                kennel.capture(0, key).unwrap();
                key
            })
            .collect();

        for &(pet, target, x) in &moves {
            let target = PartitionId::new(PARTITIONS[target]);
            let placed = relocate(&mut kennel, pets[pet], &target, Position::new(x, 0.0, 0.0)).unwrap();
            prop_assert_eq!(placed.key, pets[pet]);

            for &key in &pets {
                prop_assert_eq!(kennel.live_copies(key), 1);
                let records = kennel.shards.iter().filter(|s| s.store.contains(&key)).count();
                prop_assert_eq!(records, 1);
            }
            let (idx, _) = kennel.locate(pets[pet]).unwrap();
            prop_assert_eq!(kennel.shards[idx].partition.get(pets[pet]).and_then(|o| o.partition.clone()), Some(target));
        }
        prop_assert_eq!(kennel.counters.snapshot().relocations, moves.len() as u64);
    }
}
