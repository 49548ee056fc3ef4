//! Cross-partition relocation with single residency.
//!
//! [`relocate`] moves a companion's live presence into a target partition.
//! Whatever copies exist elsewhere are destroyed and their records removed,
//! so after a successful call exactly one live object carries the key.

use tracing::{info, warn};

use crate::engine::{ObjectState, Partition};
use crate::error::{MenagerieError, Result};
use crate::kennel::Kennel;
use crate::metrics::KennelCounters;
use crate::types::{CompanionRecord, EntityKey, PartitionId, Position, Snapshot};

/// Where the reconstruction snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SnapshotSource {
    /// Fresh capture of a loaded copy.
    Live,
    /// Newest stored record.
    Stored,
}

/// Move companion `key` into partition `target` at `position`.
///
/// Fails with `Dead` if the key is tombstoned, or if any partition's record
/// or loaded copy says it is not alive (which also tombstones it), `NotFound` if no store
/// has a record, `NoSnapshot` if nothing can be reconstructed, and
/// `TransientFailure` if the engine rejects reconstruction or placement.
/// The snapshot is chosen before anything is destroyed, so a `NoSnapshot`
/// failure leaves every partition untouched. After a transient failure the
/// chosen record is written into the target store so the companion stays
/// recallable.
///
/// # Errors
/// See above.
pub fn relocate<P: Partition>(
    kennel: &mut Kennel<P>,
    key: EntityKey,
    target: &PartitionId,
    position: Position,
) -> Result<ObjectState> {
    let result = relocate_inner(kennel, key, target, position);
    match &result {
        Ok(_) => KennelCounters::bump(&kennel.counters.relocations, 1),
        Err(e) => {
            KennelCounters::bump(&kennel.counters.relocation_failures, 1);
            warn!(%key, target = %target, error = %e, "Relocation rejected");
        }
    }
    result
}

fn relocate_inner<P: Partition>(
    kennel: &mut Kennel<P>,
    key: EntityKey,
    target: &PartitionId,
    position: Position,
) -> Result<ObjectState> {
    if kennel.dead.contains(&key) {
        return Err(MenagerieError::Dead(key));
    }
    let target_idx = kennel
        .shard_index(target)
        .ok_or_else(|| MenagerieError::UnknownPartition(target.clone()))?;

    // 1. Survey every partition's store.
    let mut newest: Option<CompanionRecord> = None;
    for shard in &kennel.shards {
        let Some(record) = shard.store.get(&key) else {
            continue;
        };
        if !record.alive {
            kennel.tombstone(key);
            return Err(MenagerieError::Dead(key));
        }
        if newest.as_ref().is_none_or(|n| record.last_updated > n.last_updated) {
            newest = Some(record.clone());
        }
    }
    let Some(newest) = newest else {
        return Err(MenagerieError::NotFound(key));
    };
    let now = kennel.clock.now();
    let mut died = false;
    for shard in &mut kennel.shards {
        if shard.partition.object(key).is_some_and(|o| !o.alive) {
            shard.store.mark_dead(&key, now);
            died = true;
        }
    }
    if died {
        kennel.tombstone(key);
        return Err(MenagerieError::Dead(key));
    }

    // 2. Pick the snapshot before destroying anything.
    let (snapshot, source) = choose_snapshot(kennel, key)?;

    // 3. Single residency: clear every existing copy and record.
    for shard in &mut kennel.shards {
        if shard.partition.object(key).is_some() {
            shard.partition.destroy(key);
        }
        shard.store.remove(&key);
    }

    // 4. Reconstruct in the target.
    let shard = &mut kennel.shards[target_idx];
    let placed = match shard.partition.reconstruct(&snapshot) {
        Ok(staged) => shard.partition.activate(staged, position).map(|()| staged),
        Err(e) => Err(e),
    };
    let staged = match placed {
        Ok(staged) => staged,
        Err(e) => {
            shard.store.put(CompanionRecord {
                snapshot: Some(snapshot),
                ..newest
            });
            return Err(e.into());
        }
    };
    if staged != key {
        warn!(%key, %staged, "Engine reconstructed companion under a different key");
    }

    // 5. Capture straight back into the target store.
    match shard.capture(&kennel.config, key, now) {
        Ok(outcome) => {
            if outcome.written() {
                KennelCounters::bump(&kennel.counters.captures, 1);
            }
        }
        Err(e) => {
            warn!(%key, error = %e, "Post-relocation capture failed, storing moved record");
            shard.store.put(CompanionRecord {
                position,
                snapshot: Some(snapshot),
                last_updated: now,
                ..newest
            });
        }
    }

    let object = shard
        .partition
        .object(key)
        .ok_or_else(|| MenagerieError::TransientFailure(format!("{key} vanished after activation")))?;
    info!(
        %key,
        target = %target,
        ?source,
        position = %position,
        "Companion relocated"
    );
    Ok(object)
}

fn choose_snapshot<P: Partition>(kennel: &Kennel<P>, key: EntityKey) -> Result<(Snapshot, SnapshotSource)> {
    for shard in &kennel.shards {
        match shard.partition.object(key) {
            Some(obj) if obj.alive => match shard.partition.capture(key) {
                Ok(snapshot) if !snapshot.is_empty() => return Ok((snapshot, SnapshotSource::Live)),
                Ok(_) => {}
                Err(e) => warn!(%key, partition = %shard.id(), error = %e, "Live capture failed"),
            },
            _ => {}
        }
    }

    let best = kennel
        .shards
        .iter()
        .filter_map(|s| s.store.get(&key))
        .filter(|r| r.has_usable_snapshot())
        .max_by_key(|r| r.last_updated)
        .and_then(|r| r.snapshot.clone());
    match best {
        Some(snapshot) => Ok((snapshot, SnapshotSource::Stored)),
        None => Err(MenagerieError::NoSnapshot(key)),
    }
}
