//! Central registry state.
//!
//! A [`Kennel`] owns one [`Shard`] per partition (the partition handle plus
//! its snapshot store), the shared tombstone registry, cooldowns and the
//! scheduler's tick counter. Relocation, the scheduler, commands and event
//! hooks are free functions over `&mut Kennel`, all running on the same
//! cooperative thread as the partition ticks.

use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lru::LruCache;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::MenagerieConfig;
use crate::cooldown::CooldownTracker;
use crate::dead_registry::DeadRegistry;
use crate::engine::{ObjectState, Partition};
use crate::error::{MenagerieError, Result};
use crate::metrics::KennelCounters;
use crate::persistence::RegistryDb;
use crate::store::{latest_by_key, PutOutcome, SnapshotStore};
use crate::types::{CompanionKind, CompanionRecord, EntityKey, OwnerId, PartitionId};

/// Companions remembered for interaction debouncing.
const INTERACTION_CAPACITY: NonZeroUsize = match NonZeroUsize::new(4096) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

/// A partition paired with its snapshot store.
pub struct Shard<P> {
    /// Engine handle.
    pub partition: P,
    /// This partition's records.
    pub store: SnapshotStore,
}

impl<P: Partition> Shard<P> {
    /// A shard with an empty store.
    pub fn new(partition: P) -> Self {
        Self::with_store(partition, SnapshotStore::new())
    }

    /// A shard with a preloaded store.
    pub fn with_store(partition: P, store: SnapshotStore) -> Self {
        Self { partition, store }
    }

    /// Partition identity.
    pub fn id(&self) -> &PartitionId {
        self.partition.id()
    }

    /// Capture a loaded object into this shard's store.
    ///
    /// # Errors
    /// `NotFound` if the object is not loaded, otherwise as
    /// [`Self::capture_object`].
    pub fn capture(&mut self, config: &MenagerieConfig, key: EntityKey, now: DateTime<Utc>) -> Result<PutOutcome> {
        let object = self.partition.object(key).ok_or(MenagerieError::NotFound(key))?;
        self.capture_object(config, &object, now)
    }

    /// Capture `object` into this shard's store, stamped `now`.
    ///
    /// # Errors
    /// `Unsupported` for species off the allow-lists, `Unowned` for objects
    /// with no resolvable owner, `TransientFailure` if the engine cannot
    /// serialize the object.
    pub fn capture_object(
        &mut self,
        config: &MenagerieConfig,
        object: &ObjectState,
        now: DateTime<Utc>,
    ) -> Result<PutOutcome> {
        let kind = config
            .kind_of(&object.species)
            .ok_or_else(|| MenagerieError::Unsupported(object.species.clone()))?;
        let owner = object.owner().ok_or(MenagerieError::Unowned(object.key))?;
        let snapshot = self.partition.capture(object.key)?;

        let outcome = self.store.put(CompanionRecord {
            key: object.key,
            owner,
            kind,
            position: object.position,
            snapshot: Some(snapshot),
            display_name: object.display_name.clone(),
            last_updated: now,
            alive: object.alive,
        });
        debug!(
            key = %object.key,
            partition = %self.partition.id(),
            ?outcome,
            "Captured companion"
        );
        Ok(outcome)
    }
}

/// Tombstone `key` without holding the whole kennel.
pub(crate) fn grant_tombstone(dead: &DeadRegistry, counters: &KennelCounters, key: EntityKey) -> bool {
    match dead.add(key) {
        Ok(fresh) => {
            if fresh {
                KennelCounters::bump(&counters.tombstones, 1);
            }
            fresh
        }
        Err(e) => {
            error!(%key, error = %e, "Failed to persist tombstone");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Kennel
// ---------------------------------------------------------------------------

/// Everything the registry knows, across all partitions.
pub struct Kennel<P> {
    /// Active configuration.
    pub config: MenagerieConfig,
    /// One shard per partition.
    pub shards: Vec<Shard<P>>,
    /// Process-wide tombstones.
    pub dead: Arc<DeadRegistry>,
    /// Whistle cooldown per owner.
    pub whistle: CooldownTracker<OwnerId>,
    /// Last buck per mount.
    pub bucks: CooldownTracker<EntityKey>,
    /// Last "too injured" message per rider.
    pub buck_messages: CooldownTracker<OwnerId>,
    /// Last interaction capture per companion.
    pub interactions: LruCache<EntityKey, DateTime<Utc>>,
    /// Wall-clock source.
    pub clock: Arc<dyn Clock>,
    /// Activity counters.
    pub counters: KennelCounters,
    /// Last tick processed by the scheduler.
    pub current_tick: u64,
}

impl<P: Partition> Kennel<P> {
    /// Create a kennel with no partitions.
    pub fn new(config: MenagerieConfig, dead: Arc<DeadRegistry>, clock: Arc<dyn Clock>) -> Self {
        let whistle = CooldownTracker::new(config.whistle.cooldown());
        let bucks = CooldownTracker::new(config.schedule.buck_cooldown());
        let buck_messages = CooldownTracker::new(config.schedule.buck_message_window());
        Self {
            config,
            shards: Vec::new(),
            dead,
            whistle,
            bucks,
            buck_messages,
            interactions: LruCache::new(INTERACTION_CAPACITY),
            clock,
            counters: KennelCounters::new(),
            current_tick: 0,
        }
    }

    /// Default config, in-memory tombstones and the system clock.
    pub fn in_memory() -> Self {
        Self::new(
            MenagerieConfig::default(),
            Arc::new(DeadRegistry::in_memory()),
            Arc::new(SystemClock),
        )
    }

    /// Current wall-clock time.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Shards
    // ------------------------------------------------------------------

    /// Register a partition with an empty store. Returns its shard index.
    pub fn add_partition(&mut self, partition: P) -> usize {
        self.attach(partition, SnapshotStore::new())
    }

    /// Register a partition with a preloaded store, replacing any shard
    /// with the same id. Returns its shard index.
    pub fn attach(&mut self, partition: P, store: SnapshotStore) -> usize {
        let shard = Shard::with_store(partition, store);
        if let Some(idx) = self.shard_index(shard.id()) {
            self.shards[idx] = shard;
            idx
        } else {
            self.shards.push(shard);
            self.shards.len() - 1
        }
    }

    /// Index of the shard for `id`.
    pub fn shard_index(&self, id: &PartitionId) -> Option<usize> {
        self.shards.iter().position(|s| s.id() == id)
    }

    /// Shard for `id`.
    pub fn shard(&self, id: &PartitionId) -> Option<&Shard<P>> {
        self.shards.iter().find(|s| s.id() == id)
    }

    /// Mutable shard for `id`.
    pub fn shard_mut(&mut self, id: &PartitionId) -> Option<&mut Shard<P>> {
        self.shards.iter_mut().find(|s| s.id() == id)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every record for `owner` across all partitions, newest per key.
    pub fn aggregate(&self, owner: OwnerId, kind: Option<CompanionKind>) -> Vec<CompanionRecord> {
        latest_by_key(
            self.shards
                .iter()
                .flat_map(|s| s.store.get_by_owner(owner, kind)),
        )
    }

    /// [`Self::aggregate`] without tombstoned keys.
    pub fn callable(&self, owner: OwnerId, kind: CompanionKind) -> Vec<CompanionRecord> {
        let mut records = self.aggregate(owner, Some(kind));
        records.retain(|r| !self.dead.contains(&r.key));
        records
    }

    /// Loaded live copies of `key` across all partitions.
    pub fn live_copies(&self, key: EntityKey) -> usize {
        self.shards
            .iter()
            .filter(|s| s.partition.object(key).is_some_and(|o| o.alive))
            .count()
    }

    /// First shard where `key` is loaded, with its state.
    pub fn locate(&self, key: EntityKey) -> Option<(usize, ObjectState)> {
        self.shards
            .iter()
            .enumerate()
            .find_map(|(i, s)| s.partition.object(key).map(|o| (i, o)))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Capture `key` from shard `idx` into that shard's store.
    ///
    /// # Errors
    /// As [`Shard::capture`].
    pub fn capture(&mut self, idx: usize, key: EntityKey) -> Result<PutOutcome> {
        let now = self.clock.now();
        let shard = self
            .shards
            .get_mut(idx)
            .ok_or(MenagerieError::NotFound(key))?;
        let outcome = shard.capture(&self.config, key, now)?;
        if outcome.written() {
            KennelCounters::bump(&self.counters.captures, 1);
        }
        Ok(outcome)
    }

    /// Tombstone `key`, logging rather than failing on I/O errors.
    /// Returns whether a new tombstone was granted.
    pub fn tombstone(&self, key: EntityKey) -> bool {
        grant_tombstone(&self.dead, &self.counters, key)
    }

    // ------------------------------------------------------------------
    // Save boundary
    // ------------------------------------------------------------------

    /// Register `partition` with the store saved in `db`.
    ///
    /// # Errors
    /// Database errors from [`RegistryDb::load_store`].
    pub fn load_partition(&mut self, partition: P, db: &RegistryDb) -> Result<usize> {
        let store = db.load_store()?;
        info!(partition = %partition.id(), records = store.len(), "Partition registry loaded");
        Ok(self.attach(partition, store))
    }

    /// Persist the store of partition `id` to `db`.
    ///
    /// # Errors
    /// `UnknownPartition` if no shard has that id, otherwise database errors.
    pub fn save_partition(&mut self, id: &PartitionId, db: &mut RegistryDb) -> Result<usize> {
        let shard = self
            .shard_mut(id)
            .ok_or_else(|| MenagerieError::UnknownPartition(id.clone()))?;
        db.save_store(&mut shard.store)
    }
}
