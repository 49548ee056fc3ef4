//! Per-partition snapshot store.
//!
//! One [`SnapshotStore`] per partition holds that partition's view of every
//! companion it has captured. Writes are last-writer-wins by
//! `last_updated`; a newer record replaces the older one whole, never
//! field-by-field. The owner index is derived and rebuilt on load.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::types::{CompanionKind, CompanionRecord, EntityKey, OwnerId};

/// Result of a [`SnapshotStore::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// No record existed for the key.
    Inserted,
    /// The incoming record was at least as new and replaced the old one.
    Replaced,
    /// The incoming record was older; the store is unchanged.
    Stale,
    /// The incoming record names a different owner; the store is unchanged.
    OwnerConflict,
}

impl PutOutcome {
    /// Whether the store changed.
    #[must_use]
    pub const fn written(self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

/// Keyed registry of companion records for one partition.
#[derive(Debug, Default, Clone)]
pub struct SnapshotStore {
    records: HashMap<EntityKey, CompanionRecord>,
    by_owner: HashMap<OwnerId, HashSet<EntityKey>>,
    dirty: bool,
}

impl SnapshotStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from loaded records, rebuilding the owner index.
    ///
    /// Duplicate keys resolve last-writer-wins. The result is clean.
    pub fn from_records(records: impl IntoIterator<Item = CompanionRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.put(record);
        }
        store.dirty = false;
        store
    }

    /// Upsert a record, last-writer-wins by timestamp.
    pub fn put(&mut self, record: CompanionRecord) -> PutOutcome {
        let outcome = match self.records.get(&record.key) {
            None => PutOutcome::Inserted,
            Some(existing) if existing.owner != record.owner => {
                warn!(
                    key = %record.key,
                    recorded = %existing.owner,
                    incoming = %record.owner,
                    "Rejected record with conflicting owner"
                );
                return PutOutcome::OwnerConflict;
            }
            Some(existing) if record.last_updated < existing.last_updated => {
                return PutOutcome::Stale;
            }
            Some(_) => PutOutcome::Replaced,
        };

        self.by_owner
            .entry(record.owner)
            .or_default()
            .insert(record.key);
        self.records.insert(record.key, record);
        self.dirty = true;
        outcome
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, key: &EntityKey) -> Option<&CompanionRecord> {
        self.records.get(key)
    }

    /// Whether a record exists for `key`.
    #[must_use]
    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records owned by `owner`, optionally filtered by kind. Unordered.
    #[must_use]
    pub fn get_by_owner(&self, owner: OwnerId, kind: Option<CompanionKind>) -> Vec<&CompanionRecord> {
        let Some(keys) = self.by_owner.get(&owner) else {
            return Vec::new();
        };
        keys.iter()
            .filter_map(|k| self.records.get(k))
            .filter(|r| kind.is_none_or(|kind| r.kind == kind))
            .collect()
    }

    /// Remove a record. Idempotent.
    pub fn remove(&mut self, key: &EntityKey) -> Option<CompanionRecord> {
        let record = self.records.remove(key)?;
        if let Some(keys) = self.by_owner.get_mut(&record.owner) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_owner.remove(&record.owner);
            }
        }
        self.dirty = true;
        Some(record)
    }

    /// Flag a record dead and drop its snapshot.
    ///
    /// The timestamp is set to `now` only on the alive-to-dead transition,
    /// so repeated calls do not push back the purge deadline. Returns
    /// `true` on that transition.
    pub fn mark_dead(&mut self, key: &EntityKey, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            return false;
        };
        let transitioned = record.alive;
        if transitioned {
            record.alive = false;
            record.last_updated = now;
        }
        if transitioned || record.snapshot.is_some() {
            record.snapshot = None;
            self.dirty = true;
        }
        transitioned
    }

    /// Purge dead records whose time of death is strictly before `cutoff`.
    pub fn purge_dead_before(&mut self, cutoff: DateTime<Utc>) -> Vec<EntityKey> {
        let expired: Vec<EntityKey> = self
            .records
            .values()
            .filter(|r| !r.alive && r.last_updated < cutoff)
            .map(|r| r.key)
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired
    }

    /// All keys, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<EntityKey> {
        self.records.keys().copied().collect()
    }

    /// Iterate over all records.
    pub fn records(&self) -> impl Iterator<Item = &CompanionRecord> {
        self.records.values()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether anything changed since the last save boundary.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Called after a successful save.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Deduplicate records from several stores, keeping the newest per key.
///
/// Output is sorted by key so callers see a stable order.
pub fn latest_by_key<'a>(records: impl IntoIterator<Item = &'a CompanionRecord>) -> Vec<CompanionRecord> {
    let mut latest: HashMap<EntityKey, &CompanionRecord> = HashMap::new();
    for record in records {
        latest
            .entry(record.key)
            .and_modify(|cur| {
                if record.last_updated > cur.last_updated {
                    *cur = record;
                }
            })
            .or_insert(record);
    }
    let mut out: Vec<CompanionRecord> = latest.into_values().cloned().collect();
    out.sort_by_key(|r| r.key);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, Snapshot};
    use chrono::Duration;

    fn record(key: EntityKey, owner: OwnerId, kind: CompanionKind, at: DateTime<Utc>) -> CompanionRecord {
        CompanionRecord {
            key,
            owner,
            kind,
            position: Position::default(),
            snapshot: Some(Snapshot(vec![1, 2, 3])),
            display_name: None,
            last_updated: at,
            alive: true,
        }
    }

    #[test]
    fn newer_put_replaces_whole_record() {
        let mut store = SnapshotStore::new();
        let (key, owner, t0) = (EntityKey::new(), OwnerId::new(), Utc::now());

        let mut first = record(key, owner, CompanionKind::Pet, t0);
        first.display_name = Some("Rex".into());
        assert_eq!(store.put(first), PutOutcome::Inserted);

        let mut second = record(key, owner, CompanionKind::Pet, t0 + Duration::seconds(1));
        second.position = Position::new(5.0, 0.0, 5.0);
        assert_eq!(store.put(second), PutOutcome::Replaced);

        let got = store.get(&key).expect("present");
        assert_eq!(got.position, Position::new(5.0, 0.0, 5.0));
        assert_eq!(got.display_name, None, "no field-by-field merge");
    }

    #[test]
    fn older_put_is_stale() {
        let mut store = SnapshotStore::new();
        let (key, owner, t0) = (EntityKey::new(), OwnerId::new(), Utc::now());
        store.put(record(key, owner, CompanionKind::Pet, t0));

        let mut old = record(key, owner, CompanionKind::Pet, t0 - Duration::seconds(5));
        old.alive = false;
        assert_eq!(store.put(old), PutOutcome::Stale);
        assert!(store.get(&key).expect("present").alive);
    }

    #[test]
    fn owner_is_immutable() {
        let mut store = SnapshotStore::new();
        let (key, t0) = (EntityKey::new(), Utc::now());
        let owner = OwnerId::new();
        store.put(record(key, owner, CompanionKind::Mount, t0));

        let outcome = store.put(record(key, OwnerId::new(), CompanionKind::Mount, t0 + Duration::seconds(1)));
        assert_eq!(outcome, PutOutcome::OwnerConflict);
        assert_eq!(store.get(&key).expect("present").owner, owner);
    }

    #[test]
    fn owner_index_filters_by_kind() {
        let mut store = SnapshotStore::new();
        let owner = OwnerId::new();
        let now = Utc::now();
        store.put(record(EntityKey::new(), owner, CompanionKind::Pet, now));
        store.put(record(EntityKey::new(), owner, CompanionKind::Pet, now));
        store.put(record(EntityKey::new(), owner, CompanionKind::Mount, now));
        store.put(record(EntityKey::new(), OwnerId::new(), CompanionKind::Pet, now));

        assert_eq!(store.get_by_owner(owner, None).len(), 3);
        assert_eq!(store.get_by_owner(owner, Some(CompanionKind::Pet)).len(), 2);
        assert_eq!(store.get_by_owner(owner, Some(CompanionKind::Mount)).len(), 1);
        assert!(store.get_by_owner(OwnerId::new(), None).is_empty());
    }

    #[test]
    fn remove_is_idempotent_and_updates_index() {
        let mut store = SnapshotStore::new();
        let (key, owner) = (EntityKey::new(), OwnerId::new());
        store.put(record(key, owner, CompanionKind::Pet, Utc::now()));

        assert!(store.remove(&key).is_some());
        assert!(store.remove(&key).is_none());
        assert!(store.get_by_owner(owner, None).is_empty());
    }

    #[test]
    fn mark_dead_clears_snapshot_and_stamps_once() {
        let mut store = SnapshotStore::new();
        let (key, owner, t0) = (EntityKey::new(), OwnerId::new(), Utc::now());
        store.put(record(key, owner, CompanionKind::Pet, t0));

        let died = t0 + Duration::minutes(3);
        assert!(store.mark_dead(&key, died));
        assert!(!store.mark_dead(&key, died + Duration::hours(2)));

        let got = store.get(&key).expect("retained");
        assert!(!got.alive);
        assert!(got.snapshot.is_none());
        assert_eq!(got.last_updated, died);
    }

    #[test]
    fn purge_only_removes_expired_dead() {
        let mut store = SnapshotStore::new();
        let owner = OwnerId::new();
        let t0 = Utc::now();
        let (dead_old, dead_new, alive) = (EntityKey::new(), EntityKey::new(), EntityKey::new());
        for key in [dead_old, dead_new, alive] {
            store.put(record(key, owner, CompanionKind::Pet, t0));
        }
        store.mark_dead(&dead_old, t0);
        store.mark_dead(&dead_new, t0 + Duration::hours(20));

        let purged = store.purge_dead_before(t0 + Duration::hours(1));
        assert_eq!(purged, vec![dead_old]);
        assert!(store.contains(&dead_new));
        assert!(store.contains(&alive));
    }

    #[test]
    fn dirty_tracking() {
        let mut store = SnapshotStore::from_records(vec![record(
            EntityKey::new(),
            OwnerId::new(),
            CompanionKind::Pet,
            Utc::now(),
        )]);
        assert!(!store.is_dirty());
        store.put(record(EntityKey::new(), OwnerId::new(), CompanionKind::Pet, Utc::now()));
        assert!(store.is_dirty());
        store.mark_clean();
        assert!(!store.is_dirty());
    }

    #[test]
    fn latest_by_key_keeps_newest() {
        let (key, owner, t0) = (EntityKey::new(), OwnerId::new(), Utc::now());
        let mut old = record(key, owner, CompanionKind::Pet, t0);
        old.position = Position::new(1.0, 0.0, 0.0);
        let mut new = record(key, owner, CompanionKind::Pet, t0 + Duration::seconds(10));
        new.position = Position::new(2.0, 0.0, 0.0);
        let other = record(EntityKey::new(), owner, CompanionKind::Pet, t0);

        let merged = latest_by_key([&new, &old, &other]);
        assert_eq!(merged.len(), 2);
        let rex = merged.iter().find(|r| r.key == key).expect("present");
        assert_eq!(rex.position, Position::new(2.0, 0.0, 0.0));
    }
}
