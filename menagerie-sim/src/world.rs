//! A deterministic in-memory partition.
//!
//! [`SimPartition`] keeps objects, connected owners and hostiles in ordered
//! maps and encodes snapshots as JSON. Faults can be switched on per
//! partition to exercise the registry's failure paths.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use menagerie_core::engine::{EngineError, HostileState, ObjectState, OwnerPresence, Partition};
use menagerie_core::ownership::{Capability, ReleasePlan};
use menagerie_core::types::{EntityKey, OwnerId, PartitionId, Position, Snapshot};

/// Default max health of spawned objects.
pub const DEFAULT_HEALTH: f32 = 20.0;

/// A simulated object. This whole struct is what a snapshot encodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimObject {
    /// Stable key.
    pub key: EntityKey,
    /// Species name.
    pub species: String,
    /// Ownership representation.
    pub capability: Capability,
    /// Partition the object believes it lives in.
    pub partition: Option<PartitionId>,
    /// Position.
    pub position: Position,
    /// Liveness.
    pub alive: bool,
    /// Health.
    pub health: f32,
    /// Max health.
    pub max_health: f32,
    /// Custom name.
    pub display_name: Option<String>,
    /// Attack target.
    pub target: Option<EntityKey>,
    /// Sitting flag.
    pub sitting: bool,
    /// Who is riding.
    pub riders: Vec<OwnerId>,
    /// Carried items.
    pub inventory: Vec<String>,
}

impl SimObject {
    /// A fresh, healthy object at the origin.
    #[must_use]
    pub fn new(species: impl Into<String>, capability: Capability) -> Self {
        Self {
            key: EntityKey::new(),
            species: species.into(),
            capability,
            partition: None,
            position: Position::default(),
            alive: true,
            health: DEFAULT_HEALTH,
            max_health: DEFAULT_HEALTH,
            display_name: None,
            target: None,
            sitting: false,
            riders: Vec::new(),
            inventory: Vec::new(),
        }
    }

    /// A tamed pet.
    #[must_use]
    pub fn pet(owner: OwnerId, species: impl Into<String>) -> Self {
        Self::new(species, Capability::Tamed { owner: Some(owner) })
    }

    /// A harnessed mount.
    #[must_use]
    pub fn mount(owner: OwnerId, species: impl Into<String>) -> Self {
        Self::new(species, Capability::Harnessed { tamed: true, owner: Some(owner) })
    }

    /// An untamed creature.
    #[must_use]
    pub fn wild(species: impl Into<String>) -> Self {
        Self::new(species, Capability::Tamed { owner: None })
    }

    /// Set the custom name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the position.
    #[must_use]
    pub const fn at(mut self, position: Position) -> Self {
        self.position = position;
        self
    }

    /// Set current health.
    #[must_use]
    pub const fn with_health(mut self, health: f32) -> Self {
        self.health = health;
        self
    }

    /// Add a rider.
    #[must_use]
    pub fn ridden_by(mut self, rider: OwnerId) -> Self {
        self.riders.push(rider);
        self
    }

    /// Add carried items.
    #[must_use]
    pub fn carrying(mut self, items: &[&str]) -> Self {
        self.inventory.extend(items.iter().map(|s| (*s).to_owned()));
        self
    }

    /// Read-only view handed to the registry.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        ObjectState {
            key: self.key,
            species: self.species.clone(),
            capability: self.capability,
            position: self.position,
            alive: self.alive,
            health: self.health,
            max_health: self.max_health,
            display_name: self.display_name.clone(),
            target: self.target,
            sitting: self.sitting,
            has_riders: !self.riders.is_empty(),
        }
    }
}

/// A hostile creature hunting one owner.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SimHostile {
    position: Position,
    hunting: OwnerId,
}

/// Switchable failure injection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Faults {
    /// `capture` fails.
    pub capture: bool,
    /// `reconstruct` fails.
    pub reconstruct: bool,
    /// `activate` fails.
    pub activate: bool,
}

/// One simulated partition.
#[derive(Debug)]
pub struct SimPartition {
    id: PartitionId,
    objects: BTreeMap<EntityKey, SimObject>,
    staged: HashMap<EntityKey, SimObject>,
    owners: BTreeMap<OwnerId, Position>,
    hostiles: BTreeMap<EntityKey, SimHostile>,
    blocked_sight: HashSet<(EntityKey, EntityKey)>,
    /// Active failure injection.
    pub faults: Faults,
    /// Messages delivered to owners, in order.
    pub inbox: Vec<(OwnerId, String)>,
    /// Items dropped on the ground.
    pub ground: Vec<String>,
}

impl SimPartition {
    /// An empty partition.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: PartitionId::new(id),
            objects: BTreeMap::new(),
            staged: HashMap::new(),
            owners: BTreeMap::new(),
            hostiles: BTreeMap::new(),
            blocked_sight: HashSet::new(),
            faults: Faults::default(),
            inbox: Vec::new(),
            ground: Vec::new(),
        }
    }

    /// Place an object in this partition. Returns its key.
    pub fn spawn(&mut self, mut object: SimObject) -> EntityKey {
        let key = object.key;
        object.partition = Some(self.id.clone());
        self.objects.insert(key, object);
        key
    }

    /// Connect an owner at `position`, or move them there.
    pub fn join(&mut self, owner: OwnerId, position: Position) {
        self.owners.insert(owner, position);
    }

    /// Disconnect an owner.
    pub fn leave(&mut self, owner: OwnerId) {
        self.owners.remove(&owner);
    }

    /// Add a hostile hunting `owner`. Returns its key.
    pub fn add_hostile(&mut self, hunting: OwnerId, position: Position) -> EntityKey {
        let key = EntityKey::new();
        self.hostiles.insert(key, SimHostile { position, hunting });
        key
    }

    /// Kill a hostile. Returns whether it existed.
    pub fn slay_hostile(&mut self, key: EntityKey) -> bool {
        self.hostiles.remove(&key).is_some()
    }

    /// Make `target` invisible to `viewer`.
    pub fn block_sight(&mut self, viewer: EntityKey, target: EntityKey) {
        self.blocked_sight.insert((viewer, target));
    }

    /// Borrow a loaded object.
    #[must_use]
    pub fn get(&self, key: EntityKey) -> Option<&SimObject> {
        self.objects.get(&key)
    }

    /// Mutably borrow a loaded object.
    pub fn get_mut(&mut self, key: EntityKey) -> Option<&mut SimObject> {
        self.objects.get_mut(&key)
    }

    /// Kill a loaded object in place.
    pub fn kill(&mut self, key: EntityKey) {
        if let Some(obj) = self.objects.get_mut(&key) {
            obj.alive = false;
            obj.health = 0.0;
        }
    }

    /// Number of loaded objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Messages received by `owner`.
    pub fn messages_for(&self, owner: OwnerId) -> Vec<&str> {
        self.inbox
            .iter()
            .filter(|(to, _)| *to == owner)
            .map(|(_, msg)| msg.as_str())
            .collect()
    }

    fn loaded(&mut self, key: EntityKey) -> Result<&mut SimObject, EngineError> {
        self.objects.get_mut(&key).ok_or(EngineError::NotLoaded(key))
    }
}

impl Partition for SimPartition {
    fn id(&self) -> &PartitionId {
        &self.id
    }

    fn online_owners(&self) -> Vec<OwnerPresence> {
        self.owners
            .iter()
            .map(|(&owner, &position)| OwnerPresence { owner, position })
            .collect()
    }

    fn object(&self, key: EntityKey) -> Option<ObjectState> {
        self.objects.get(&key).map(SimObject::state)
    }

    fn objects_near(&self, center: Position, radius: f64) -> Vec<ObjectState> {
        self.objects
            .values()
            .filter(|o| o.position.within(&center, radius))
            .map(SimObject::state)
            .collect()
    }

    fn loaded_objects(&self) -> Vec<ObjectState> {
        self.objects.values().map(SimObject::state).collect()
    }

    fn capture(&self, key: EntityKey) -> Result<Snapshot, EngineError> {
        if self.faults.capture {
            return Err(EngineError::Other("capture disabled".into()));
        }
        let obj = self.objects.get(&key).ok_or(EngineError::NotLoaded(key))?;
        serde_json::to_vec(obj)
            .map(Snapshot)
            .map_err(|e| EngineError::Other(e.to_string()))
    }

    fn reconstruct(&mut self, snapshot: &Snapshot) -> Result<EntityKey, EngineError> {
        if self.faults.reconstruct {
            return Err(EngineError::BadSnapshot("reconstruction disabled".into()));
        }
        let obj: SimObject =
            serde_json::from_slice(snapshot.as_bytes()).map_err(|e| EngineError::BadSnapshot(e.to_string()))?;
        let key = obj.key;
        self.staged.insert(key, obj);
        Ok(key)
    }

    fn activate(&mut self, key: EntityKey, position: Position) -> Result<(), EngineError> {
        let mut obj = self.staged.remove(&key).ok_or(EngineError::NotLoaded(key))?;
        if self.faults.activate {
            return Err(EngineError::Placement(format!("no room at {position}")));
        }
        obj.partition = Some(self.id.clone());
        obj.position = position;
        trace!(%key, partition = %self.id, "Activated");
        self.objects.insert(key, obj);
        Ok(())
    }

    fn destroy(&mut self, key: EntityKey) -> bool {
        self.objects.remove(&key).is_some()
    }

    fn teleport(&mut self, key: EntityKey, position: Position) -> Result<(), EngineError> {
        self.loaded(key)?.position = position;
        Ok(())
    }

    fn heal(&mut self, key: EntityKey, amount: f32) {
        if let Some(obj) = self.objects.get_mut(&key) {
            obj.health = (obj.health + amount).min(obj.max_health);
        }
    }

    fn set_target(&mut self, key: EntityKey, target: Option<EntityKey>) {
        if let Some(obj) = self.objects.get_mut(&key) {
            obj.target = target;
        }
    }

    fn set_sitting(&mut self, key: EntityKey, sitting: bool) {
        if let Some(obj) = self.objects.get_mut(&key) {
            obj.sitting = sitting;
        }
    }

    fn dismount_riders(&mut self, key: EntityKey) -> Vec<OwnerId> {
        let Some(obj) = self.objects.get_mut(&key) else {
            return Vec::new();
        };
        if let Capability::RiddenSaddle { rider, .. } = &mut obj.capability {
            *rider = None;
        }
        std::mem::take(&mut obj.riders)
    }

    fn hostiles_targeting(&self, owner: OwnerId, center: Position, range: f64) -> Vec<HostileState> {
        self.hostiles
            .iter()
            .filter(|(_, h)| h.hunting == owner && h.position.within(&center, range))
            .map(|(&key, h)| HostileState { key, position: h.position })
            .collect()
    }

    fn can_see(&self, viewer: EntityKey, target: EntityKey) -> bool {
        !self.blocked_sight.contains(&(viewer, target))
    }

    fn is_alive(&self, key: EntityKey) -> bool {
        self.hostiles.contains_key(&key) || self.objects.get(&key).is_some_and(|o| o.alive)
    }

    fn release(&mut self, key: EntityKey, plan: ReleasePlan) -> Result<(), EngineError> {
        if plan == ReleasePlan::Destroy {
            return if self.destroy(key) { Ok(()) } else { Err(EngineError::NotLoaded(key)) };
        }
        let obj = self.loaded(key)?;
        obj.capability = match plan {
            ReleasePlan::StripOwnership => Capability::Harnessed { tamed: false, owner: None },
            _ => Capability::Tamed { owner: None },
        };
        obj.sitting = false;
        obj.target = None;
        obj.display_name = None;
        Ok(())
    }

    fn drop_inventory(&mut self, key: EntityKey) -> usize {
        let Some(obj) = self.objects.get_mut(&key) else {
            return 0;
        };
        let items = std::mem::take(&mut obj.inventory);
        let count = items.len();
        self.ground.extend(items);
        count
    }

    fn notify(&mut self, owner: OwnerId, message: &str) {
        self.inbox.push((owner, message.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reconstructs_in_another_partition() {
        let owner = OwnerId::new();
        let mut home = SimPartition::new("overworld");
        let key = home.spawn(SimObject::pet(owner, "wolf").named("Rex").with_health(7.0));
        let snapshot = home.capture(key).expect("capture");

        let mut away = SimPartition::new("nether");
        let staged = away.reconstruct(&snapshot).expect("reconstruct");
        assert_eq!(staged, key);
        assert!(away.object(key).is_none(), "staged objects are not live");

        away.activate(key, Position::new(5.0, 64.0, 5.0)).expect("activate");
        let obj = away.get(key).expect("loaded");
        assert_eq!(obj.partition.as_ref().map(ToString::to_string).as_deref(), Some("nether"));
        assert_eq!(obj.display_name.as_deref(), Some("Rex"));
        assert!((obj.health - 7.0).abs() < f32::EPSILON);
    }

    #[test]
    fn failed_activation_discards_staged_object() {
        let owner = OwnerId::new();
        let mut home = SimPartition::new("a");
        let key = home.spawn(SimObject::pet(owner, "cat"));
        let snapshot = home.capture(key).expect("capture");

        let mut away = SimPartition::new("b");
        away.faults.activate = true;
        away.reconstruct(&snapshot).expect("reconstruct");
        assert!(away.activate(key, Position::default()).is_err());
        away.faults.activate = false;
        assert_eq!(away.activate(key, Position::default()), Err(EngineError::NotLoaded(key)));
    }

    #[test]
    fn release_clears_ownership() {
        let owner = OwnerId::new();
        let mut p = SimPartition::new("a");
        let key = p.spawn(SimObject::mount(owner, "horse").named("Thunder"));
        p.release(key, ReleasePlan::StripOwnership).expect("release");
        let obj = p.get(key).expect("still loaded");
        assert_eq!(obj.capability.owner(), None);
        assert_eq!(obj.display_name, None);

        p.release(key, ReleasePlan::Destroy).expect("destroy");
        assert!(p.is_empty());
    }

    #[test]
    fn dismount_ends_saddle_ownership() {
        let rider = OwnerId::new();
        let mut p = SimPartition::new("a");
        let key = p.spawn(
            SimObject::new("pig", Capability::RiddenSaddle { saddled: true, rider: Some(rider) }).ridden_by(rider),
        );
        assert_eq!(p.dismount_riders(key), vec![rider]);
        assert_eq!(p.object(key).and_then(|o| o.owner()), None);
    }
}
