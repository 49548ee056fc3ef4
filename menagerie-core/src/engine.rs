//! The narrow interface the registry uses to reach a simulation engine.
//!
//! One [`Partition`] implementation wraps one independently-ticked region.
//! The registry never interprets snapshots, computes line of sight or moves
//! objects itself; it asks the partition.

use thiserror::Error;

use crate::ownership::{Capability, ReleasePlan};
use crate::types::{EntityKey, OwnerId, PartitionId, Position, Snapshot};

/// Failure inside an engine adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The object is not loaded in this partition.
    #[error("object {0} is not loaded")]
    NotLoaded(EntityKey),
    /// The snapshot could not be decoded into a live object.
    #[error("snapshot rejected: {0}")]
    BadSnapshot(String),
    /// The object could not be placed at the requested position.
    #[error("placement failed: {0}")]
    Placement(String),
    /// Anything else the engine reports.
    #[error("{0}")]
    Other(String),
}

/// A connected owner and where they stand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnerPresence {
    /// Who.
    pub owner: OwnerId,
    /// Where.
    pub position: Position,
}

/// Read-only view of a loaded companion candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectState {
    /// Stable key.
    pub key: EntityKey,
    /// Engine species name, classified by the allow-lists.
    pub species: String,
    /// How the object records ownership.
    pub capability: Capability,
    /// Current position.
    pub position: Position,
    /// Liveness as reported by the engine.
    pub alive: bool,
    /// Current health.
    pub health: f32,
    /// Maximum health.
    pub max_health: f32,
    /// Custom name.
    pub display_name: Option<String>,
    /// Current attack target.
    pub target: Option<EntityKey>,
    /// Whether the object is sitting.
    pub sitting: bool,
    /// Whether anything rides the object.
    pub has_riders: bool,
}

impl ObjectState {
    /// Health as a percentage of max health.
    #[must_use]
    pub fn health_percent(&self) -> f32 {
        if self.max_health <= 0.0 {
            0.0
        } else {
            self.health / self.max_health * 100.0
        }
    }

    /// The resolved owner.
    #[must_use]
    pub const fn owner(&self) -> Option<OwnerId> {
        self.capability.owner()
    }
}

/// A hostile creature as seen by the aggression pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostileState {
    /// Key of the hostile.
    pub key: EntityKey,
    /// Where it is.
    pub position: Position,
}

/// Operations the registry needs from one partition of the simulation.
pub trait Partition {
    /// Identity of the partition.
    fn id(&self) -> &PartitionId;

    /// Owners currently connected to this partition.
    fn online_owners(&self) -> Vec<OwnerPresence>;

    /// Look up a loaded object.
    fn object(&self, key: EntityKey) -> Option<ObjectState>;

    /// Loaded objects within `radius` of `center`.
    fn objects_near(&self, center: Position, radius: f64) -> Vec<ObjectState>;

    /// Every loaded object.
    fn loaded_objects(&self) -> Vec<ObjectState>;

    /// Serialize a loaded object.
    ///
    /// # Errors
    /// Fails if the object is not loaded or cannot be encoded.
    fn capture(&self, key: EntityKey) -> Result<Snapshot, EngineError>;

    /// Decode a snapshot into a staged object that is not yet in the world.
    ///
    /// # Errors
    /// Fails if the snapshot cannot be decoded.
    fn reconstruct(&mut self, snapshot: &Snapshot) -> Result<EntityKey, EngineError>;

    /// Rewrite a staged object's partition fields to this partition, place
    /// it at `position` and make it live. A failed activation discards the
    /// staged object.
    ///
    /// # Errors
    /// Fails if placement is impossible.
    fn activate(&mut self, key: EntityKey, position: Position) -> Result<(), EngineError>;

    /// Remove a loaded object. Returns whether anything was removed.
    fn destroy(&mut self, key: EntityKey) -> bool;

    /// Move a loaded object within this partition.
    ///
    /// # Errors
    /// Fails if the object is not loaded.
    fn teleport(&mut self, key: EntityKey, position: Position) -> Result<(), EngineError>;

    /// Restore up to `amount` health, capped at max health.
    fn heal(&mut self, key: EntityKey, amount: f32);

    /// Set or clear an object's attack target, anger included.
    fn set_target(&mut self, key: EntityKey, target: Option<EntityKey>);

    /// Set the sitting flag.
    fn set_sitting(&mut self, key: EntityKey, sitting: bool);

    /// Eject everything riding the object; returns the ejected owners.
    fn dismount_riders(&mut self, key: EntityKey) -> Vec<OwnerId>;

    /// Hostiles currently targeting `owner` within `range` of `center`.
    fn hostiles_targeting(&self, owner: OwnerId, center: Position, range: f64) -> Vec<HostileState>;

    /// Whether `viewer` can see `target`.
    fn can_see(&self, viewer: EntityKey, target: EntityKey) -> bool;

    /// Whether `key` names a living creature, companion or hostile.
    fn is_alive(&self, key: EntityKey) -> bool;

    /// Apply a release plan to a loaded object.
    ///
    /// # Errors
    /// Fails if the object is not loaded.
    fn release(&mut self, key: EntityKey, plan: ReleasePlan) -> Result<(), EngineError>;

    /// Drop everything the object carries on the ground; returns the item count.
    fn drop_inventory(&mut self, key: EntityKey) -> usize;

    /// Send a text message to an owner.
    fn notify(&mut self, owner: OwnerId, message: &str);
}
