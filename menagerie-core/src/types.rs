//! Core types shared across the registry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display-name bucket for companions that carry no custom name.
pub const UNNAMED: &str = "Noname";

/// Stable unique identifier of a companion, shared by every partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(pub Uuid);

impl EntityKey {
    /// Generate a new random key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a key from its hyphenated string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for EntityKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a player that can own companions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    /// Generate a new random owner id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an owner id from its hyphenated string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s.trim()).ok().map(Self)
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an independently-ticked region of simulated state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub String);

impl PartitionId {
    /// Build a partition id from anything string-like.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A point in a partition's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// East-west.
    pub x: f64,
    /// Up-down.
    pub y: f64,
    /// North-south.
    pub z: f64,
}

impl Position {
    /// Construct a position.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Squared euclidean distance to `other`.
    #[must_use]
    pub fn distance_sq(&self, other: &Self) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    /// Whether `other` lies within `radius` of this position.
    #[must_use]
    pub fn within(&self, other: &Self, radius: f64) -> bool {
        self.distance_sq(other) <= radius * radius
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.0}, {:.0}, {:.0})", self.x, self.y, self.z)
    }
}

/// The two families of companion the registry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanionKind {
    /// Follows its owner on foot, may fight.
    Pet,
    /// Carries its owner.
    Mount,
}

impl CompanionKind {
    /// Singular noun used in feedback text.
    #[must_use]
    pub const fn noun(self) -> &'static str {
        match self {
            Self::Pet => "pet",
            Self::Mount => "mount",
        }
    }

    /// Plural noun used in feedback text.
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Pet => "pets",
            Self::Mount => "mounts",
        }
    }

    /// Noun agreeing with `count`.
    #[must_use]
    pub const fn noun_for(self, count: usize) -> &'static str {
        if count == 1 { self.noun() } else { self.plural() }
    }
}

impl fmt::Display for CompanionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.noun())
    }
}

/// Opaque serialized live-object state. Only the engine interprets it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot(pub Vec<u8>);

impl Snapshot {
    /// Raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Byte length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty. Empty blobs are not usable for reconstruction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Snapshot({} bytes)", self.0.len())
    }
}

/// One tracked companion as seen by one partition's store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionRecord {
    /// Stable key.
    pub key: EntityKey,
    /// Owner; immutable once set.
    pub owner: OwnerId,
    /// Pet or mount.
    pub kind: CompanionKind,
    /// Where the companion was last captured.
    pub position: Position,
    /// Captured live state, cleared on death.
    pub snapshot: Option<Snapshot>,
    /// Custom name, if any.
    pub display_name: Option<String>,
    /// Wall-clock time of the last capture, or of death.
    pub last_updated: DateTime<Utc>,
    /// Whether the companion was alive at the last capture.
    pub alive: bool,
}

impl CompanionRecord {
    /// Name shown to players, falling back to [`UNNAMED`].
    #[must_use]
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(UNNAMED)
    }

    /// Whether the record carries a snapshot that can be reconstructed.
    #[must_use]
    pub fn has_usable_snapshot(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| !s.is_empty())
    }
}
