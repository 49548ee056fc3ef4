//! Error types for the menagerie core library.

use thiserror::Error;

use crate::types::{EntityKey, PartitionId};

/// Top-level error type for all registry operations.
#[derive(Error, Debug)]
pub enum MenagerieError {
    /// No partition's store holds a record for this key.
    #[error("Companion not found: {0}")]
    NotFound(EntityKey),

    /// The key is tombstoned, or some partition reports it not alive.
    #[error("Companion is dead: {0}")]
    Dead(EntityKey),

    /// A record exists but no usable snapshot could be found for it.
    #[error("No usable snapshot for companion: {0}")]
    NoSnapshot(EntityKey),

    /// The object has no owner, or not the expected one.
    #[error("Companion is not owned by the caller: {0}")]
    Unowned(EntityKey),

    /// The target is not currently loaded near the caller.
    #[error("No perceivable companion named '{name}'")]
    NotPerceivable {
        /// The name the caller asked for.
        name: String,
    },

    /// The object's species is not on a configured allow-list.
    #[error("Unsupported species: {0}")]
    Unsupported(String),

    /// No shard is registered for the partition.
    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// Reconstruction, placement or capture failed inside the engine.
    #[error("Transient engine failure: {0}")]
    TransientFailure(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<crate::engine::EngineError> for MenagerieError {
    fn from(e: crate::engine::EngineError) -> Self {
        Self::TransientFailure(e.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MenagerieError>;
