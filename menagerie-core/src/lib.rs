//! # Menagerie Core Library
//!
//! Engine-agnostic registry and lifecycle manager for player-owned
//! companions (pets and mounts) living in a host simulation that is split
//! into independently ticked partitions.
//!
//! - **Store**: per-partition snapshot records, last-writer-wins by timestamp
//! - **Dead registry**: durable, append-only tombstones
//! - **Relocation**: move a companion between partitions with single residency
//! - **Scheduler**: cadence-driven capture, aggression, regen and dead sweeps
//! - **Commands**: call/find/list/setfree/dismiss/follow/sit pipelines
//! - **Hooks**: load, interaction and damage event handlers
//!
//! The host engine is reached only through the [`engine::Partition`] trait.
//! Everything runs on the host's tick thread; the [`DeadRegistry`] is the only
//! piece shared behind locks.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod clock;
pub mod commands;
pub mod config;
pub mod cooldown;
pub mod dead_registry;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod kennel;
pub mod metrics;
pub mod ownership;
pub mod persistence;
pub mod relocation;
pub mod scheduler;
pub mod store;
pub mod types;

pub use commands::{execute, Command, CommandOutcome, Invoker, SoundCue};
pub use config::MenagerieConfig;
pub use dead_registry::DeadRegistry;
pub use engine::{EngineError, ObjectState, Partition};
pub use error::MenagerieError;
pub use kennel::{Kennel, Shard};
pub use relocation::relocate;
pub use scheduler::{on_tick, TickReport};
pub use store::{PutOutcome, SnapshotStore};
pub use types::*;
