//! # Menagerie Sim
//!
//! Deterministic in-memory partitions implementing
//! [`menagerie_core::engine::Partition`], used by the integration tests, the
//! benchmarks and the `menagerie-sim` demo binary.

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use menagerie_core::clock::Clock;
use menagerie_core::{DeadRegistry, Kennel, MenagerieConfig};

pub mod world;

pub use world::{Faults, SimObject, SimPartition};

/// A kennel over simulated partitions with in-memory tombstones.
#[must_use]
pub fn sim_kennel(config: MenagerieConfig, clock: Arc<dyn Clock>) -> Kennel<SimPartition> {
    Kennel::new(config, Arc::new(DeadRegistry::in_memory()), clock)
}
