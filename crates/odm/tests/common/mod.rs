//! Test infrastructure for the mapping engine.
//!
//! Provides the entity fixtures shared by the integration tests and a
//! harness wiring a [`Datastore`](helios_odm::Datastore) over an in-memory
//! store with its own metadata registry.

#![allow(dead_code)]

pub mod fixtures;
pub mod harness;

// Re-export commonly used items
pub use fixtures::*;
pub use harness::*;
