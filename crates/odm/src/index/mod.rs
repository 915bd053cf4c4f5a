//! Index derivation and management.
//!
//! [`derive_index_specs`] turns the indexed fields and compound declarations
//! of an [`EntityMetadata`](crate::metadata::EntityMetadata) into store-level
//! [`IndexSpec`]s; [`IndexManager`] issues them against a document store at
//! most once per type and process.

mod manager;
mod spec;

pub use manager::IndexManager;
pub use spec::{IndexKey, IndexSpec, derive_index_specs, parse_index_key};
