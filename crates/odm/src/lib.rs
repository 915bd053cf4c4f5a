//! Helios ODM
//!
//! An object-document mapping engine: typed entities are converted to and
//! from BSON documents driven by declarative per-field tags instead of
//! hand-written conversion code.
//!
//! # Features
//!
//! - `derive` (default) - `#[derive(Entity)]` and `#[derive(Enumerated)]`
//! - `mongodb` - [`store::MongoStore`], an adapter over the official driver's
//!   synchronous API
//!
//! # Architecture
//!
//! - [`metadata`] - declared schemas and the cached per-type [`EntityMetadata`](metadata::EntityMetadata)
//! - [`model`] - the object-safe [`Object`](model::Object) surface, field values, and references
//! - [`mapping`] - the priority-ordered serialization and deserialization chains
//! - [`reference`] - reference resolution on load and cascade handling on save
//! - [`index`] - index derivation and idempotent index management
//! - [`generator`] - value generators for auto-increment and generated fields
//! - [`store`] - the document store interface and its implementations
//! - [`datastore`] - CRUD glue wiring everything together
//! - [`config`] - engine configuration
//! - [`error`] - the mapping-layer error type
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use helios_odm::prelude::*;
//!
//! #[derive(Debug, Clone, Default, Entity)]
//! #[odm(collection = "users")]
//! struct User {
//!     #[odm(id)]
//!     username: String,
//!     #[odm(index(unique))]
//!     email: String,
//!     #[odm(reference)]
//!     address: Option<Ref<Address>>,
//! }
//!
//! #[derive(Debug, Clone, Default, Entity)]
//! struct Address {
//!     #[odm(id)]
//!     id: Option<i64>,
//!     street: String,
//! }
//!
//! let datastore = Datastore::new(Arc::new(MemoryStore::new()));
//! let mut user = User {
//!     username: "alice".into(),
//!     email: "alice@example.com".into(),
//!     address: Some(Ref::loaded(Address { id: Some(1), street: "Main St".into() })),
//! };
//! datastore.save(&mut user)?;
//!
//! let loaded: User = datastore.find_by_id::<User>("alice")?.unwrap();
//! assert!(loaded.address.unwrap().is_loaded());
//! ```

// Lets the derive output refer to `::helios_odm` from inside this crate.
extern crate self as helios_odm;

pub mod config;
pub mod datastore;
pub mod error;
pub mod generator;
pub mod index;
pub mod mapping;
pub mod metadata;
pub mod model;
pub mod reference;
pub mod store;

#[cfg(all(test, feature = "derive"))]
pub(crate) mod testing;

pub use config::OdmConfig;
pub use datastore::Datastore;
pub use error::{MappingError, MappingResult, StoreError, StoreResult};
pub use metadata::{EntityMetadata, MetadataRegistry};
pub use model::{Entity, Enumerated, FieldValue, Mapped, Object, Ref};

#[cfg(feature = "derive")]
pub use helios_odm_macro::{Entity, Enumerated};

/// Re-exports for glob import.
pub mod prelude {
    pub use crate::config::OdmConfig;
    pub use crate::datastore::Datastore;
    pub use crate::error::{MappingError, MappingResult};
    pub use crate::model::{Entity, Enumerated, FieldValue, Mapped, Object, Ref};
    pub use crate::reference::{CascadeStrategy, LoadStrategy};
    pub use crate::store::{DocumentStore, MemoryStore};

    #[cfg(feature = "derive")]
    pub use helios_odm_macro::{Entity, Enumerated};
}
