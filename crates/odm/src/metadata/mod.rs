//! Entity metadata.
//!
//! - [`schema`] - declared schemas, field descriptors, and tags
//! - [`EntityMetadata`] - the extracted, immutable per-type descriptor
//! - [`MetadataRegistry`] - extraction and the lazily filled per-type cache
//!
//! # Example
//!
//! ```ignore
//! use helios_odm::metadata::MetadataRegistry;
//!
//! let registry = MetadataRegistry::new();
//! let metadata = registry.get::<User>();
//! assert_eq!(metadata.collection_name(), "users");
//! assert_eq!(metadata.id_field().map(|f| f.key()), Some("_id"));
//! ```

mod entity;
mod registry;
pub mod schema;

pub use entity::EntityMetadata;
pub use registry::{ID_KEY, MetadataRegistry, extract};
pub use schema::{
    CompoundIndexTag, EntitySchema, EnumType, FieldDescriptor, FieldTags, FieldType,
    GeneratedTag, IdTag, IndexKind, IndexOptions, IndexTag, TriggerAction, TriggerDecl,
    TriggerFn, TriggerPhase, TypeRef,
};
