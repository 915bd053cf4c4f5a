//! Inter-entity references.
//!
//! - [`ReferenceResolver`] - load time: replaces stored identifiers with the
//!   referenced entities, per a [`LoadStrategy`]
//! - [`ReferenceHandler`] - save time: collects the referenced entities that
//!   must be persisted along with their owner, per a [`CascadeStrategy`]
//!
//! Both walk the reference graph with an explicit visited set keyed by
//! [`IdentityKey`], so mutually referencing entities terminate.

mod handler;
mod resolver;

use std::fmt;

use bson::Bson;
use bson::oid::ObjectId;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{MappingError, MappingResult};
use crate::metadata::{EntityMetadata, FieldDescriptor, FieldType, TypeRef};
use crate::model::{FieldValue, Object};

pub use handler::{CascadeEntry, CascadeSet, ReferenceHandler};
pub use resolver::ReferenceResolver;

/// How references are resolved when an entity is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStrategy {
    /// Resolve every reference, recursively into loaded entities.
    #[default]
    Eager,
    /// Resolve only the references declared on the loaded entity itself.
    EagerDirect,
    /// Leave stored identifiers untouched.
    Lazy,
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::Eager => write!(f, "eager"),
            LoadStrategy::EagerDirect => write!(f, "eager-direct"),
            LoadStrategy::Lazy => write!(f, "lazy"),
        }
    }
}

/// Which referenced entities are persisted when their owner is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum CascadeStrategy {
    /// Cascade at every depth.
    #[default]
    CascadeAll,
    /// Cascade only references declared on the saved entity.
    CascadeDirect,
    /// Never cascade; referenced entities must already be stored.
    NoCascade,
}

impl CascadeStrategy {
    /// Returns true if a referenced entity found at `depth` is persisted.
    ///
    /// The saved entity itself is depth 0, its direct references depth 1.
    pub fn should_save_reference(&self, depth: usize) -> bool {
        match self {
            CascadeStrategy::CascadeAll => true,
            CascadeStrategy::CascadeDirect => depth <= 1,
            CascadeStrategy::NoCascade => false,
        }
    }
}

impl fmt::Display for CascadeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CascadeStrategy::CascadeAll => write!(f, "cascade-all"),
            CascadeStrategy::CascadeDirect => write!(f, "cascade-direct"),
            CascadeStrategy::NoCascade => write!(f, "no-cascade"),
        }
    }
}

/// Loads entities by identifier.
///
/// Implemented by the datastore over a document store; tests provide their
/// own implementations.
pub trait Repository: Send + Sync {
    /// Loads the entity of type `type_ref` stored under `id`.
    ///
    /// The returned entity's own references are left unresolved.
    fn find_by_id(&self, type_ref: &TypeRef, id: &Bson) -> MappingResult<Option<Box<dyn Object>>>;
}

/// Identity of a stored entity: its collection and canonical identifier.
///
/// Numeric identifiers compare by value regardless of their stored width, so
/// an `Int32(7)` and an `Int64(7)` name the same entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey {
    collection: String,
    id: String,
}

impl IdentityKey {
    /// Creates the key of `id` in `collection`.
    pub fn new(collection: impl Into<String>, id: &Bson) -> Self {
        Self {
            collection: collection.into(),
            id: canonical_id(id),
        }
    }

    /// Collection part.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Canonical identifier part.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

fn canonical_id(id: &Bson) -> String {
    match id {
        Bson::Int32(v) => format!("n:{}", v),
        Bson::Int64(v) => format!("n:{}", v),
        Bson::Double(v) if v.fract() == 0.0 => format!("n:{}", *v as i64),
        Bson::String(s) => format!("s:{}", s),
        Bson::ObjectId(oid) => format!("o:{}", oid.to_hex()),
        other => format!("x:{}", other),
    }
}

/// Reads the identifier of an entity in its stored form.
///
/// Returns `Ok(None)` if the type declares no id field or the id is null.
pub fn entity_id(metadata: &EntityMetadata, entity: &dyn Object) -> MappingResult<Option<Bson>> {
    let Some(id_field) = metadata.id_field() else {
        return Ok(None);
    };
    let value = entity
        .get_field(id_field.name())
        .ok_or_else(|| MappingError::UnknownField {
            type_name: metadata.type_name().to_string(),
            field: id_field.name().to_string(),
        })?;
    Ok(id_to_bson(&value).map(|raw| stored_id(id_field, raw)))
}

/// Converts an id field value into its stored form.
pub fn id_to_bson(value: &FieldValue) -> Option<Bson> {
    match value {
        FieldValue::Null => None,
        other => other.to_scalar_bson(),
    }
}

/// Normalizes an identifier to the form it is stored under.
///
/// A `String` id field holding a valid object id hex string is stored as an
/// `ObjectId`, so a store-assigned id read back as a string keeps matching
/// its document. Every other value is returned unchanged.
pub fn stored_id(id_field: &FieldDescriptor, raw: Bson) -> Bson {
    match (id_field.field_type(), raw) {
        (FieldType::String, Bson::String(text)) => match ObjectId::parse_str(&text) {
            Ok(oid) => Bson::ObjectId(oid),
            Err(_) => Bson::String(text),
        },
        (_, other) => other,
    }
}

/// Returns the identity of an entity, if it has an identifier.
pub fn identity_of(metadata: &EntityMetadata, entity: &dyn Object) -> Option<IdentityKey> {
    entity_id(metadata, entity)
        .ok()
        .flatten()
        .map(|id| IdentityKey::new(metadata.collection_name(), &id))
}
