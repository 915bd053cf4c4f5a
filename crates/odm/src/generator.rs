//! Value generators.
//!
//! A [`Generator`] produces the value of an auto-increment id or a
//! generated-value field during save. Whether a generator runs at all is
//! decided by the serialization chain (see [`should_generate`]); the
//! generator only produces the value.
//!
//! Built-in generators, registered under their names in every
//! [`GeneratorRegistry::with_defaults`]:
//!
//! | Name | Value |
//! |------|-------|
//! | `sequence` | next value of a per-collection counter document |
//! | `uuid` | random v4 UUID as a string |
//! | `object_id` | fresh `ObjectId` |
//! | `timestamp` | current UTC time |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, doc};
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{MappingError, MappingResult};
use crate::metadata::{EntityMetadata, FieldDescriptor};
use crate::model::FieldValue;
use crate::store::DocumentStore;

/// Name of the generator used when a tag does not name one.
pub const DEFAULT_GENERATOR: &str = "sequence";

/// Default collection holding sequence counters.
pub const DEFAULT_COUNTERS_COLLECTION: &str = "_counters";

/// Produces field values during save.
pub trait Generator: Send + Sync {
    /// Name the generator is registered under.
    fn name(&self) -> &str;

    /// Produces a value for `field` of an entity of type `owner`.
    ///
    /// `Ok(None)` leaves the field absent from the serialized document.
    fn generate(
        &self,
        owner: &EntityMetadata,
        field: &FieldDescriptor,
        store: &dyn DocumentStore,
    ) -> MappingResult<Option<FieldValue>>;
}

/// Decides whether a field's generator runs for the current value.
///
/// - auto-increment id: whenever the tag's flag is set, whatever the value
/// - generated field: when the `update` flag is set, or the current value is
///   the zero of its numeric type (non-numeric values never count as zero)
pub fn should_generate(field: &FieldDescriptor, current: &FieldValue) -> bool {
    if let Some(id) = field.id_tag() {
        return id.auto_increment;
    }
    match field.generated_tag() {
        Some(tag) => tag.update || current.is_zero(),
        None => false,
    }
}

/// Returns the generator name configured on a field's tags.
pub fn generator_name(field: &FieldDescriptor) -> Option<&str> {
    if let Some(tag) = field.generated_tag() {
        return Some(tag.generator.as_str());
    }
    field
        .id_tag()
        .filter(|id| id.auto_increment)
        .map(|id| id.generator.as_deref().unwrap_or(DEFAULT_GENERATOR))
}

// ============================================================================
// Built-in generators
// ============================================================================

/// Increments a counter document in the counters collection.
///
/// The counter of an id field is keyed by the collection name; any other
/// field uses `<collection>.<key>`. Counters start at 1.
#[derive(Debug, Clone)]
pub struct SequenceGenerator {
    counters_collection: String,
}

impl SequenceGenerator {
    /// Creates a generator keeping its counters in `counters_collection`.
    pub fn new(counters_collection: impl Into<String>) -> Self {
        Self {
            counters_collection: counters_collection.into(),
        }
    }

    /// Returns the counter name used for a field.
    pub fn counter_name(owner: &EntityMetadata, field: &FieldDescriptor) -> String {
        if field.is_id() {
            owner.collection_name().to_string()
        } else {
            format!("{}.{}", owner.collection_name(), field.key())
        }
    }
}

impl Default for SequenceGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTERS_COLLECTION)
    }
}

impl Generator for SequenceGenerator {
    fn name(&self) -> &str {
        "sequence"
    }

    fn generate(
        &self,
        owner: &EntityMetadata,
        field: &FieldDescriptor,
        store: &dyn DocumentStore,
    ) -> MappingResult<Option<FieldValue>> {
        let counter = Self::counter_name(owner, field);
        let counters = store.collection(&self.counters_collection);
        let updated = counters.find_one_and_update(
            &doc! { "_id": counter.as_str() },
            &doc! { "$inc": { "seq": 1_i64 } },
            true,
        )?;

        let next = updated
            .as_ref()
            .and_then(|d| d.get("seq"))
            .and_then(|seq| match seq {
                Bson::Int32(v) => Some(i64::from(*v)),
                Bson::Int64(v) => Some(*v),
                Bson::Double(v) => Some(*v as i64),
                _ => None,
            })
            .ok_or_else(|| MappingError::Generator {
                generator: self.name().to_string(),
                message: format!("counter '{}' has no numeric 'seq' value", counter),
            })?;

        tracing::trace!("Sequence '{}' advanced to {}", counter, next);
        Ok(Some(FieldValue::Long(next)))
    }
}

/// Produces random v4 UUID strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl Generator for UuidGenerator {
    fn name(&self) -> &str {
        "uuid"
    }

    fn generate(
        &self,
        _owner: &EntityMetadata,
        _field: &FieldDescriptor,
        _store: &dyn DocumentStore,
    ) -> MappingResult<Option<FieldValue>> {
        Ok(Some(FieldValue::String(uuid::Uuid::new_v4().to_string())))
    }
}

/// Produces fresh `ObjectId`s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectIdGenerator;

impl Generator for ObjectIdGenerator {
    fn name(&self) -> &str {
        "object_id"
    }

    fn generate(
        &self,
        _owner: &EntityMetadata,
        _field: &FieldDescriptor,
        _store: &dyn DocumentStore,
    ) -> MappingResult<Option<FieldValue>> {
        Ok(Some(FieldValue::Id(Bson::ObjectId(ObjectId::new()))))
    }
}

/// Produces the current UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampGenerator;

impl Generator for TimestampGenerator {
    fn name(&self) -> &str {
        "timestamp"
    }

    fn generate(
        &self,
        _owner: &EntityMetadata,
        _field: &FieldDescriptor,
        _store: &dyn DocumentStore,
    ) -> MappingResult<Option<FieldValue>> {
        Ok(Some(FieldValue::DateTime(Utc::now())))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Generators by name.
pub struct GeneratorRegistry {
    generators: RwLock<HashMap<String, Arc<dyn Generator>>>,
}

impl GeneratorRegistry {
    /// Creates a registry without any generator.
    pub fn empty() -> Self {
        Self {
            generators: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry holding the built-in generators.
    pub fn with_defaults(counters_collection: impl Into<String>) -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(SequenceGenerator::new(counters_collection)));
        registry.register(Arc::new(UuidGenerator));
        registry.register(Arc::new(ObjectIdGenerator));
        registry.register(Arc::new(TimestampGenerator));
        registry
    }

    /// Registers a generator, replacing one with the same name.
    pub fn register(&self, generator: Arc<dyn Generator>) {
        let name = generator.name().to_string();
        if self
            .generators
            .write()
            .insert(name.clone(), generator)
            .is_some()
        {
            tracing::debug!("Replaced generator '{}'", name);
        }
    }

    /// Looks up a generator.
    pub fn get(&self, name: &str) -> MappingResult<Arc<dyn Generator>> {
        self.generators
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| MappingError::UnknownGenerator {
                name: name.to_string(),
            })
    }

    /// Returns the registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.generators.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_defaults(DEFAULT_COUNTERS_COLLECTION)
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("generators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FieldType, GeneratedTag, IdTag};

    fn generated(update: bool) -> FieldDescriptor {
        FieldDescriptor::new("counter", FieldType::Long, false)
            .with_generated(GeneratedTag::new("sequence").with_update(update))
    }

    #[test]
    fn test_generated_field_runs_only_on_zero() {
        let field = generated(false);
        assert!(should_generate(&field, &FieldValue::Long(0)));
        assert!(should_generate(&field, &FieldValue::Int(0)));
        assert!(!should_generate(&field, &FieldValue::Long(5)));
    }

    #[test]
    fn test_generated_field_with_update_always_runs() {
        let field = generated(true);
        assert!(should_generate(&field, &FieldValue::Long(5)));
        assert!(should_generate(&field, &FieldValue::Null));
    }

    #[test]
    fn test_non_numeric_value_never_counts_as_zero() {
        let field = FieldDescriptor::new("token", FieldType::String, true)
            .with_generated(GeneratedTag::new("uuid"));
        assert!(!should_generate(&field, &FieldValue::String(String::new())));
        assert!(!should_generate(&field, &FieldValue::Null));
    }

    #[test]
    fn test_auto_increment_ignores_current_value() {
        let on = FieldDescriptor::new("id", FieldType::Long, true).with_id(IdTag {
            auto_increment: true,
            generator: None,
        });
        assert!(should_generate(&on, &FieldValue::Long(41)));
        assert_eq!(generator_name(&on), Some(DEFAULT_GENERATOR));

        let off = FieldDescriptor::new("id", FieldType::Long, true).with_id(IdTag::default());
        assert!(!should_generate(&off, &FieldValue::Null));
        assert_eq!(generator_name(&off), None);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = GeneratorRegistry::default();
        assert_eq!(
            registry.names(),
            vec!["object_id", "sequence", "timestamp", "uuid"]
        );
        assert!(registry.get("uuid").is_ok());
        assert!(matches!(
            registry.get("nope"),
            Err(MappingError::UnknownGenerator { .. })
        ));
    }
}
