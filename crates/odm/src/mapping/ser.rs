//! Serialization chain: entity to document.
//!
//! Built-in strategies in dispatch order:
//!
//! | Priority | Strategy | Handles |
//! |----------|----------|---------|
//! | 0 | [`SkipNull`] | null values without a generator (key omitted) |
//! | 10 | [`ReferenceEncoding`] | reference fields, stored as the target's id |
//! | 20 | [`EmbeddedEncoding`] | embedded fields, stored as sub-documents |
//! | 30 | [`EnumEncoding`] | enum fields, stored by symbolic name |
//! | 40 | [`IdEncoding`] | the id field, with the auto-increment policy |
//! | 50 | [`GeneratedValueEncoding`] | generated-value fields |
//! | 1000 | [`PassThrough`] | everything else |
//!
//! A null field is omitted from the document rather than written as an
//! explicit null, so a serialized entity can be used for partial updates.

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{MappingError, MappingResult};
use crate::generator::{GeneratorRegistry, generator_name, should_generate};
use crate::metadata::{EntityMetadata, FieldDescriptor, MetadataRegistry};
use crate::model::{FieldValue, Object};
use crate::reference::{entity_id, id_to_bson, stored_id};
use crate::store::DocumentStore;

use super::coerce::coerce_value;

/// Priorities of the built-in serialization strategies.
pub mod priority {
    /// [`SkipNull`](super::SkipNull)
    pub const SKIP_NULL: i32 = 0;
    /// [`ReferenceEncoding`](super::ReferenceEncoding)
    pub const REFERENCE: i32 = 10;
    /// [`EmbeddedEncoding`](super::EmbeddedEncoding)
    pub const EMBEDDED: i32 = 20;
    /// [`EnumEncoding`](super::EnumEncoding)
    pub const ENUM: i32 = 30;
    /// [`IdEncoding`](super::IdEncoding)
    pub const ID: i32 = 40;
    /// [`GeneratedValueEncoding`](super::GeneratedValueEncoding)
    pub const GENERATED: i32 = 50;
    /// [`PassThrough`](super::PassThrough)
    pub const PASS_THROUGH: i32 = 1000;
}

/// State of one field conversion.
pub struct SerializationContext<'a> {
    field: &'a FieldDescriptor,
    value: FieldValue,
    metadata: &'a EntityMetadata,
    document: &'a mut Document,
    serializer: &'a Serializer,
    generated: &'a mut Vec<(String, FieldValue)>,
}

impl<'a> SerializationContext<'a> {
    /// Field being converted.
    pub fn field(&self) -> &FieldDescriptor {
        self.field
    }

    /// Current value of the field.
    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Metadata of the owning type.
    pub fn metadata(&self) -> &EntityMetadata {
        self.metadata
    }

    /// Document being built.
    pub fn document(&self) -> &Document {
        self.document
    }

    /// The chain running this conversion, for recursive calls.
    pub fn serializer(&self) -> &Serializer {
        self.serializer
    }

    /// Writes the field under its document key.
    pub fn write(&mut self, value: Bson) {
        self.document.insert(self.field.key(), value);
    }

    /// Runs the field's generator and writes its output.
    ///
    /// Returns false, writing nothing, if the generator produced no value.
    pub fn write_generated(&mut self) -> MappingResult<bool> {
        let Some(value) = self.serializer.generate(self.metadata, self.field)? else {
            tracing::debug!(
                "Generator produced no value for '{}.{}'; leaving it absent",
                self.metadata.type_name(),
                self.field.name()
            );
            return Ok(false);
        };
        let value = coerce_value(value, self.field.field_type(), self.field.name())?;
        match self.serializer.value_to_bson(&value)? {
            Some(raw) => {
                self.write(raw);
                self.generated.push((self.field.name().to_string(), value));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// One way of converting a field into its stored form.
pub trait SerializationStrategy: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Dispatch priority; lower runs first.
    fn priority(&self) -> i32;

    /// Returns true if this strategy converts the field.
    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool;

    /// Writes the field into the context's document, or omits it.
    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()>;
}

// ============================================================================
// Built-in strategies
// ============================================================================

/// Omits null fields that no generator populates.
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipNull;

impl SerializationStrategy for SkipNull {
    fn name(&self) -> &'static str {
        "skip-null"
    }

    fn priority(&self) -> i32 {
        priority::SKIP_NULL
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.value.is_null() && !ctx.field.is_generated()
    }

    fn serialize(&self, _ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        Ok(())
    }
}

/// Stores a reference field as the identifier of its target.
///
/// A loaded target without an identifier is a fatal mapping error; an
/// unresolved reference is written back as it was loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEncoding;

impl ReferenceEncoding {
    fn encode(ctx: &SerializationContext<'_>, value: &FieldValue) -> MappingResult<Bson> {
        match value {
            FieldValue::Object(target) => ctx.serializer.reference_id(target.as_ref()),
            FieldValue::Id(raw) => Ok(ctx.serializer.target_id(ctx.field, raw.clone())),
            FieldValue::Null => Ok(Bson::Null),
            other => other.to_scalar_bson().ok_or_else(|| {
                MappingError::type_mismatch(ctx.field.name(), "reference", other.kind_name())
            }),
        }
    }
}

impl SerializationStrategy for ReferenceEncoding {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn priority(&self) -> i32 {
        priority::REFERENCE
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.field.is_reference()
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        let view: &SerializationContext<'_> = ctx;
        let encoded = match &view.value {
            FieldValue::List(items) => Bson::Array(
                items
                    .iter()
                    .map(|item| Self::encode(view, item))
                    .collect::<MappingResult<_>>()?,
            ),
            single => Self::encode(view, single)?,
        };
        ctx.write(encoded);
        Ok(())
    }
}

/// Stores an embedded field as a nested sub-document.
///
/// Sequences are converted element by element, nested sequences included.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedEncoding;

impl EmbeddedEncoding {
    fn check(field: &FieldDescriptor, value: &FieldValue) -> MappingResult<()> {
        match value {
            FieldValue::Object(_) | FieldValue::Null => Ok(()),
            FieldValue::List(items) => items.iter().try_for_each(|item| Self::check(field, item)),
            other => Err(MappingError::type_mismatch(
                field.name(),
                field.field_type().to_string(),
                other.kind_name(),
            )),
        }
    }
}

impl SerializationStrategy for EmbeddedEncoding {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn priority(&self) -> i32 {
        priority::EMBEDDED
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.field.is_embedded()
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        Self::check(ctx.field, &ctx.value)?;
        let (raw, updated) = ctx.serializer.embedded_to_bson(&ctx.value)?;
        if let Some(raw) = raw {
            ctx.write(raw);
        }
        if let Some(updated) = updated {
            ctx.generated.push((ctx.field.name().to_string(), updated));
        }
        Ok(())
    }
}

/// Stores enum values by their symbolic name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumEncoding;

impl SerializationStrategy for EnumEncoding {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn priority(&self) -> i32 {
        priority::ENUM
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.field.field_type().enum_type().is_some()
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        if let Some(raw) = ctx.value.to_scalar_bson() {
            ctx.write(raw);
        }
        Ok(())
    }
}

/// Stores the id field, generating it when the tag asks for auto-increment.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdEncoding;

impl SerializationStrategy for IdEncoding {
    fn name(&self) -> &'static str {
        "id"
    }

    fn priority(&self) -> i32 {
        priority::ID
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.field.is_id()
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        if should_generate(ctx.field, &ctx.value) {
            ctx.write_generated()?;
            return Ok(());
        }
        if let Some(raw) = id_to_bson(&ctx.value) {
            ctx.write(stored_id(ctx.field, raw));
        }
        Ok(())
    }
}

/// Stores a generated-value field, running its generator when the value is
/// zero or the tag's update flag is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeneratedValueEncoding;

impl SerializationStrategy for GeneratedValueEncoding {
    fn name(&self) -> &'static str {
        "generated"
    }

    fn priority(&self) -> i32 {
        priority::GENERATED
    }

    fn can_handle(&self, ctx: &SerializationContext<'_>) -> bool {
        ctx.field.generated_tag().is_some()
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        if should_generate(ctx.field, &ctx.value) {
            ctx.write_generated()?;
            return Ok(());
        }
        if let Some(raw) = ctx.serializer.value_to_bson(&ctx.value)? {
            ctx.write(raw);
        }
        Ok(())
    }
}

/// Writes scalars and sequences as they are; nested objects become
/// sub-documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl SerializationStrategy for PassThrough {
    fn name(&self) -> &'static str {
        "pass-through"
    }

    fn priority(&self) -> i32 {
        priority::PASS_THROUGH
    }

    fn can_handle(&self, _ctx: &SerializationContext<'_>) -> bool {
        true
    }

    fn serialize(&self, ctx: &mut SerializationContext<'_>) -> MappingResult<()> {
        if let Some(raw) = ctx.serializer.value_to_bson(&ctx.value)? {
            ctx.write(raw);
        }
        Ok(())
    }
}

// ============================================================================
// Serializer
// ============================================================================

/// Output of a serialization pass.
#[derive(Debug, Clone)]
pub struct Serialized {
    /// The document.
    pub document: Document,
    /// Values produced by generators, by declared field name, so they can be
    /// written back into the entity.
    ///
    /// An embedded field with values generated inside it is reported with
    /// its whole updated value.
    pub generated: Vec<(String, FieldValue)>,
}

/// Converts entities into documents.
pub struct Serializer {
    strategies: Vec<Arc<dyn SerializationStrategy>>,
    registry: Arc<MetadataRegistry>,
    generators: Arc<GeneratorRegistry>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl Serializer {
    /// Creates a serializer with the built-in strategies and no store.
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self::builder().with_registry(registry).build()
    }

    /// Starts building a serializer.
    pub fn builder() -> SerializerBuilder {
        SerializerBuilder::default()
    }

    /// Converts an entity, reporting generated values.
    pub fn serialize(&self, entity: &dyn Object) -> MappingResult<Serialized> {
        let mut generated = Vec::new();
        let document = self.serialize_object(entity, &mut generated)?;
        Ok(Serialized {
            document,
            generated,
        })
    }

    /// Converts an entity into a document.
    pub fn to_document(&self, entity: &dyn Object) -> MappingResult<Document> {
        self.serialize(entity).map(|s| s.document)
    }

    /// Returns the strategies in dispatch order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Returns the metadata registry used by this chain.
    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Returns the strategy that converts the field described by `ctx`.
    pub fn select(&self, ctx: &SerializationContext<'_>) -> &dyn SerializationStrategy {
        self.strategies
            .iter()
            .find(|s| s.can_handle(ctx))
            .map(|s| s.as_ref())
            .unwrap_or(&PassThrough)
    }

    /// Returns the name of the strategy that would convert a field holding
    /// `value` on an entity of the given type.
    pub fn strategy_for(
        &self,
        metadata: &EntityMetadata,
        field: &FieldDescriptor,
        value: FieldValue,
    ) -> &'static str {
        let mut document = Document::new();
        let mut generated = Vec::new();
        let ctx = SerializationContext {
            field,
            value,
            metadata,
            document: &mut document,
            serializer: self,
            generated: &mut generated,
        };
        self.select(&ctx).name()
    }

    fn serialize_object(
        &self,
        entity: &dyn Object,
        generated: &mut Vec<(String, FieldValue)>,
    ) -> MappingResult<Document> {
        let metadata = self.registry.metadata_for(&entity.type_ref());
        let mut document = Document::new();

        for field in metadata.fields() {
            let value = entity
                .get_field(field.name())
                .ok_or_else(|| MappingError::UnknownField {
                    type_name: metadata.type_name().to_string(),
                    field: field.name().to_string(),
                })?;

            let mut ctx = SerializationContext {
                field,
                value,
                metadata: &metadata,
                document: &mut document,
                serializer: self,
                generated: &mut *generated,
            };
            let strategy = self.select(&ctx);
            tracing::trace!(
                "Serializing '{}.{}' with '{}'",
                metadata.type_name(),
                field.name(),
                strategy.name()
            );
            strategy.serialize(&mut ctx)?;
        }

        Ok(document)
    }

    /// Converts an in-memory value into its stored form.
    ///
    /// Nested objects are serialized through the full chain; `Null` yields
    /// `None` at the top and an explicit null inside sequences. Values
    /// generated inside nested objects reach the returned document only.
    pub fn value_to_bson(&self, value: &FieldValue) -> MappingResult<Option<Bson>> {
        match value {
            FieldValue::Null => Ok(None),
            FieldValue::Object(nested) => {
                let mut discarded = Vec::new();
                let document = self.serialize_object(nested.as_ref(), &mut discarded)?;
                Ok(Some(Bson::Document(document)))
            }
            FieldValue::List(items) => items
                .iter()
                .map(|item| self.value_to_bson(item).map(|raw| raw.unwrap_or(Bson::Null)))
                .collect::<MappingResult<Vec<_>>>()
                .map(|items| Some(Bson::Array(items))),
            scalar => Ok(scalar.to_scalar_bson()),
        }
    }

    /// Returns the stored identifier of a referenced entity.
    ///
    /// # Errors
    ///
    /// [`MappingError::MissingIdentifier`] if the type has no id field or the
    /// id is null.
    pub fn reference_id(&self, target: &dyn Object) -> MappingResult<Bson> {
        let metadata = self.registry.metadata_for(&target.type_ref());
        if metadata.id_field().is_none() {
            return Err(MappingError::missing_identifier(
                metadata.type_name(),
                "type declares no id field",
            ));
        }
        entity_id(&metadata, target)?
            .ok_or_else(|| MappingError::missing_identifier(metadata.type_name(), "id is null"))
    }

    /// Converts an embedded value; also returns a copy of it with the values
    /// generated inside it applied, if there were any.
    fn embedded_to_bson(&self, value: &FieldValue) -> MappingResult<(Option<Bson>, Option<FieldValue>)> {
        match value {
            FieldValue::Object(nested) => {
                let mut generated = Vec::new();
                let document = self.serialize_object(nested.as_ref(), &mut generated)?;
                if generated.is_empty() {
                    return Ok((Some(Bson::Document(document)), None));
                }
                let mut updated = nested.clone_object();
                for (name, value) in generated {
                    updated.set_field(&name, value)?;
                }
                Ok((
                    Some(Bson::Document(document)),
                    Some(FieldValue::Object(updated)),
                ))
            }
            FieldValue::List(items) => {
                let mut stored = Vec::with_capacity(items.len());
                let mut updated = Vec::with_capacity(items.len());
                let mut changed = false;
                for item in items {
                    let (raw, replacement) = self.embedded_to_bson(item)?;
                    stored.push(raw.unwrap_or(Bson::Null));
                    changed |= replacement.is_some();
                    updated.push(replacement.unwrap_or_else(|| item.clone()));
                }
                Ok((
                    Some(Bson::Array(stored)),
                    changed.then_some(FieldValue::List(updated)),
                ))
            }
            other => Ok((self.value_to_bson(other)?, None)),
        }
    }

    /// Normalizes a raw reference id against the target type's id field.
    fn target_id(&self, field: &FieldDescriptor, raw: Bson) -> Bson {
        let Some(target) = field.field_type().object_type() else {
            return raw;
        };
        match self.registry.metadata_for(target).id_field() {
            Some(id_field) => stored_id(id_field, raw),
            None => raw,
        }
    }

    fn generate(
        &self,
        owner: &EntityMetadata,
        field: &FieldDescriptor,
    ) -> MappingResult<Option<FieldValue>> {
        let Some(name) = generator_name(field) else {
            return Ok(None);
        };
        let generator = self.generators.get(name)?;
        let store = self.store.as_deref().ok_or_else(|| MappingError::Generator {
            generator: name.to_string(),
            message: "no document store attached to the serializer".to_string(),
        })?;
        generator.generate(owner, field, store)
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("strategies", &self.strategy_names())
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Serializer`].
#[derive(Default)]
pub struct SerializerBuilder {
    strategies: Vec<Arc<dyn SerializationStrategy>>,
    registry: Option<Arc<MetadataRegistry>>,
    generators: Option<Arc<GeneratorRegistry>>,
    store: Option<Arc<dyn DocumentStore>>,
    without_defaults: bool,
}

impl SerializerBuilder {
    /// Uses a specific metadata registry instead of the global one.
    pub fn with_registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses a specific generator registry.
    pub fn with_generators(mut self, generators: Arc<GeneratorRegistry>) -> Self {
        self.generators = Some(generators);
        self
    }

    /// Attaches the store handed to generators.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Adds a strategy; it is ordered by its priority among the others.
    pub fn with_strategy(mut self, strategy: Arc<dyn SerializationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Leaves out the built-in strategies except the pass-through fallback.
    pub fn without_defaults(mut self) -> Self {
        self.without_defaults = true;
        self
    }

    /// Builds the serializer, sorting its strategies by priority.
    pub fn build(self) -> Serializer {
        let mut strategies: Vec<Arc<dyn SerializationStrategy>> = Vec::new();
        if !self.without_defaults {
            strategies.push(Arc::new(SkipNull));
            strategies.push(Arc::new(ReferenceEncoding));
            strategies.push(Arc::new(EmbeddedEncoding));
            strategies.push(Arc::new(EnumEncoding));
            strategies.push(Arc::new(IdEncoding));
            strategies.push(Arc::new(GeneratedValueEncoding));
        }
        strategies.extend(self.strategies);
        strategies.push(Arc::new(PassThrough));
        // Stable: equal priorities keep registration order.
        strategies.sort_by_key(|s| s.priority());

        Serializer {
            strategies,
            registry: self.registry.unwrap_or_else(MetadataRegistry::global),
            generators: self.generators.unwrap_or_default(),
            store: self.store,
        }
    }
}
