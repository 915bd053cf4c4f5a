//! Deserialization chain: document to entity.
//!
//! Built-in strategies in dispatch order:
//!
//! | Priority | Strategy | Handles |
//! |----------|----------|---------|
//! | 0 | [`NullValue`] | stored nulls; fatal for non-nullable primitive-like fields |
//! | 5 | [`EmbeddedDecoding`] | embedded fields holding a sub-document |
//! | 10 | [`IdDecoding`] | the id field, decoded into its declared scalar type |
//! | 15 | [`ReferenceDecoding`] | reference fields, kept as raw identifiers |
//! | 20 | [`SequenceDecoding`] | arrays, element by element through the full chain |
//! | 25 | [`NestedObjectDecoding`] | other sub-documents into declared object types |
//! | 30 | [`EnumDecoding`] | exact, case-sensitive variant names |
//! | 35 | [`PrimitiveDecoding`] | numeric, boolean, and char coercion |
//! | 40 | [`DefaultDecoding`] | everything else |
//!
//! Fields missing from the document keep the value the target was created
//! with. References are not resolved here; see
//! [`ReferenceResolver`](crate::reference::ReferenceResolver).

use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document};

use crate::error::{MappingError, MappingResult};
use crate::metadata::{EntityMetadata, FieldDescriptor, FieldType, MetadataRegistry, TypeRef};
use crate::model::{Entity, FieldValue, Object, downcast_box};

use super::coerce::{bson_to_dynamic, bson_to_scalar, text_of};

/// Priorities of the built-in deserialization strategies.
pub mod priority {
    /// [`NullValue`](super::NullValue)
    pub const NULL: i32 = 0;
    /// [`EmbeddedDecoding`](super::EmbeddedDecoding)
    pub const EMBEDDED: i32 = 5;
    /// [`IdDecoding`](super::IdDecoding)
    pub const ID: i32 = 10;
    /// [`ReferenceDecoding`](super::ReferenceDecoding)
    pub const REFERENCE: i32 = 15;
    /// [`SequenceDecoding`](super::SequenceDecoding)
    pub const SEQUENCE: i32 = 20;
    /// [`NestedObjectDecoding`](super::NestedObjectDecoding)
    pub const NESTED_OBJECT: i32 = 25;
    /// [`EnumDecoding`](super::EnumDecoding)
    pub const ENUM: i32 = 30;
    /// [`PrimitiveDecoding`](super::PrimitiveDecoding)
    pub const PRIMITIVE: i32 = 35;
    /// [`DefaultDecoding`](super::DefaultDecoding)
    pub const DEFAULT: i32 = 40;
}

/// State of one field conversion.
#[derive(Clone, Copy)]
pub struct DeserializationContext<'a> {
    field: &'a FieldDescriptor,
    value: &'a Bson,
    document: &'a Document,
    metadata: &'a EntityMetadata,
    deserializer: &'a Deserializer,
}

impl<'a> DeserializationContext<'a> {
    /// Target field.
    pub fn field(&self) -> &'a FieldDescriptor {
        self.field
    }

    /// Stored value.
    pub fn value(&self) -> &'a Bson {
        self.value
    }

    /// Document owning the value.
    pub fn document(&self) -> &'a Document {
        self.document
    }

    /// Metadata of the owning type.
    pub fn metadata(&self) -> &'a EntityMetadata {
        self.metadata
    }

    /// The chain running this conversion, for recursive calls.
    pub fn deserializer(&self) -> &'a Deserializer {
        self.deserializer
    }

    fn for_element<'b>(&self, field: &'b FieldDescriptor, value: &'b Bson) -> DeserializationContext<'b>
    where
        'a: 'b,
    {
        DeserializationContext {
            field,
            value,
            document: self.document,
            metadata: self.metadata,
            deserializer: self.deserializer,
        }
    }

    fn mismatch(&self) -> MappingError {
        MappingError::type_mismatch(
            self.field.name(),
            self.field.field_type().to_string(),
            format!("{:?}", self.value.element_type()),
        )
    }
}

/// One way of converting a stored value into a field value.
pub trait DeserializationStrategy: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Dispatch priority; lower runs first.
    fn priority(&self) -> i32;

    /// Returns true if this strategy converts the value.
    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool;

    /// Produces the field value.
    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue>;
}

fn is_null(value: &Bson) -> bool {
    matches!(value, Bson::Null | Bson::Undefined)
}

fn is_scalar_type(field_type: &FieldType) -> bool {
    field_type.is_primitive()
        || matches!(
            field_type,
            FieldType::String | FieldType::DateTime | FieldType::ObjectId
        )
}

/// Decodes a stored identifier into the declared type of an id field.
pub fn decode_id(field: &FieldDescriptor, raw: &Bson) -> MappingResult<FieldValue> {
    let target = field.field_type();
    if is_scalar_type(target) {
        bson_to_scalar(raw, target, field.name())
    } else {
        Ok(FieldValue::from_id(raw.clone()))
    }
}

// ============================================================================
// Built-in strategies
// ============================================================================

/// Assigns stored nulls, rejecting them for non-nullable primitive-like
/// fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullValue;

impl DeserializationStrategy for NullValue {
    fn name(&self) -> &'static str {
        "null"
    }

    fn priority(&self) -> i32 {
        priority::NULL
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        is_null(ctx.value)
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        if ctx.field.rejects_null() {
            return Err(MappingError::NullToPrimitive {
                field: ctx.field.name().to_string(),
                field_type: ctx.field.field_type().to_string(),
            });
        }
        Ok(FieldValue::Null)
    }
}

/// Builds a new instance of an embedded field's declared type from its
/// sub-document.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedDecoding;

impl DeserializationStrategy for EmbeddedDecoding {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn priority(&self) -> i32 {
        priority::EMBEDDED
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        ctx.field.is_embedded() && matches!(ctx.value, Bson::Document(_))
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        decode_object(ctx)
    }
}

fn decode_object(ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
    let (Some(type_ref), Bson::Document(nested)) = (ctx.field.field_type().object_type(), ctx.value)
    else {
        return Err(ctx.mismatch());
    };
    ctx.deserializer
        .deserialize(type_ref, nested)
        .map(FieldValue::Object)
}

/// Decodes the store-native id representation into the declared type.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdDecoding;

impl DeserializationStrategy for IdDecoding {
    fn name(&self) -> &'static str {
        "id"
    }

    fn priority(&self) -> i32 {
        priority::ID
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        ctx.field.is_id()
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        decode_id(ctx.field, ctx.value)
    }
}

/// Keeps the raw identifier of a reference; a `{ "$id": .. }` document is
/// unwrapped to its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceDecoding;

impl DeserializationStrategy for ReferenceDecoding {
    fn name(&self) -> &'static str {
        "reference"
    }

    fn priority(&self) -> i32 {
        priority::REFERENCE
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        ctx.field.is_reference() && !matches!(ctx.value, Bson::Array(_))
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        let raw = match ctx.value {
            Bson::Document(link) => link.get("$id").unwrap_or(ctx.value),
            other => other,
        };
        Ok(FieldValue::from_id(raw.clone()))
    }
}

/// Converts arrays element by element.
///
/// Each element is dispatched through the full chain against the field's
/// element type. When the chain is configured to skip invalid elements, a
/// sub-document element that fails to convert is dropped with a warning
/// instead of failing the field.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceDecoding;

impl DeserializationStrategy for SequenceDecoding {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn priority(&self) -> i32 {
        priority::SEQUENCE
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        matches!(ctx.value, Bson::Array(_))
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        let (Some(element), Bson::Array(items)) = (ctx.field.element_descriptor(), ctx.value) else {
            return Err(ctx.mismatch());
        };

        let mut values = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let element_ctx = ctx.for_element(&element, item);
            match ctx.deserializer.dispatch(&element_ctx) {
                Ok(value) => values.push(value),
                Err(err)
                    if ctx.deserializer.skip_invalid_elements
                        && matches!(item, Bson::Document(_)) =>
                {
                    tracing::warn!(
                        "Skipping element {} of '{}.{}': {}",
                        index,
                        ctx.metadata.type_name(),
                        ctx.field.name(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(FieldValue::List(values))
    }
}

/// Populates a declared object type from a sub-document, field by field.
#[derive(Debug, Clone, Copy, Default)]
pub struct NestedObjectDecoding;

impl DeserializationStrategy for NestedObjectDecoding {
    fn name(&self) -> &'static str {
        "nested-object"
    }

    fn priority(&self) -> i32 {
        priority::NESTED_OBJECT
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        matches!(ctx.field.field_type(), FieldType::Object(_))
            && matches!(ctx.value, Bson::Document(_))
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        decode_object(ctx)
    }
}

/// Looks up enum variants by exact name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnumDecoding;

impl DeserializationStrategy for EnumDecoding {
    fn name(&self) -> &'static str {
        "enum"
    }

    fn priority(&self) -> i32 {
        priority::ENUM
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        matches!(ctx.field.field_type(), FieldType::Enum(_))
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        let (FieldType::Enum(enum_type), Bson::String(name)) = (ctx.field.field_type(), ctx.value)
        else {
            return Err(ctx.mismatch());
        };
        enum_type
            .lookup(name)
            .map(|variant| FieldValue::Enum(variant.to_string()))
            .ok_or_else(|| MappingError::UnknownEnumValue {
                enum_name: enum_type.name.to_string(),
                value: name.clone(),
            })
    }
}

/// Coerces stored numbers, booleans, and strings into primitive fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimitiveDecoding;

impl DeserializationStrategy for PrimitiveDecoding {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn priority(&self) -> i32 {
        priority::PRIMITIVE
    }

    fn can_handle(&self, ctx: &DeserializationContext<'_>) -> bool {
        ctx.field.field_type().is_primitive()
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        bson_to_scalar(ctx.value, ctx.field.field_type(), ctx.field.name())
    }
}

/// Fallback: converts scalars into the declared type, reads anything into a
/// string through its textual form, and hands other values to the field's
/// own conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoding;

impl DeserializationStrategy for DefaultDecoding {
    fn name(&self) -> &'static str {
        "default"
    }

    fn priority(&self) -> i32 {
        priority::DEFAULT
    }

    fn can_handle(&self, _ctx: &DeserializationContext<'_>) -> bool {
        true
    }

    fn deserialize(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        match ctx.field.field_type() {
            FieldType::String => Ok(FieldValue::String(
                text_of(ctx.value).unwrap_or_else(|| ctx.value.to_string()),
            )),
            target if is_scalar_type(target) => {
                bson_to_scalar(ctx.value, target, ctx.field.name())
            }
            _ => Ok(bson_to_dynamic(ctx.value)),
        }
    }
}

// ============================================================================
// Deserializer
// ============================================================================

/// Converts documents into entities.
pub struct Deserializer {
    strategies: Vec<Arc<dyn DeserializationStrategy>>,
    registry: Arc<MetadataRegistry>,
    skip_invalid_elements: bool,
}

impl Deserializer {
    /// Creates a deserializer with the built-in strategies.
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        Self::builder().with_registry(registry).build()
    }

    /// Starts building a deserializer.
    pub fn builder() -> DeserializerBuilder {
        DeserializerBuilder::default()
    }

    /// Returns the strategies in dispatch order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Returns true if failing sub-document elements of arrays are skipped.
    pub fn skips_invalid_elements(&self) -> bool {
        self.skip_invalid_elements
    }

    /// Returns the metadata registry used by this chain.
    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Converts a document into a new `T`.
    pub fn from_document<T: Entity>(&self, document: &Document) -> MappingResult<T> {
        let object = self.deserialize(&TypeRef::of::<T>(), document)?;
        downcast_box::<T>(object).map_err(|other| {
            MappingError::type_mismatch("<root>", T::TYPE_NAME, other.type_ref().name())
        })
    }

    /// Converts a document into a new instance of the type behind `type_ref`.
    ///
    /// # Errors
    ///
    /// [`MappingError::MissingConstructor`] if the type cannot be instantiated
    /// without arguments, or any error of [`populate`](Self::populate).
    pub fn deserialize(&self, type_ref: &TypeRef, document: &Document) -> MappingResult<Box<dyn Object>> {
        let mut target = type_ref
            .instantiate()
            .ok_or_else(|| MappingError::MissingConstructor {
                type_name: type_ref.name().to_string(),
            })?;
        self.populate(target.as_mut(), document)?;
        Ok(target)
    }

    /// Writes every field present in `document` into `target`.
    pub fn populate(&self, target: &mut dyn Object, document: &Document) -> MappingResult<()> {
        let metadata = self.registry.metadata_for(&target.type_ref());
        for field in metadata.fields() {
            let Some(value) = document.get(field.key()) else {
                tracing::trace!(
                    "'{}.{}' absent from document; keeping default",
                    metadata.type_name(),
                    field.name()
                );
                continue;
            };
            let ctx = DeserializationContext {
                field,
                value,
                document,
                metadata: &metadata,
                deserializer: self,
            };
            let converted = self.dispatch(&ctx)?;
            target.set_field(field.name(), converted)?;
        }
        Ok(())
    }

    /// Returns the strategy that converts the value described by `ctx`.
    pub fn select(&self, ctx: &DeserializationContext<'_>) -> &dyn DeserializationStrategy {
        self.strategies
            .iter()
            .find(|s| s.can_handle(ctx))
            .map(|s| s.as_ref())
            .unwrap_or(&DefaultDecoding)
    }

    /// Returns the name of the strategy that would convert `value` stored
    /// for `field`.
    pub fn strategy_for(
        &self,
        metadata: &EntityMetadata,
        field: &FieldDescriptor,
        value: &Bson,
    ) -> &'static str {
        let document = Document::new();
        let ctx = DeserializationContext {
            field,
            value,
            document: &document,
            metadata,
            deserializer: self,
        };
        self.select(&ctx).name()
    }

    fn dispatch(&self, ctx: &DeserializationContext<'_>) -> MappingResult<FieldValue> {
        let strategy = self.select(ctx);
        tracing::trace!(
            "Deserializing '{}.{}' with '{}'",
            ctx.metadata.type_name(),
            ctx.field.name(),
            strategy.name()
        );
        strategy.deserialize(ctx)
    }
}

impl fmt::Debug for Deserializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deserializer")
            .field("strategies", &self.strategy_names())
            .field("skip_invalid_elements", &self.skip_invalid_elements)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Deserializer`].
pub struct DeserializerBuilder {
    strategies: Vec<Arc<dyn DeserializationStrategy>>,
    registry: Option<Arc<MetadataRegistry>>,
    skip_invalid_elements: bool,
    without_defaults: bool,
}

impl Default for DeserializerBuilder {
    fn default() -> Self {
        Self {
            strategies: Vec::new(),
            registry: None,
            skip_invalid_elements: true,
            without_defaults: false,
        }
    }
}

impl DeserializerBuilder {
    /// Uses a specific metadata registry instead of the global one.
    pub fn with_registry(mut self, registry: Arc<MetadataRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Adds a strategy; it is ordered by its priority among the others.
    pub fn with_strategy(mut self, strategy: Arc<dyn DeserializationStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    /// Sets whether failing sub-document array elements are skipped
    /// (default) or fail the whole field.
    pub fn skip_invalid_elements(mut self, skip: bool) -> Self {
        self.skip_invalid_elements = skip;
        self
    }

    /// Leaves out the built-in strategies except the default fallback.
    pub fn without_defaults(mut self) -> Self {
        self.without_defaults = true;
        self
    }

    /// Builds the deserializer, sorting its strategies by priority.
    pub fn build(self) -> Deserializer {
        let mut strategies: Vec<Arc<dyn DeserializationStrategy>> = Vec::new();
        if !self.without_defaults {
            strategies.push(Arc::new(NullValue));
            strategies.push(Arc::new(EmbeddedDecoding));
            strategies.push(Arc::new(IdDecoding));
            strategies.push(Arc::new(ReferenceDecoding));
            strategies.push(Arc::new(SequenceDecoding));
            strategies.push(Arc::new(NestedObjectDecoding));
            strategies.push(Arc::new(EnumDecoding));
            strategies.push(Arc::new(PrimitiveDecoding));
        }
        strategies.extend(self.strategies);
        strategies.push(Arc::new(DefaultDecoding));
        strategies.sort_by_key(|s| s.priority());

        Deserializer {
            strategies,
            registry: self.registry.unwrap_or_else(MetadataRegistry::global),
            skip_invalid_elements: self.skip_invalid_elements,
        }
    }
}
