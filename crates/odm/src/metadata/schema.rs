//! Declared entity schemas.
//!
//! An [`EntitySchema`] is the raw declaration of a mapped type: its fields,
//! their tags, type-level compound indexes, and lifecycle triggers. Schemas
//! are produced by `#[derive(Entity)]` (or written by hand with the builder
//! methods below) and turned into [`EntityMetadata`](super::EntityMetadata)
//! by the extractor.

use std::any::TypeId;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Entity, Object};

// ============================================================================
// Type handles
// ============================================================================

/// Runtime handle to a mapped type.
///
/// Holding a `TypeRef` does not evaluate the type's schema, which keeps
/// self-referencing and mutually referencing types cheap to declare.
#[derive(Clone, Copy)]
pub struct TypeRef {
    type_id: TypeId,
    name: &'static str,
    schema: fn() -> EntitySchema,
    factory: Option<fn() -> Box<dyn Object>>,
}

impl TypeRef {
    /// Returns the handle of an entity type.
    pub fn of<T: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: T::TYPE_NAME,
            schema: T::schema,
            factory: T::factory(),
        }
    }

    /// Returns the type identity used as cache key.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the simple type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Evaluates the declared schema.
    pub fn schema(&self) -> EntitySchema {
        (self.schema)()
    }

    /// Returns true if the type can be instantiated without arguments.
    pub fn has_factory(&self) -> bool {
        self.factory.is_some()
    }

    /// Creates a new default instance, if the type has a factory.
    pub fn instantiate(&self) -> Option<Box<dyn Object>> {
        self.factory.map(|create| create())
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeRef {}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRef")
            .field("name", &self.name)
            .field("has_factory", &self.factory.is_some())
            .finish()
    }
}

/// Declared variants of an enumerated type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumType {
    /// Enum type name.
    pub name: &'static str,
    /// Symbolic variant names, case-sensitive.
    pub variants: &'static [&'static str],
}

impl EnumType {
    /// Creates an enum type description.
    pub const fn new(name: &'static str, variants: &'static [&'static str]) -> Self {
        Self { name, variants }
    }

    /// Looks up a variant by its exact name.
    pub fn lookup(&self, value: &str) -> Option<&'static str> {
        self.variants.iter().copied().find(|v| *v == value)
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// `bool`
    Bool,
    /// `i8`
    Byte,
    /// `i16`
    Short,
    /// `i32`
    Int,
    /// `i64`
    Long,
    /// `f32`
    Float,
    /// `f64`
    Double,
    /// `char`
    Char,
    /// `String`
    String,
    /// `chrono::DateTime<Utc>`
    DateTime,
    /// `bson::oid::ObjectId`
    ObjectId,
    /// Enumerated type stored by variant name.
    Enum(EnumType),
    /// Nested mapped type.
    Object(TypeRef),
    /// Sequence with its element type.
    List(Box<FieldType>),
}

impl FieldType {
    /// Returns true for bool, char, and the numeric types.
    pub fn is_primitive(&self) -> bool {
        matches!(self, FieldType::Bool | FieldType::Char) || self.is_numeric()
    }

    /// Returns true for the integral and floating-point types.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Byte
                | FieldType::Short
                | FieldType::Int
                | FieldType::Long
                | FieldType::Float
                | FieldType::Double
        )
    }

    /// Returns true if a stored null can be assigned to a non-optional field
    /// of this type (it becomes the type's empty value).
    pub fn accepts_null(&self) -> bool {
        matches!(self, FieldType::String | FieldType::List(_))
    }

    /// Returns the element type of a sequence.
    pub fn element_type(&self) -> Option<&FieldType> {
        match self {
            FieldType::List(elem) => Some(elem),
            _ => None,
        }
    }

    /// Returns the innermost non-sequence type.
    pub fn leaf_type(&self) -> &FieldType {
        match self {
            FieldType::List(elem) => elem.leaf_type(),
            other => other,
        }
    }

    /// Returns the nested type handle, looking through sequences.
    pub fn object_type(&self) -> Option<&TypeRef> {
        match self.leaf_type() {
            FieldType::Object(type_ref) => Some(type_ref),
            _ => None,
        }
    }

    /// Returns the enum description, looking through sequences.
    pub fn enum_type(&self) -> Option<&EnumType> {
        match self.leaf_type() {
            FieldType::Enum(enum_type) => Some(enum_type),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Bool => write!(f, "bool"),
            FieldType::Byte => write!(f, "byte"),
            FieldType::Short => write!(f, "short"),
            FieldType::Int => write!(f, "int"),
            FieldType::Long => write!(f, "long"),
            FieldType::Float => write!(f, "float"),
            FieldType::Double => write!(f, "double"),
            FieldType::Char => write!(f, "char"),
            FieldType::String => write!(f, "string"),
            FieldType::DateTime => write!(f, "datetime"),
            FieldType::ObjectId => write!(f, "objectId"),
            FieldType::Enum(e) => write!(f, "enum {}", e.name),
            FieldType::Object(t) => write!(f, "{}", t.name()),
            FieldType::List(elem) => write!(f, "list<{}>", elem),
        }
    }
}

// ============================================================================
// Field tags
// ============================================================================

/// Tag marking the id field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdTag {
    /// Generate the id on every save.
    pub auto_increment: bool,
    /// Generator name; defaults to `sequence`.
    pub generator: Option<String>,
}

/// Tag marking a field whose value is produced by a generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedTag {
    /// Generator name.
    pub generator: String,
    /// Regenerate on every save instead of only when the value is zero.
    pub update: bool,
}

impl GeneratedTag {
    /// Creates a generated-value tag.
    pub fn new(generator: impl Into<String>) -> Self {
        Self {
            generator: generator.into(),
            update: false,
        }
    }

    /// Sets the update flag.
    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }
}

/// Key kind of one index entry: ordering direction or special index type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Ascending order (`1`).
    #[default]
    Ascending,
    /// Descending order (`-1`).
    Descending,
    /// Planar geospatial index (`2d`).
    Geo2d,
    /// Spherical geospatial index (`2dsphere`).
    Geo2dSphere,
    /// Full-text index (`text`).
    Text,
    /// Hashed index (`hashed`).
    Hashed,
}

impl IndexKind {
    /// Parses a direction-or-type suffix such as `1`, `-1`, or `2dsphere`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" | "asc" => Some(IndexKind::Ascending),
            "-1" | "desc" => Some(IndexKind::Descending),
            "2d" => Some(IndexKind::Geo2d),
            "2dsphere" => Some(IndexKind::Geo2dSphere),
            "text" => Some(IndexKind::Text),
            "hashed" => Some(IndexKind::Hashed),
            _ => None,
        }
    }

    /// Returns the suffix form used in index names.
    pub fn suffix(&self) -> &'static str {
        match self {
            IndexKind::Ascending => "1",
            IndexKind::Descending => "-1",
            IndexKind::Geo2d => "2d",
            IndexKind::Geo2dSphere => "2dsphere",
            IndexKind::Text => "text",
            IndexKind::Hashed => "hashed",
        }
    }

    /// Returns the value used in an index key document.
    pub fn to_bson(&self) -> bson::Bson {
        match self {
            IndexKind::Ascending => bson::Bson::Int32(1),
            IndexKind::Descending => bson::Bson::Int32(-1),
            other => bson::Bson::String(other.suffix().to_string()),
        }
    }
}

/// Options shared by field and compound index declarations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexOptions {
    /// Explicit index name.
    pub name: Option<String>,
    /// Reject duplicate keys.
    pub unique: bool,
    /// Skip documents missing the key.
    pub sparse: bool,
    /// Build in the background.
    pub background: bool,
    /// Drop duplicates while building a unique index.
    pub drop_dups: bool,
}

impl IndexOptions {
    /// Merges the flags of another option set into this one.
    pub fn merge(&mut self, other: &IndexOptions) {
        self.unique |= other.unique;
        self.sparse |= other.sparse;
        self.background |= other.background;
        self.drop_dups |= other.drop_dups;
        if self.name.is_none() {
            self.name = other.name.clone();
        }
    }
}

/// Tag marking an indexed field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTag {
    /// Direction or special index type.
    pub kind: IndexKind,
    /// Index options; fields sharing `options.name` form one compound index.
    pub options: IndexOptions,
}

impl IndexTag {
    /// Creates an ascending single-field index tag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key kind.
    pub fn with_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the explicit index name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Marks the index unique.
    pub fn unique(mut self) -> Self {
        self.options.unique = true;
        self
    }

    /// Marks the index sparse.
    pub fn sparse(mut self) -> Self {
        self.options.sparse = true;
        self
    }
}

/// Type-level compound index declaration.
///
/// Each key token has the form `<field>_<direction-or-type>`; see
/// [`parse_index_key`](crate::index::parse_index_key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompoundIndexTag {
    /// Key tokens in index order.
    pub keys: Vec<String>,
    /// Index options.
    pub options: IndexOptions,
}

impl CompoundIndexTag {
    /// Creates a compound index declaration from key tokens.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
            options: IndexOptions::default(),
        }
    }

    /// Sets the index options.
    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }
}

/// All tags present on one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTags {
    /// Id tag.
    pub id: Option<IdTag>,
    /// Generated-value tag.
    pub generated: Option<GeneratedTag>,
    /// Field links to another stored entity.
    pub reference: bool,
    /// Field is stored as a nested sub-document.
    pub embedded: bool,
    /// Index tag.
    pub index: Option<IndexTag>,
}

// ============================================================================
// Field descriptors
// ============================================================================

/// Description of one entity field.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: String,
    key: String,
    explicit_key: bool,
    field_type: FieldType,
    nullable: bool,
    tags: FieldTags,
}

impl FieldDescriptor {
    /// Creates an untagged field descriptor.
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        let name = name.into();
        Self {
            key: name.clone(),
            name,
            explicit_key: false,
            field_type,
            nullable,
            tags: FieldTags::default(),
        }
    }

    /// Creates a descriptor from the [`Mapped`](crate::model::Mapped) impl of `T`.
    pub fn of<T: crate::model::Mapped>(name: impl Into<String>) -> Self {
        Self::new(name, T::field_type(), T::nullable())
    }

    /// Sets an explicit document key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self.explicit_key = true;
        self
    }

    /// Tags the field as the id.
    pub fn with_id(mut self, tag: IdTag) -> Self {
        self.tags.id = Some(tag);
        self
    }

    /// Tags the field as generated.
    pub fn with_generated(mut self, tag: GeneratedTag) -> Self {
        self.tags.generated = Some(tag);
        self
    }

    /// Tags the field as a reference.
    pub fn with_reference(mut self) -> Self {
        self.tags.reference = true;
        self
    }

    /// Tags the field as embedded.
    pub fn with_embedded(mut self) -> Self {
        self.tags.embedded = true;
        self
    }

    /// Tags the field as indexed.
    pub fn with_index(mut self, tag: IndexTag) -> Self {
        self.tags.index = Some(tag);
        self
    }

    /// Declared field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Document key the field is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns true if the key was set explicitly.
    pub fn has_explicit_key(&self) -> bool {
        self.explicit_key
    }

    /// Declared type.
    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    /// Element type for sequence fields.
    pub fn element_type(&self) -> Option<&FieldType> {
        self.field_type.element_type()
    }

    /// Returns true if the field is optional.
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Returns true if a stored null cannot be assigned to this field.
    pub fn rejects_null(&self) -> bool {
        !self.nullable && !self.field_type.accepts_null()
    }

    /// All tags.
    pub fn tags(&self) -> &FieldTags {
        &self.tags
    }

    /// Id tag, if any.
    pub fn id_tag(&self) -> Option<&IdTag> {
        self.tags.id.as_ref()
    }

    /// Generated-value tag, if any.
    pub fn generated_tag(&self) -> Option<&GeneratedTag> {
        self.tags.generated.as_ref()
    }

    /// Index tag, if any.
    pub fn index_tag(&self) -> Option<&IndexTag> {
        self.tags.index.as_ref()
    }

    /// Returns true for the id field.
    pub fn is_id(&self) -> bool {
        self.tags.id.is_some()
    }

    /// Returns true for reference fields.
    pub fn is_reference(&self) -> bool {
        self.tags.reference
    }

    /// Returns true for embedded fields.
    pub fn is_embedded(&self) -> bool {
        self.tags.embedded
    }

    /// Returns true if a generator may populate the field during save.
    pub fn is_generated(&self) -> bool {
        self.tags.generated.is_some()
            || self.tags.id.as_ref().is_some_and(|id| id.auto_increment)
    }

    /// Descriptor of one element of a sequence field.
    ///
    /// The element keeps the name, key, and reference/embedded tags of the
    /// sequence; id, generator, and index tags stay on the sequence itself.
    pub fn element_descriptor(&self) -> Option<FieldDescriptor> {
        let element_type = self.element_type()?.clone();
        Some(FieldDescriptor {
            name: self.name.clone(),
            key: self.key.clone(),
            explicit_key: self.explicit_key,
            field_type: element_type,
            nullable: true,
            tags: FieldTags {
                reference: self.tags.reference,
                embedded: self.tags.embedded,
                ..FieldTags::default()
            },
        })
    }

    pub(crate) fn set_key(&mut self, key: impl Into<String>) {
        self.key = key.into();
    }

    pub(crate) fn tags_mut(&mut self) -> &mut FieldTags {
        &mut self.tags
    }
}

// ============================================================================
// Triggers
// ============================================================================

/// Persistence action a trigger is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerAction {
    /// Save of an entity not yet stored.
    Insert,
    /// Save of an entity whose id is already stored.
    Update,
    /// Removal.
    Delete,
    /// Load from the store.
    Load,
}

/// Phase of a trigger relative to its action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerPhase {
    /// Before the store is touched.
    Pre,
    /// After the store call succeeded.
    Post,
}

/// Callable invoked for a lifecycle trigger.
pub type TriggerFn = fn(&mut dyn Object);

/// One trigger declaration.
#[derive(Clone, Copy)]
pub struct TriggerDecl {
    /// Action.
    pub action: TriggerAction,
    /// Phase.
    pub phase: TriggerPhase,
    /// Callable.
    pub callback: TriggerFn,
}

impl fmt::Debug for TriggerDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDecl")
            .field("action", &self.action)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Entity schema
// ============================================================================

/// Raw declaration of a mapped type.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    type_name: &'static str,
    collection: Option<String>,
    fields: Vec<FieldDescriptor>,
    compound_indexes: Vec<CompoundIndexTag>,
    triggers: Vec<TriggerDecl>,
}

impl EntitySchema {
    /// Creates an empty schema for a type.
    pub fn new(type_name: &'static str) -> Self {
        Self {
            type_name,
            collection: None,
            fields: Vec::new(),
            compound_indexes: Vec::new(),
            triggers: Vec::new(),
        }
    }

    /// Sets an explicit collection name.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Appends a field.
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Appends a type-level compound index.
    pub fn with_compound_index(mut self, index: CompoundIndexTag) -> Self {
        self.compound_indexes.push(index);
        self
    }

    /// Appends a lifecycle trigger.
    pub fn with_trigger(
        mut self,
        action: TriggerAction,
        phase: TriggerPhase,
        callback: TriggerFn,
    ) -> Self {
        self.triggers.push(TriggerDecl {
            action,
            phase,
            callback,
        });
        self
    }

    /// Type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Explicit collection name, if declared.
    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Declared fields in order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Declared compound indexes.
    pub fn compound_indexes(&self) -> &[CompoundIndexTag] {
        &self.compound_indexes
    }

    /// Declared triggers in order.
    pub fn triggers(&self) -> &[TriggerDecl] {
        &self.triggers
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        &'static str,
        Option<String>,
        Vec<FieldDescriptor>,
        Vec<CompoundIndexTag>,
        Vec<TriggerDecl>,
    ) {
        (
            self.type_name,
            self.collection,
            self.fields,
            self.compound_indexes,
            self.triggers,
        )
    }
}
