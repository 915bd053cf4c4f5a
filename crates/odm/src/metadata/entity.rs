//! Extracted per-type metadata.

use std::collections::HashMap;
use std::fmt;

use crate::model::Object;

use super::schema::{
    CompoundIndexTag, FieldDescriptor, TriggerAction, TriggerFn, TriggerPhase, TypeRef,
};

/// Immutable mapping metadata of one entity type.
///
/// Built once per type by [`MetadataRegistry`](super::MetadataRegistry) and
/// shared behind an `Arc` for the life of the registry.
pub struct EntityMetadata {
    pub(super) type_ref: TypeRef,
    pub(super) collection_name: String,
    pub(super) fields: Vec<FieldDescriptor>,
    pub(super) id_field: Option<usize>,
    pub(super) indexed_fields: Vec<usize>,
    pub(super) reference_fields: Vec<usize>,
    pub(super) embedded_fields: Vec<usize>,
    pub(super) compound_indexes: Vec<CompoundIndexTag>,
    pub(super) triggers: HashMap<(TriggerAction, TriggerPhase), Vec<TriggerFn>>,
}

impl EntityMetadata {
    /// Handle of the described type.
    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    /// Simple type name.
    pub fn type_name(&self) -> &'static str {
        self.type_ref.name()
    }

    /// Collection the type is stored in.
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// All fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by declared name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Looks up a field by document key.
    pub fn field_by_key(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.key() == key)
    }

    /// The id field, if the type declares one.
    pub fn id_field(&self) -> Option<&FieldDescriptor> {
        self.id_field.map(|idx| &self.fields[idx])
    }

    /// Indexed fields in declaration order.
    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.indexed_fields.iter().map(|idx| &self.fields[*idx])
    }

    /// Reference fields in declaration order.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.reference_fields.iter().map(|idx| &self.fields[*idx])
    }

    /// Embedded fields in declaration order.
    pub fn embedded_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.embedded_fields.iter().map(|idx| &self.fields[*idx])
    }

    /// Returns true if the type has at least one reference field.
    pub fn has_references(&self) -> bool {
        !self.reference_fields.is_empty()
    }

    /// Type-level compound index declarations.
    pub fn compound_indexes(&self) -> &[CompoundIndexTag] {
        &self.compound_indexes
    }

    /// Trigger callables for an action and phase, in declaration order.
    pub fn triggers(&self, action: TriggerAction, phase: TriggerPhase) -> &[TriggerFn] {
        self.triggers
            .get(&(action, phase))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Invokes every trigger registered for an action and phase.
    pub fn fire(&self, action: TriggerAction, phase: TriggerPhase, target: &mut dyn Object) {
        for callback in self.triggers(action, phase) {
            callback(target);
        }
    }
}

impl fmt::Debug for EntityMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("type_name", &self.type_name())
            .field("collection_name", &self.collection_name)
            .field("id_field", &self.id_field().map(FieldDescriptor::name))
            .field("fields", &self.fields.len())
            .field("indexed_fields", &self.indexed_fields.len())
            .field("reference_fields", &self.reference_fields.len())
            .field("embedded_fields", &self.embedded_fields.len())
            .field("triggers", &self.triggers.len())
            .finish()
    }
}
