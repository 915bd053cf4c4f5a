//! Metadata extraction and the per-type metadata cache.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::model::Entity;

use super::entity::EntityMetadata;
use super::schema::{FieldType, TypeRef};

/// Document key of the id field unless the schema renames it.
pub const ID_KEY: &str = "_id";

static GLOBAL: Lazy<Arc<MetadataRegistry>> = Lazy::new(|| Arc::new(MetadataRegistry::new()));

/// Cache of extracted [`EntityMetadata`], keyed by type identity.
///
/// Each type is extracted at most once per registry, even under concurrent
/// first access: the map only hands out a per-type cell and the cell runs the
/// extraction exactly once.
#[derive(Default)]
pub struct MetadataRegistry {
    cells: RwLock<HashMap<TypeId, Arc<OnceCell<Arc<EntityMetadata>>>>>,
}

impl MetadataRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry.
    pub fn global() -> Arc<MetadataRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the metadata of an entity type.
    pub fn get<T: Entity>(&self) -> Arc<EntityMetadata> {
        self.metadata_for(&TypeRef::of::<T>())
    }

    /// Returns the metadata of the type behind a handle.
    pub fn metadata_for(&self, type_ref: &TypeRef) -> Arc<EntityMetadata> {
        let cell = self.cell_for(type_ref.type_id());
        Arc::clone(cell.get_or_init(|| Arc::new(extract(type_ref))))
    }

    /// Returns true if the type has already been extracted.
    pub fn contains<T: Entity>(&self) -> bool {
        self.cells
            .read()
            .get(&TypeId::of::<T>())
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Returns the number of extracted types.
    pub fn len(&self) -> usize {
        self.cells
            .read()
            .values()
            .filter(|cell| cell.get().is_some())
            .count()
    }

    /// Returns true if nothing has been extracted yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cells.write().clear();
    }

    fn cell_for(&self, type_id: TypeId) -> Arc<OnceCell<Arc<EntityMetadata>>> {
        if let Some(cell) = self.cells.read().get(&type_id) {
            return Arc::clone(cell);
        }
        let mut cells = self.cells.write();
        Arc::clone(cells.entry(type_id).or_default())
    }
}

impl std::fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("len", &self.len())
            .finish()
    }
}

/// Extracts the metadata of a type from its declared schema.
///
/// Never fails: inconsistent tags are reported with a warning and ignored.
pub fn extract(type_ref: &TypeRef) -> EntityMetadata {
    let schema = type_ref.schema();
    let (type_name, collection, mut fields, compound_indexes, trigger_decls) =
        schema.into_parts();

    let collection_name = collection.unwrap_or_else(|| type_name.to_string());

    let mut id_field = None;
    let mut indexed_fields = Vec::new();
    let mut reference_fields = Vec::new();
    let mut embedded_fields = Vec::new();

    for (idx, field) in fields.iter_mut().enumerate() {
        if field.is_id() {
            match id_field {
                None => {
                    id_field = Some(idx);
                    if !field.has_explicit_key() {
                        field.set_key(ID_KEY);
                    }
                }
                Some(first) => {
                    tracing::warn!(
                        "Entity '{}' declares more than one id field; using field #{} and ignoring '{}'",
                        type_name,
                        first,
                        field.name()
                    );
                    field.tags_mut().id = None;
                }
            }
        }

        if field.is_reference() {
            if field.field_type().object_type().is_none() {
                tracing::warn!(
                    "Reference tag on '{}.{}' ignored: declared type {} is not an entity",
                    type_name,
                    field.name(),
                    field.field_type()
                );
                field.tags_mut().reference = false;
            } else if field.is_embedded() {
                tracing::warn!(
                    "Field '{}.{}' is tagged both reference and embedded; treating it as a reference",
                    type_name,
                    field.name()
                );
                field.tags_mut().embedded = false;
            }
        }

        if field.is_embedded() && field.field_type().object_type().is_none() {
            tracing::warn!(
                "Embedded tag on '{}.{}' ignored: declared type {} is not an entity",
                type_name,
                field.name(),
                field.field_type()
            );
            field.tags_mut().embedded = false;
        }

        if let Some(tag) = field.generated_tag() {
            if !is_generatable(field.field_type()) {
                tracing::warn!(
                    "Generated tag '{}' on '{}.{}' has an unusual declared type {}",
                    tag.generator,
                    type_name,
                    field.name(),
                    field.field_type()
                );
            }
        }

        if field.is_reference() {
            reference_fields.push(idx);
        }
        if field.is_embedded() {
            embedded_fields.push(idx);
        }
        if field.index_tag().is_some() {
            indexed_fields.push(idx);
        }
    }

    let mut triggers: HashMap<_, Vec<_>> = HashMap::new();
    for decl in trigger_decls {
        triggers
            .entry((decl.action, decl.phase))
            .or_default()
            .push(decl.callback);
    }

    tracing::debug!(
        "Extracted metadata for '{}' (collection '{}', {} fields)",
        type_name,
        collection_name,
        fields.len()
    );

    EntityMetadata {
        type_ref: *type_ref,
        collection_name,
        fields,
        id_field,
        indexed_fields,
        reference_fields,
        embedded_fields,
        compound_indexes,
        triggers,
    }
}

fn is_generatable(field_type: &FieldType) -> bool {
    field_type.is_numeric()
        || matches!(
            field_type,
            FieldType::String | FieldType::ObjectId | FieldType::DateTime
        )
}
