//! Save-time cascade discovery.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bson::Bson;

use crate::error::{MappingError, MappingResult};
use crate::metadata::MetadataRegistry;
use crate::model::{FieldValue, Object};

use super::{CascadeStrategy, IdentityKey, entity_id, identity_of};

/// A referenced entity that must be persisted with its owner.
#[derive(Debug, Clone)]
pub struct CascadeEntry {
    key: IdentityKey,
    id: Bson,
    entity: Box<dyn Object>,
    depth: usize,
}

impl CascadeEntry {
    /// Identity of the referenced entity.
    pub fn key(&self) -> &IdentityKey {
        &self.key
    }

    /// Stored identifier of the referenced entity.
    pub fn id(&self) -> &Bson {
        &self.id
    }

    /// The referenced entity as found on its owner.
    pub fn entity(&self) -> &dyn Object {
        self.entity.as_ref()
    }

    /// Depth at which the entity was first reached; direct references are 1.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Consumes the entry, returning the entity.
    pub fn into_entity(self) -> Box<dyn Object> {
        self.entity
    }
}

/// Referenced entities requiring cascade persistence, in discovery order.
///
/// Each identity appears once.
#[derive(Debug, Clone, Default)]
pub struct CascadeSet {
    entries: Vec<CascadeEntry>,
}

impl CascadeSet {
    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing needs to cascade.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the entries in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &CascadeEntry> {
        self.entries.iter()
    }

    /// Returns the identities of the entries.
    pub fn ids(&self) -> Vec<&IdentityKey> {
        self.entries.iter().map(CascadeEntry::key).collect()
    }

    /// Returns true if the set holds `key`.
    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.entries.iter().any(|entry| &entry.key == key)
    }
}

impl IntoIterator for CascadeSet {
    type Item = CascadeEntry;
    type IntoIter = std::vec::IntoIter<CascadeEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Determines which referenced entities are persisted along with an owner.
pub struct ReferenceHandler {
    registry: Arc<MetadataRegistry>,
    strategy: CascadeStrategy,
}

impl ReferenceHandler {
    /// Creates a handler applying `strategy`.
    pub fn new(registry: Arc<MetadataRegistry>, strategy: CascadeStrategy) -> Self {
        Self { registry, strategy }
    }

    /// Returns the configured strategy.
    pub fn strategy(&self) -> CascadeStrategy {
        self.strategy
    }

    /// Walks the loaded references of `entity` and collects those to persist.
    ///
    /// References holding only an identifier are never cascaded. A referenced
    /// entity without an identifier fails with
    /// [`MappingError::MissingIdentifier`]. The owner itself is never part of
    /// the result, even when the graph refers back to it.
    pub fn process_references(&self, entity: &dyn Object) -> MappingResult<CascadeSet> {
        let mut set = CascadeSet::default();
        if self.strategy == CascadeStrategy::NoCascade {
            return Ok(set);
        }

        let mut visited = HashSet::new();
        let metadata = self.registry.metadata_for(&entity.type_ref());
        if let Some(key) = identity_of(&metadata, entity) {
            visited.insert(key);
        }
        self.walk(entity, 1, &mut visited, &mut set)?;

        tracing::debug!(
            "Cascade from {} ({}) reaches {} entities",
            metadata.type_name(),
            self.strategy,
            set.len()
        );
        Ok(set)
    }

    fn walk(
        &self,
        owner: &dyn Object,
        depth: usize,
        visited: &mut HashSet<IdentityKey>,
        set: &mut CascadeSet,
    ) -> MappingResult<()> {
        if !self.strategy.should_save_reference(depth) {
            return Ok(());
        }
        let metadata = self.registry.metadata_for(&owner.type_ref());
        for field in metadata.reference_fields() {
            let Some(value) = owner.get_field(field.name()) else {
                continue;
            };
            for target in loaded_targets(value) {
                self.visit(target, depth, visited, set)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        target: Box<dyn Object>,
        depth: usize,
        visited: &mut HashSet<IdentityKey>,
        set: &mut CascadeSet,
    ) -> MappingResult<()> {
        let metadata = self.registry.metadata_for(&target.type_ref());
        if metadata.id_field().is_none() {
            return Err(MappingError::missing_identifier(
                metadata.type_name(),
                "type declares no id field",
            ));
        }
        let id = entity_id(&metadata, target.as_ref())?.ok_or_else(|| {
            MappingError::missing_identifier(metadata.type_name(), "id is null")
        })?;

        let key = IdentityKey::new(metadata.collection_name(), &id);
        if !visited.insert(key.clone()) {
            tracing::trace!("Already visited {}", key);
            return Ok(());
        }

        self.walk(target.as_ref(), depth + 1, visited, set)?;
        set.entries.push(CascadeEntry {
            key,
            id,
            entity: target,
            depth,
        });
        Ok(())
    }
}

impl fmt::Debug for ReferenceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceHandler")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Flattens a reference field value into its loaded entities.
fn loaded_targets(value: FieldValue) -> Vec<Box<dyn Object>> {
    match value {
        FieldValue::Object(obj) => vec![obj],
        FieldValue::List(items) => items.into_iter().flat_map(loaded_targets).collect(),
        _ => Vec::new(),
    }
}
