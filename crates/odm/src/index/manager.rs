use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{MappingError, MappingResult, StoreError};
use crate::metadata::{MetadataRegistry, TypeRef};
use crate::model::Entity;
use crate::store::DocumentStore;

use super::spec::{IndexSpec, derive_index_specs};

/// Ensures the indexes of entity types at most once per manager.
///
/// Each [`Datastore`](crate::Datastore) owns its own manager, so two
/// datastores over the same store each issue the create calls once. The
/// ensured state is tracked per type behind its own lock, so concurrent
/// `ensure_indexes` calls for one type issue the create calls once while
/// other types proceed independently.
pub struct IndexManager {
    store: Arc<dyn DocumentStore>,
    registry: Arc<MetadataRegistry>,
    ensured: Mutex<HashMap<TypeId, Arc<Mutex<bool>>>>,
}

impl IndexManager {
    pub fn new(store: Arc<dyn DocumentStore>, registry: Arc<MetadataRegistry>) -> Self {
        Self {
            store,
            registry,
            ensured: Mutex::new(HashMap::new()),
        }
    }

    /// Ensures the indexes of `T`; see [`ensure_indexes_for`](Self::ensure_indexes_for).
    pub fn ensure_indexes<T: Entity>(&self) -> MappingResult<usize> {
        self.ensure_indexes_for(&TypeRef::of::<T>())
    }

    /// Derives the index specs of a type and creates each one in its
    /// collection.
    ///
    /// Returns the number of create calls issued, which is zero when the type
    /// was already ensured. A failed create leaves the type un-ensured, so the
    /// next call retries the full set.
    pub fn ensure_indexes_for(&self, type_ref: &TypeRef) -> MappingResult<usize> {
        let slot = self.slot(type_ref.type_id());
        let mut ensured = slot.lock();
        if *ensured {
            return Ok(0);
        }

        let metadata = self.registry.metadata_for(type_ref);
        let specs = derive_index_specs(&metadata)?;
        let collection = self.store.collection(metadata.collection_name());
        for spec in &specs {
            let name = collection
                .create_index(&spec.keys_document(), spec.options())
                .map_err(|source| index_error(metadata.collection_name(), "create", source))?;
            tracing::debug!(
                "Ensured index {} on {} ({})",
                name,
                metadata.collection_name(),
                describe(spec)
            );
        }

        *ensured = true;
        Ok(specs.len())
    }

    /// Drops every index of `T`'s collection and forgets that `T` was ensured.
    pub fn drop_indexes<T: Entity>(&self) -> MappingResult<()> {
        self.drop_indexes_for(&TypeRef::of::<T>())
    }

    /// Drops every index of a type's collection.
    ///
    /// The type is forgotten whether or not the drop succeeds.
    pub fn drop_indexes_for(&self, type_ref: &TypeRef) -> MappingResult<()> {
        let slot = self.slot(type_ref.type_id());
        let mut ensured = slot.lock();
        *ensured = false;

        let metadata = self.registry.metadata_for(type_ref);
        self.store
            .collection(metadata.collection_name())
            .drop_indexes()
            .map_err(|source| index_error(metadata.collection_name(), "drop", source))?;
        tracing::debug!("Dropped indexes on {}", metadata.collection_name());
        Ok(())
    }

    /// Returns true if the indexes of `T` were ensured.
    pub fn is_ensured<T: Entity>(&self) -> bool {
        let slot = self.ensured.lock().get(&TypeId::of::<T>()).cloned();
        slot.is_some_and(|slot| *slot.lock())
    }

    /// Forgets every ensured type without touching the store.
    pub fn clear_ensured_indexes(&self) {
        for slot in self.ensured.lock().values() {
            *slot.lock() = false;
        }
    }

    fn slot(&self, type_id: TypeId) -> Arc<Mutex<bool>> {
        Arc::clone(self.ensured.lock().entry(type_id).or_default())
    }
}

impl fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexManager")
            .field("store", &self.store.backend_name())
            .field("tracked_types", &self.ensured.lock().len())
            .finish()
    }
}

fn index_error(collection: &str, operation: &str, source: StoreError) -> MappingError {
    MappingError::Index {
        collection: collection.to_string(),
        operation: operation.to_string(),
        source,
    }
}

fn describe(spec: &IndexSpec) -> String {
    let options = spec.options();
    let mut flags = Vec::new();
    if options.unique {
        flags.push("unique");
    }
    if options.sparse {
        flags.push("sparse");
    }
    if options.background {
        flags.push("background");
    }
    if options.drop_dups {
        flags.push("drop_dups");
    }
    if flags.is_empty() {
        spec.keys_document().to_string()
    } else {
        format!("{} {}", spec.keys_document(), flags.join(","))
    }
}
