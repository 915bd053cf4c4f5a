//! CRUD glue over a document store.
//!
//! [`Datastore`] wires the mapping chains, reference handling, index
//! management, generators, and lifecycle triggers into save, load, and delete
//! calls against one [`DocumentStore`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bson::{Bson, Document, doc};

use crate::config::OdmConfig;
use crate::error::{MappingError, MappingResult};
use crate::generator::GeneratorRegistry;
use crate::index::IndexManager;
use crate::mapping::{Deserializer, Serializer, de::decode_id};
use crate::metadata::{EntityMetadata, ID_KEY, MetadataRegistry, TriggerAction, TriggerPhase, TypeRef};
use crate::model::{Entity, FieldValue, Object, downcast_box};
use crate::reference::{
    IdentityKey, ReferenceHandler, ReferenceResolver, Repository, entity_id, identity_of, stored_id,
};
use crate::store::DocumentStore;

/// Loads entities straight from a document store.
///
/// Used by the [`ReferenceResolver`]; loaded entities have their load
/// triggers fired but their references left unresolved.
pub struct StoreRepository {
    store: Arc<dyn DocumentStore>,
    deserializer: Arc<Deserializer>,
}

impl StoreRepository {
    pub fn new(store: Arc<dyn DocumentStore>, deserializer: Arc<Deserializer>) -> Self {
        Self {
            store,
            deserializer,
        }
    }

    /// Builds an entity from a stored document, firing its load triggers
    /// around population.
    pub fn materialize(&self, type_ref: &TypeRef, document: &Document) -> MappingResult<Box<dyn Object>> {
        let metadata = self.deserializer.registry().metadata_for(type_ref);
        let mut entity = type_ref
            .instantiate()
            .ok_or_else(|| MappingError::MissingConstructor {
                type_name: type_ref.name().to_string(),
            })?;
        metadata.fire(TriggerAction::Load, TriggerPhase::Pre, entity.as_mut());
        self.deserializer.populate(entity.as_mut(), document)?;
        metadata.fire(TriggerAction::Load, TriggerPhase::Post, entity.as_mut());
        Ok(entity)
    }
}

impl Repository for StoreRepository {
    fn find_by_id(&self, type_ref: &TypeRef, id: &Bson) -> MappingResult<Option<Box<dyn Object>>> {
        let metadata = self.deserializer.registry().metadata_for(type_ref);
        let found = self
            .store
            .collection(metadata.collection_name())
            .find_one(&doc! { ID_KEY: id.clone() })?;
        found
            .map(|document| self.materialize(type_ref, &document))
            .transpose()
    }
}

/// Entity-level access to a document store.
///
/// # Saving
///
/// [`save`](Self::save) fires the insert or update triggers (update when a
/// document with the entity's id already exists), ensures the type's indexes
/// if configured, persists cascaded references, serializes the entity,
/// writes generated values and store-assigned ids back into it, and stores
/// the document. Cascaded entities are upserted by id without firing their
/// own triggers. Values generated for a cascaded entity, such as a fresh
/// auto-increment id, are applied to every copy of it reachable from the
/// saved entity before the references to it are written.
///
/// # Loading
///
/// Loaded entities have their load triggers fired around population and
/// their references resolved per the configured
/// [`LoadStrategy`](crate::reference::LoadStrategy).
pub struct Datastore {
    store: Arc<dyn DocumentStore>,
    config: OdmConfig,
    registry: Arc<MetadataRegistry>,
    generators: Arc<GeneratorRegistry>,
    serializer: Serializer,
    repository: Arc<StoreRepository>,
    resolver: ReferenceResolver,
    handler: ReferenceHandler,
    indexes: IndexManager,
}

impl Datastore {
    /// Creates a datastore with the default configuration.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, OdmConfig::default())
    }

    /// Creates a datastore using the process-wide metadata registry.
    pub fn with_config(store: Arc<dyn DocumentStore>, config: OdmConfig) -> Self {
        Self::with_registry(store, config, MetadataRegistry::global())
    }

    /// Creates a datastore using its own metadata registry.
    pub fn with_registry(
        store: Arc<dyn DocumentStore>,
        config: OdmConfig,
        registry: Arc<MetadataRegistry>,
    ) -> Self {
        let generators = Arc::new(GeneratorRegistry::with_defaults(
            config.counters_collection.clone(),
        ));
        let serializer = Serializer::builder()
            .with_registry(Arc::clone(&registry))
            .with_generators(Arc::clone(&generators))
            .with_store(Arc::clone(&store))
            .build();
        let deserializer = Arc::new(
            Deserializer::builder()
                .with_registry(Arc::clone(&registry))
                .skip_invalid_elements(config.skip_invalid_elements)
                .build(),
        );
        let repository = Arc::new(StoreRepository::new(Arc::clone(&store), deserializer));
        let resolver = ReferenceResolver::new(
            Arc::clone(&registry),
            Arc::clone(&repository) as Arc<dyn Repository>,
            config.load_strategy,
        );
        let handler = ReferenceHandler::new(Arc::clone(&registry), config.cascade_strategy);
        let indexes = IndexManager::new(Arc::clone(&store), Arc::clone(&registry));

        tracing::info!(
            "Datastore over {} (load: {}, cascade: {}, ensure indexes: {})",
            store.backend_name(),
            config.load_strategy,
            config.cascade_strategy,
            config.ensure_indexes_on_save
        );

        Self {
            store,
            config,
            registry,
            generators,
            serializer,
            repository,
            resolver,
            handler,
            indexes,
        }
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    /// Generators available to id and generated fields; custom generators
    /// may be registered at any time.
    pub fn generators(&self) -> &Arc<GeneratorRegistry> {
        &self.generators
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }

    pub fn resolver(&self) -> &ReferenceResolver {
        &self.resolver
    }

    pub fn index_manager(&self) -> &IndexManager {
        &self.indexes
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Saves an entity and returns its stored id.
    pub fn save<T: Entity>(&self, entity: &mut T) -> MappingResult<Bson> {
        self.save_object(entity)
    }

    /// Saves any mapped object and returns its stored id.
    pub fn save_object(&self, entity: &mut dyn Object) -> MappingResult<Bson> {
        let type_ref = entity.type_ref();
        let metadata = self.registry.metadata_for(&type_ref);
        let action = if self.exists(&metadata, entity)? {
            TriggerAction::Update
        } else {
            TriggerAction::Insert
        };

        metadata.fire(action, TriggerPhase::Pre, entity);

        if self.config.ensure_indexes_on_save {
            self.indexes.ensure_indexes_for(&type_ref)?;
        }

        let cascade = self.handler.process_references(entity)?;
        let mut assigned: HashMap<IdentityKey, Vec<(String, FieldValue)>> = HashMap::new();
        for entry in cascade {
            tracing::debug!("Cascading save to {} (depth {})", entry.key(), entry.depth());
            let key = entry.key().clone();
            let mut target = entry.into_entity();
            self.patch_references(target.as_mut(), &assigned)?;
            let generated = self.upsert_cascaded(target.as_ref())?;
            self.resolver.evict(&key);
            if !generated.is_empty() {
                assigned.insert(key, generated);
            }
        }
        if !assigned.is_empty() {
            self.patch_references(entity, &assigned)?;
        }

        let serialized = self.serializer.serialize(entity)?;
        for (name, value) in serialized.generated {
            entity.set_field(&name, value)?;
        }

        let collection = self.store.collection(metadata.collection_name());
        let id = match serialized.document.get(ID_KEY).cloned() {
            Some(id) => {
                collection.replace_one(&doc! { ID_KEY: id.clone() }, serialized.document, true)?;
                id
            }
            None => {
                let id = collection.insert_one(serialized.document)?;
                if let Some(id_field) = metadata.id_field() {
                    entity.set_field(id_field.name(), decode_id(id_field, &id)?)?;
                }
                id
            }
        };

        self.resolver
            .evict(&IdentityKey::new(metadata.collection_name(), &id));
        metadata.fire(action, TriggerPhase::Post, entity);
        tracing::trace!("Saved {} {}", metadata.type_name(), id);
        Ok(id)
    }

    fn exists(&self, metadata: &EntityMetadata, entity: &dyn Object) -> MappingResult<bool> {
        let Some(id) = entity_id(metadata, entity)? else {
            return Ok(false);
        };
        let count = self
            .store
            .collection(metadata.collection_name())
            .count_documents(&doc! { ID_KEY: id })?;
        Ok(count > 0)
    }

    /// Stores a cascaded entity by id and returns the values generated for
    /// it. Its own triggers are not fired.
    fn upsert_cascaded(&self, entity: &dyn Object) -> MappingResult<Vec<(String, FieldValue)>> {
        let type_ref = entity.type_ref();
        let metadata = self.registry.metadata_for(&type_ref);
        if self.config.ensure_indexes_on_save {
            self.indexes.ensure_indexes_for(&type_ref)?;
        }
        let serialized = self.serializer.serialize(entity)?;
        let Some(id) = serialized.document.get(ID_KEY).cloned() else {
            return Err(MappingError::missing_identifier(
                metadata.type_name(),
                "id is null",
            ));
        };
        self.store
            .collection(metadata.collection_name())
            .replace_one(&doc! { ID_KEY: id.clone() }, serialized.document, true)?;
        self.resolver
            .evict(&IdentityKey::new(metadata.collection_name(), &id));
        Ok(serialized.generated)
    }

    /// Applies the values generated for cascaded entities to the copies of
    /// them reachable through the reference fields of `entity`.
    fn patch_references(
        &self,
        entity: &mut dyn Object,
        assigned: &HashMap<IdentityKey, Vec<(String, FieldValue)>>,
    ) -> MappingResult<bool> {
        let metadata = self.registry.metadata_for(&entity.type_ref());
        let mut changed = false;
        for field in metadata.reference_fields() {
            let Some(mut value) = entity.get_field(field.name()) else {
                continue;
            };
            if self.patch_value(&mut value, assigned)? {
                entity.set_field(field.name(), value)?;
                changed = true;
            }
        }
        Ok(changed)
    }

    fn patch_value(
        &self,
        value: &mut FieldValue,
        assigned: &HashMap<IdentityKey, Vec<(String, FieldValue)>>,
    ) -> MappingResult<bool> {
        match value {
            FieldValue::Object(target) => {
                let metadata = self.registry.metadata_for(&target.type_ref());
                // keyed by the id the entity had before its cascade save
                let generated = identity_of(&metadata, target.as_ref())
                    .and_then(|key| assigned.get(&key));
                let mut changed = false;
                if let Some(generated) = generated {
                    for (name, generated_value) in generated {
                        target.set_field(name, generated_value.clone())?;
                    }
                    changed = true;
                }
                if self.patch_references(target.as_mut(), assigned)? {
                    changed = true;
                }
                Ok(changed)
            }
            FieldValue::List(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    if self.patch_value(item, assigned)? {
                        changed = true;
                    }
                }
                Ok(changed)
            }
            _ => Ok(false),
        }
    }

    // ========================================================================
    // Load
    // ========================================================================

    /// Loads the `T` stored under `id`.
    pub fn find_by_id<T: Entity>(&self, id: impl Into<Bson>) -> MappingResult<Option<T>> {
        let metadata = self.registry.get::<T>();
        let id = match metadata.id_field() {
            Some(id_field) => stored_id(id_field, id.into()),
            None => id.into(),
        };
        let found = self
            .store
            .collection(metadata.collection_name())
            .find_one(&doc! { ID_KEY: id })?;
        found.map(|document| self.load::<T>(&document)).transpose()
    }

    /// Loads every `T` matching an equality filter on document keys.
    pub fn find<T: Entity>(&self, filter: Document) -> MappingResult<Vec<T>> {
        let metadata = self.registry.get::<T>();
        self.store
            .collection(metadata.collection_name())
            .find(&filter)?
            .iter()
            .map(|document| self.load::<T>(document))
            .collect()
    }

    /// Counts the stored `T` matching a filter.
    pub fn count<T: Entity>(&self, filter: Document) -> MappingResult<u64> {
        let metadata = self.registry.get::<T>();
        Ok(self
            .store
            .collection(metadata.collection_name())
            .count_documents(&filter)?)
    }

    /// Converts one stored document into a `T` with references resolved.
    pub fn load<T: Entity>(&self, document: &Document) -> MappingResult<T> {
        let type_ref = TypeRef::of::<T>();
        let mut entity = self.repository.materialize(&type_ref, document)?;
        self.resolver.resolve_references(entity.as_mut())?;
        downcast_box::<T>(entity).map_err(|other| {
            MappingError::type_mismatch("<root>", T::TYPE_NAME, other.type_ref().name())
        })
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Deletes a stored entity; returns true if a document was removed.
    ///
    /// Referenced entities are never deleted along with their owner.
    pub fn delete<T: Entity>(&self, entity: &mut T) -> MappingResult<bool> {
        let metadata = self.registry.get::<T>();
        let id = entity_id(&metadata, entity)?.ok_or_else(|| {
            MappingError::missing_identifier(metadata.type_name(), "cannot delete without an id")
        })?;

        metadata.fire(TriggerAction::Delete, TriggerPhase::Pre, entity);
        let deleted = self
            .store
            .collection(metadata.collection_name())
            .delete_one(&doc! { ID_KEY: id })?;
        if let Some(key) = identity_of(&metadata, entity) {
            self.resolver.evict(&key);
        }
        metadata.fire(TriggerAction::Delete, TriggerPhase::Post, entity);
        Ok(deleted > 0)
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Ensures the indexes of `T`; returns the number of create calls issued.
    pub fn ensure_indexes<T: Entity>(&self) -> MappingResult<usize> {
        self.indexes.ensure_indexes::<T>()
    }

    /// Drops the indexes of `T`'s collection.
    pub fn drop_indexes<T: Entity>(&self) -> MappingResult<()> {
        self.indexes.drop_indexes::<T>()
    }

    /// Forgets which types had their indexes ensured.
    pub fn clear_ensured_indexes(&self) {
        self.indexes.clear_ensured_indexes();
    }

    /// Forgets every entity cached by reference resolution.
    pub fn clear_cache(&self) {
        self.resolver.clear_cache();
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("store", &self.store.backend_name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
