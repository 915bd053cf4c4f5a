//! Load-time reference resolution.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bson::Bson;
use parking_lot::RwLock;

use crate::error::MappingResult;
use crate::metadata::{FieldDescriptor, MetadataRegistry, TypeRef};
use crate::model::{FieldValue, Object};

use super::{IdentityKey, LoadStrategy, Repository, identity_of, stored_id};

/// Replaces stored identifiers on reference fields with loaded entities.
///
/// Every entity fetched from the [`Repository`] is kept in a cache shared by
/// all calls on this resolver, so an entity referenced from several places is
/// loaded once. The cache lives until [`clear_cache`](Self::clear_cache).
/// Concurrent resolutions may both load the same entity; the later insert
/// wins.
pub struct ReferenceResolver {
    registry: Arc<MetadataRegistry>,
    repository: Arc<dyn Repository>,
    strategy: LoadStrategy,
    cache: RwLock<HashMap<IdentityKey, Box<dyn Object>>>,
}

impl ReferenceResolver {
    /// Creates a resolver loading through `repository`.
    pub fn new(
        registry: Arc<MetadataRegistry>,
        repository: Arc<dyn Repository>,
        strategy: LoadStrategy,
    ) -> Self {
        Self {
            registry,
            repository,
            strategy,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configured strategy.
    pub fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    /// Returns the number of cached entities.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    /// Forgets every cached entity.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Removes one entity from the cache, e.g. after it was saved or deleted.
    pub fn evict(&self, key: &IdentityKey) {
        self.cache.write().remove(key);
    }

    /// Resolves the reference fields of `entity` in place.
    ///
    /// References whose target does not exist keep their raw identifier and
    /// log a warning. A reference back to an entity already being resolved
    /// further up the current path is left unresolved.
    pub fn resolve_references(&self, entity: &mut dyn Object) -> MappingResult<()> {
        if self.strategy == LoadStrategy::Lazy {
            return Ok(());
        }
        let mut in_progress = HashSet::new();
        let metadata = self.registry.metadata_for(&entity.type_ref());
        if let Some(key) = identity_of(&metadata, entity) {
            in_progress.insert(key);
        }
        self.resolve_object(entity, 0, &mut in_progress)
    }

    fn resolve_object(
        &self,
        entity: &mut dyn Object,
        depth: usize,
        in_progress: &mut HashSet<IdentityKey>,
    ) -> MappingResult<()> {
        let metadata = self.registry.metadata_for(&entity.type_ref());
        for field in metadata.reference_fields() {
            let Some(value) = entity.get_field(field.name()) else {
                continue;
            };
            if let Some(resolved) = self.resolve_value(field, value, depth, in_progress)? {
                entity.set_field(field.name(), resolved)?;
            }
        }
        Ok(())
    }

    /// Returns the replacement of a reference value, or `None` if it stays.
    fn resolve_value(
        &self,
        field: &FieldDescriptor,
        value: FieldValue,
        depth: usize,
        in_progress: &mut HashSet<IdentityKey>,
    ) -> MappingResult<Option<FieldValue>> {
        let Some(target) = field.field_type().object_type() else {
            return Ok(None);
        };
        match value {
            FieldValue::Id(raw) => Ok(self
                .load(target, &raw, depth, in_progress)?
                .map(FieldValue::Object)),
            FieldValue::Object(mut loaded) => {
                if self.recurses() {
                    self.descend(loaded.as_mut(), depth, in_progress)?;
                    Ok(Some(FieldValue::Object(loaded)))
                } else {
                    Ok(None)
                }
            }
            FieldValue::List(items) => {
                let mut changed = false;
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_value(field, item.clone(), depth, in_progress)? {
                        Some(replacement) => {
                            changed = true;
                            resolved.push(replacement);
                        }
                        None => resolved.push(item),
                    }
                }
                Ok(changed.then_some(FieldValue::List(resolved)))
            }
            _ => Ok(None),
        }
    }

    /// Loads one referenced entity, from the cache when possible.
    fn load(
        &self,
        target: &TypeRef,
        raw: &Bson,
        depth: usize,
        in_progress: &mut HashSet<IdentityKey>,
    ) -> MappingResult<Option<Box<dyn Object>>> {
        let metadata = self.registry.metadata_for(target);
        let raw = &match metadata.id_field() {
            Some(id_field) => stored_id(id_field, raw.clone()),
            None => raw.clone(),
        };
        let key = IdentityKey::new(metadata.collection_name(), raw);
        if in_progress.contains(&key) {
            tracing::debug!("Reference cycle at {}; leaving identifier in place", key);
            return Ok(None);
        }

        tracing::trace!(depth, "Resolving reference {}", key);

        let cached = self.cache.read().get(&key).cloned();
        let mut loaded = match cached {
            Some(hit) => hit,
            None => match self.repository.find_by_id(target, raw)? {
                Some(found) => {
                    self.cache.write().insert(key.clone(), found.clone());
                    found
                }
                None => {
                    tracing::warn!(
                        "Referenced {} not found; keeping the raw identifier",
                        key
                    );
                    return Ok(None);
                }
            },
        };

        if self.recurses() {
            in_progress.insert(key.clone());
            let result = self.resolve_object(loaded.as_mut(), depth + 1, in_progress);
            in_progress.remove(&key);
            result?;
        }
        Ok(Some(loaded))
    }

    fn descend(
        &self,
        entity: &mut dyn Object,
        depth: usize,
        in_progress: &mut HashSet<IdentityKey>,
    ) -> MappingResult<()> {
        let metadata = self.registry.metadata_for(&entity.type_ref());
        let key = identity_of(&metadata, entity);
        if let Some(key) = &key {
            if !in_progress.insert(key.clone()) {
                return Ok(());
            }
        }
        let result = self.resolve_object(entity, depth + 1, in_progress);
        if let Some(key) = &key {
            in_progress.remove(key);
        }
        result
    }

    /// Returns true if the references of loaded entities are resolved too.
    fn recurses(&self) -> bool {
        matches!(self.strategy, LoadStrategy::Eager)
    }
}

impl fmt::Debug for ReferenceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReferenceResolver")
            .field("strategy", &self.strategy)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "derive"))]
mod tests {
    use super::*;
    use crate::error::MappingError;
    use crate::model::Ref;
    use crate::testing::*;
    use parking_lot::Mutex;

    /// Serves clones of a fixed set of entities and counts lookups.
    #[derive(Default)]
    struct FixedRepository {
        entities: HashMap<IdentityKey, Box<dyn Object>>,
        lookups: Mutex<Vec<IdentityKey>>,
        registry: MetadataRegistry,
    }

    impl FixedRepository {
        fn with(mut self, entity: impl Object) -> Self {
            let metadata = self.registry.metadata_for(&entity.type_ref());
            let key = identity_of(&metadata, &entity).unwrap();
            self.entities.insert(key, Box::new(entity));
            self
        }

        fn lookups(&self) -> usize {
            self.lookups.lock().len()
        }
    }

    impl Repository for FixedRepository {
        fn find_by_id(&self, type_ref: &TypeRef, id: &Bson) -> MappingResult<Option<Box<dyn Object>>> {
            let metadata = self.registry.metadata_for(type_ref);
            let key = IdentityKey::new(metadata.collection_name(), id);
            self.lookups.lock().push(key.clone());
            Ok(self.entities.get(&key).cloned())
        }
    }

    fn author(id: i64, books: &[i64]) -> Author {
        Author {
            id,
            name: format!("author-{}", id),
            books: books.iter().map(|b| Ref::id(*b)).collect(),
        }
    }

    fn book(id: i64, author: i64) -> Book {
        Book {
            id,
            title: format!("book-{}", id),
            author: Some(Ref::id(author)),
        }
    }

    fn resolver(repository: Arc<FixedRepository>, strategy: LoadStrategy) -> ReferenceResolver {
        ReferenceResolver::new(Arc::new(MetadataRegistry::new()), repository, strategy)
    }

    #[test]
    fn test_eager_terminates_on_cycle() {
        let repository = Arc::new(
            FixedRepository::default()
                .with(author(1, &[10]))
                .with(book(10, 1)),
        );
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::Eager);

        let mut root = book(10, 1);
        resolver.resolve_references(&mut root).unwrap();

        let loaded_author = root.author.as_ref().unwrap().as_loaded().unwrap();
        assert_eq!(loaded_author.name, "author-1");
        // The author's book points back at the root, which is mid-resolution.
        assert!(matches!(loaded_author.books[0], Ref::Id(Bson::Int64(10))));
    }

    #[test]
    fn test_eager_resolves_references_of_references() {
        let repository = Arc::new(
            FixedRepository::default()
                .with(author(1, &[11]))
                .with(book(11, 2))
                .with(author(2, &[])),
        );
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::Eager);

        let mut root = book(10, 1);
        resolver.resolve_references(&mut root).unwrap();

        let first = root.author.as_ref().unwrap().as_loaded().unwrap();
        let nested = first.books[0].as_loaded().unwrap();
        assert_eq!(nested.title, "book-11");
        let second = nested.author.as_ref().unwrap().as_loaded().unwrap();
        assert_eq!(second.id, 2);
    }

    #[test]
    fn test_eager_direct_stops_after_first_level() {
        let repository = Arc::new(
            FixedRepository::default()
                .with(author(1, &[11]))
                .with(book(11, 2)),
        );
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::EagerDirect);

        let mut root = book(10, 1);
        resolver.resolve_references(&mut root).unwrap();

        let first = root.author.as_ref().unwrap().as_loaded().unwrap();
        assert!(!first.books[0].is_loaded());
        assert_eq!(repository.lookups(), 1);
    }

    #[test]
    fn test_lazy_leaves_identifiers() {
        let repository = Arc::new(FixedRepository::default().with(author(1, &[])));
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::Lazy);

        let mut root = book(10, 1);
        resolver.resolve_references(&mut root).unwrap();
        assert!(!root.author.as_ref().unwrap().is_loaded());
        assert_eq!(repository.lookups(), 0);
    }

    #[test]
    fn test_missing_target_keeps_identifier() {
        let repository = Arc::new(FixedRepository::default());
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::Eager);

        let mut root = book(10, 99);
        resolver.resolve_references(&mut root).unwrap();
        assert!(matches!(root.author, Some(Ref::Id(Bson::Int64(99)))));
    }

    #[test]
    fn test_cache_prevents_repeated_lookups() {
        let repository = Arc::new(
            FixedRepository::default()
                .with(book(11, 1))
                .with(book(12, 1))
                .with(author(1, &[])),
        );
        let resolver = resolver(Arc::clone(&repository), LoadStrategy::Eager);

        let mut root = author(5, &[11, 12]);
        resolver.resolve_references(&mut root).unwrap();
        assert!(root.books.iter().all(Ref::is_loaded));
        // book 11, book 12, and author 1 once.
        assert_eq!(repository.lookups(), 3);

        let mut again = book(13, 1);
        resolver.resolve_references(&mut again).unwrap();
        assert_eq!(repository.lookups(), 3);

        resolver.clear_cache();
        assert_eq!(resolver.cached(), 0);
        let mut third = book(14, 1);
        resolver.resolve_references(&mut third).unwrap();
        assert_eq!(repository.lookups(), 4);
    }

    #[test]
    fn test_repository_errors_propagate() {
        struct Failing;
        impl Repository for Failing {
            fn find_by_id(&self, _: &TypeRef, _: &Bson) -> MappingResult<Option<Box<dyn Object>>> {
                Err(crate::error::StoreError::Unavailable {
                    message: "offline".to_string(),
                }
                .into())
            }
        }

        let resolver = ReferenceResolver::new(
            Arc::new(MetadataRegistry::new()),
            Arc::new(Failing),
            LoadStrategy::Eager,
        );
        let mut root = book(10, 1);
        let err = resolver.resolve_references(&mut root).unwrap_err();
        assert!(matches!(err, MappingError::Store(_)));
    }
}
