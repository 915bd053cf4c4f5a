//! In-process document store.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use parking_lot::{Mutex, RwLock};

use crate::error::{StoreError, StoreResult};
use crate::metadata::{ID_KEY, IndexOptions};

use super::{CollectionHandle, DocumentStore, IndexInfo, UpdateOutcome, default_index_name};

/// Operations of a [`MemoryStore`] that can be counted and made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    /// `find` and `find_one`.
    Find,
    /// `insert_one`.
    Insert,
    /// `replace_one`.
    Replace,
    /// `update_one`, `update_many`, and `find_one_and_update`.
    Update,
    /// `delete_one` and `delete_many`.
    Delete,
    /// `count_documents`.
    Count,
    /// `create_index`.
    CreateIndex,
    /// `drop_indexes`.
    DropIndexes,
    /// `list_indexes`.
    ListIndexes,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOperation::Find => "find",
            StoreOperation::Insert => "insert",
            StoreOperation::Replace => "replace",
            StoreOperation::Update => "update",
            StoreOperation::Delete => "delete",
            StoreOperation::Count => "count",
            StoreOperation::CreateIndex => "createIndex",
            StoreOperation::DropIndexes => "dropIndexes",
            StoreOperation::ListIndexes => "listIndexes",
        };
        write!(f, "{}", name)
    }
}

#[derive(Default)]
struct Shared {
    failures: Mutex<HashSet<StoreOperation>>,
    calls: Mutex<HashMap<StoreOperation, u64>>,
}

impl Shared {
    fn enter(&self, collection: &str, operation: StoreOperation) -> StoreResult<()> {
        *self.calls.lock().entry(operation).or_default() += 1;
        if self.failures.lock().contains(&operation) {
            return Err(StoreError::operation(
                collection,
                operation.to_string(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

/// A [`DocumentStore`] keeping every collection in memory.
///
/// Filters support equality on top-level and dotted paths plus the `$in`
/// operator; updates support `$set`, `$unset`, and `$inc`. Unique indexes
/// are enforced on insert, replace, and update.
///
/// For tests the store counts calls per [`StoreOperation`] and can be told
/// to fail an operation with [`fail_on`](Self::fail_on).
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call of `operation` fail.
    pub fn fail_on(&self, operation: StoreOperation) {
        self.shared.failures.lock().insert(operation);
    }

    /// Removes every injected failure.
    pub fn clear_failures(&self) {
        self.shared.failures.lock().clear();
    }

    /// Returns how many times `operation` was called, failures included.
    pub fn call_count(&self, operation: StoreOperation) -> u64 {
        self.shared
            .calls
            .lock()
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Resets every call counter.
    pub fn reset_call_counts(&self) {
        self.shared.calls.lock().clear();
    }

    /// Returns the names of the collections created so far.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns a copy of every document of a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.docs.lock().clone())
            .unwrap_or_default()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("collections", &self.collection_names())
            .finish()
    }
}

impl DocumentStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle> {
        if let Some(existing) = self.collections.read().get(name) {
            return Arc::clone(existing) as Arc<dyn CollectionHandle>;
        }
        let mut collections = self.collections.write();
        let handle = collections.entry(name.to_string()).or_insert_with(|| {
            Arc::new(MemoryCollection {
                name: name.to_string(),
                shared: Arc::clone(&self.shared),
                docs: Mutex::new(Vec::new()),
                indexes: Mutex::new(Vec::new()),
            })
        });
        Arc::clone(handle) as Arc<dyn CollectionHandle>
    }
}

struct MemoryCollection {
    name: String,
    shared: Arc<Shared>,
    docs: Mutex<Vec<Document>>,
    indexes: Mutex<Vec<IndexInfo>>,
}

impl MemoryCollection {
    fn check_unique(&self, docs: &[Document], candidate: &Document, skip: Option<usize>) -> StoreResult<()> {
        let candidate_id = candidate.get(ID_KEY);
        for (pos, existing) in docs.iter().enumerate() {
            if Some(pos) == skip {
                continue;
            }
            if let (Some(a), Some(b)) = (candidate_id, existing.get(ID_KEY)) {
                if values_equal(a, b) {
                    return Err(StoreError::DuplicateKey {
                        collection: self.name.clone(),
                        key: format!("{}: {}", ID_KEY, a),
                    });
                }
            }
        }

        for index in self.indexes.lock().iter().filter(|i| i.options.unique) {
            let key: Vec<Option<&Bson>> = index
                .keys
                .keys()
                .map(|field| lookup_path(candidate, field))
                .collect();
            if index.options.sparse && key.iter().all(Option::is_none) {
                continue;
            }
            for (pos, existing) in docs.iter().enumerate() {
                if Some(pos) == skip {
                    continue;
                }
                let same = index.keys.keys().zip(&key).all(|(field, value)| {
                    match (lookup_path(existing, field), value) {
                        (Some(a), Some(b)) => values_equal(a, b),
                        (None, None) => true,
                        _ => false,
                    }
                });
                if same {
                    return Err(StoreError::DuplicateKey {
                        collection: self.name.clone(),
                        key: index.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn upsert_seed(filter: &Document) -> Document {
        let mut seed = Document::new();
        for (key, value) in filter {
            if key.starts_with('$') || is_operator_doc(value) {
                continue;
            }
            set_path(&mut seed, key, value.clone());
        }
        seed
    }

    fn update_at(&self, docs: &mut Vec<Document>, pos: usize, update: &Document) -> StoreResult<bool> {
        let mut updated = docs[pos].clone();
        apply_update(&self.name, &mut updated, update)?;
        if updated == docs[pos] {
            return Ok(false);
        }
        self.check_unique(docs, &updated, Some(pos))?;
        docs[pos] = updated;
        Ok(true)
    }

    fn upsert(&self, docs: &mut Vec<Document>, filter: &Document, update: &Document) -> StoreResult<Document> {
        let mut created = Self::upsert_seed(filter);
        apply_update(&self.name, &mut created, update)?;
        let created = with_id(created);
        self.check_unique(docs, &created, None)?;
        docs.push(created.clone());
        Ok(created)
    }
}

impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: &Document) -> StoreResult<Vec<Document>> {
        self.shared.enter(&self.name, StoreOperation::Find)?;
        Ok(self
            .docs
            .lock()
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .cloned()
            .collect())
    }

    fn insert_one(&self, document: Document) -> StoreResult<Bson> {
        self.shared.enter(&self.name, StoreOperation::Insert)?;
        let document = with_id(document);
        let mut docs = self.docs.lock();
        self.check_unique(&docs, &document, None)?;
        let id = document.get(ID_KEY).cloned().unwrap_or(Bson::Null);
        docs.push(document);
        Ok(id)
    }

    fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.shared.enter(&self.name, StoreOperation::Replace)?;
        let mut docs = self.docs.lock();
        match docs.iter().position(|doc| matches_filter(doc, filter)) {
            Some(pos) => {
                let mut replacement = replacement;
                if let Some(id) = docs[pos].get(ID_KEY).cloned() {
                    if !replacement.contains_key(ID_KEY) {
                        replacement = prepend_id(replacement, id);
                    }
                }
                self.check_unique(&docs, &replacement, Some(pos))?;
                let modified = docs[pos] != replacement;
                docs[pos] = replacement;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let mut created = Self::upsert_seed(filter);
                for (key, value) in replacement {
                    created.insert(key, value);
                }
                let created = with_id(created);
                self.check_unique(&docs, &created, None)?;
                let id = created.get(ID_KEY).cloned();
                docs.push(created);
                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted_id: id,
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.shared.enter(&self.name, StoreOperation::Update)?;
        let mut docs = self.docs.lock();
        match docs.iter().position(|doc| matches_filter(doc, filter)) {
            Some(pos) => {
                let modified = self.update_at(&mut docs, pos, update)?;
                Ok(UpdateOutcome {
                    matched: 1,
                    modified: u64::from(modified),
                    upserted_id: None,
                })
            }
            None if upsert => {
                let created = self.upsert(&mut docs, filter, update)?;
                Ok(UpdateOutcome {
                    matched: 0,
                    modified: 0,
                    upserted_id: created.get(ID_KEY).cloned(),
                })
            }
            None => Ok(UpdateOutcome::default()),
        }
    }

    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<UpdateOutcome> {
        self.shared.enter(&self.name, StoreOperation::Update)?;
        let mut docs = self.docs.lock();
        let positions: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| matches_filter(doc, filter))
            .map(|(pos, _)| pos)
            .collect();
        let mut outcome = UpdateOutcome {
            matched: positions.len() as u64,
            ..Default::default()
        };
        for pos in positions {
            if self.update_at(&mut docs, pos, update)? {
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }

    fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.shared.enter(&self.name, StoreOperation::Update)?;
        let mut docs = self.docs.lock();
        match docs.iter().position(|doc| matches_filter(doc, filter)) {
            Some(pos) => {
                self.update_at(&mut docs, pos, update)?;
                Ok(Some(docs[pos].clone()))
            }
            None if upsert => self.upsert(&mut docs, filter, update).map(Some),
            None => Ok(None),
        }
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<u64> {
        self.shared.enter(&self.name, StoreOperation::Delete)?;
        let mut docs = self.docs.lock();
        match docs.iter().position(|doc| matches_filter(doc, filter)) {
            Some(pos) => {
                docs.remove(pos);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn delete_many(&self, filter: &Document) -> StoreResult<u64> {
        self.shared.enter(&self.name, StoreOperation::Delete)?;
        let mut docs = self.docs.lock();
        let before = docs.len();
        docs.retain(|doc| !matches_filter(doc, filter));
        Ok((before - docs.len()) as u64)
    }

    fn count_documents(&self, filter: &Document) -> StoreResult<u64> {
        self.shared.enter(&self.name, StoreOperation::Count)?;
        Ok(self
            .docs
            .lock()
            .iter()
            .filter(|doc| matches_filter(doc, filter))
            .count() as u64)
    }

    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String> {
        self.shared.enter(&self.name, StoreOperation::CreateIndex)?;
        if keys.is_empty() {
            return Err(StoreError::operation(
                &self.name,
                "createIndex",
                "index key document is empty",
            ));
        }
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| default_index_name(keys));

        let mut indexes = self.indexes.lock();
        if let Some(existing) = indexes.iter().find(|i| i.name == name) {
            if existing.keys != *keys {
                return Err(StoreError::operation(
                    &self.name,
                    "createIndex",
                    format!("an index named '{}' exists with different keys", name),
                ));
            }
            return Ok(name);
        }
        indexes.push(IndexInfo {
            name: name.clone(),
            keys: keys.clone(),
            options: IndexOptions {
                name: Some(name.clone()),
                ..options.clone()
            },
        });
        Ok(name)
    }

    fn drop_indexes(&self) -> StoreResult<()> {
        self.shared.enter(&self.name, StoreOperation::DropIndexes)?;
        self.indexes.lock().clear();
        Ok(())
    }

    fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        self.shared.enter(&self.name, StoreOperation::ListIndexes)?;
        Ok(self.indexes.lock().clone())
    }
}

// ============================================================================
// Document helpers
// ============================================================================

fn with_id(document: Document) -> Document {
    if document.contains_key(ID_KEY) {
        document
    } else {
        prepend_id(document, Bson::ObjectId(ObjectId::new()))
    }
}

fn prepend_id(document: Document, id: Bson) -> Document {
    let mut out = Document::new();
    out.insert(ID_KEY, id);
    for (key, value) in document {
        if key != ID_KEY {
            out.insert(key, value);
        }
    }
    out
}

fn is_operator_doc(value: &Bson) -> bool {
    match value {
        Bson::Document(d) => d.keys().next().is_some_and(|k| k.starts_with('$')),
        _ => false,
    }
}

fn lookup_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = match current {
            Bson::Document(d) => d.get(part)?,
            Bson::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

fn unset_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(child)) = document.get_mut(head) {
                unset_path(child, rest);
            }
        }
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Double(v) => Some(*v),
        _ => None,
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn value_matches(stored: Option<&Bson>, expected: &Bson) -> bool {
    if let Bson::Document(op) = expected {
        if let Some(Bson::Array(candidates)) = op.get("$in") {
            return candidates.iter().any(|c| value_matches(stored, c));
        }
    }
    match stored {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| value_matches(lookup_path(document, path), expected))
}

fn increment(collection: &str, current: Option<&Bson>, by: &Bson) -> StoreResult<Bson> {
    let invalid = || StoreError::operation(collection, "update", format!("cannot $inc by {}", by));
    let result = match (current, by) {
        (None, by) if as_f64(by).is_some() => by.clone(),
        (Some(Bson::Int32(a)), Bson::Int32(b)) => Bson::Int32(a.wrapping_add(*b)),
        (Some(Bson::Int64(a)), Bson::Int32(b)) => Bson::Int64(a.wrapping_add(i64::from(*b))),
        (Some(Bson::Int32(a)), Bson::Int64(b)) => Bson::Int64(i64::from(*a).wrapping_add(*b)),
        (Some(Bson::Int64(a)), Bson::Int64(b)) => Bson::Int64(a.wrapping_add(*b)),
        (Some(a), b) => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => return Err(invalid()),
        },
        _ => return Err(invalid()),
    };
    Ok(result)
}

fn apply_update(collection: &str, document: &mut Document, update: &Document) -> StoreResult<()> {
    for (operator, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(StoreError::operation(
                collection,
                "update",
                format!("operator {} expects a document", operator),
            ));
        };
        match operator.as_str() {
            "$set" => {
                for (path, value) in fields {
                    set_path(document, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in fields {
                    unset_path(document, path);
                }
            }
            "$inc" => {
                for (path, by) in fields {
                    let next = increment(collection, lookup_path(document, path), by)?;
                    set_path(document, path, next);
                }
            }
            other => {
                return Err(StoreError::operation(
                    collection,
                    "update",
                    format!("unsupported update operator '{}'", other),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    // ========================================================================
    // CRUD
    // ========================================================================

    #[test]
    fn test_insert_assigns_object_id_first() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        let id = users.insert_one(doc! { "name": "ann" }).unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));

        let stored = store.documents("users");
        assert_eq!(stored[0].keys().next().map(String::as_str), Some(ID_KEY));
    }

    #[test]
    fn test_find_with_dotted_path_and_in() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        users
            .insert_one(doc! { "name": "ann", "address": { "city": "Oslo" } })
            .unwrap();
        users
            .insert_one(doc! { "name": "bob", "address": { "city": "Rome" } })
            .unwrap();

        let found = users.find(&doc! { "address.city": "Rome" }).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").unwrap(), "bob");

        let found = users
            .find(&doc! { "name": { "$in": ["ann", "bob"] } })
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn test_numeric_filter_ignores_width() {
        let store = MemoryStore::new();
        let items = store.collection("items");
        items.insert_one(doc! { "_id": 5_i64 }).unwrap();
        assert_eq!(items.count_documents(&doc! { "_id": 5_i32 }).unwrap(), 1);
    }

    #[test]
    fn test_replace_upsert_keeps_filter_id() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        let outcome = users
            .replace_one(&doc! { "_id": "ann" }, doc! { "age": 30 }, true)
            .unwrap();
        assert_eq!(outcome.upserted_id, Some(Bson::String("ann".into())));

        let outcome = users
            .replace_one(&doc! { "_id": "ann" }, doc! { "age": 31 }, true)
            .unwrap();
        assert_eq!(outcome.matched, 1);
        assert_eq!(outcome.modified, 1);
        let doc = users.find_one(&doc! { "_id": "ann" }).unwrap().unwrap();
        assert_eq!(doc.get_i32("age").unwrap(), 31);
    }

    #[test]
    fn test_update_operators() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        users
            .insert_one(doc! { "_id": 1, "visits": 1, "tmp": true })
            .unwrap();
        users
            .update_one(
                &doc! { "_id": 1 },
                &doc! { "$inc": { "visits": 2 }, "$unset": { "tmp": "" }, "$set": { "a.b": 1 } },
                false,
            )
            .unwrap();
        let doc = users.find_one(&doc! { "_id": 1 }).unwrap().unwrap();
        assert_eq!(doc.get_i32("visits").unwrap(), 3);
        assert!(!doc.contains_key("tmp"));
        assert_eq!(doc.get_document("a").unwrap().get_i32("b").unwrap(), 1);
    }

    #[test]
    fn test_find_one_and_update_upserts_counter() {
        let store = MemoryStore::new();
        let counters = store.collection("_counters");
        let filter = doc! { "_id": "users" };
        let update = doc! { "$inc": { "seq": 1_i64 } };

        let first = counters
            .find_one_and_update(&filter, &update, true)
            .unwrap()
            .unwrap();
        assert_eq!(first.get_i64("seq").unwrap(), 1);
        let second = counters
            .find_one_and_update(&filter, &update, true)
            .unwrap()
            .unwrap();
        assert_eq!(second.get_i64("seq").unwrap(), 2);
    }

    #[test]
    fn test_delete_and_count() {
        let store = MemoryStore::new();
        let items = store.collection("items");
        for n in 0..4 {
            items.insert_one(doc! { "n": n % 2 }).unwrap();
        }
        assert_eq!(items.delete_many(&doc! { "n": 0 }).unwrap(), 2);
        assert_eq!(items.delete_one(&doc! { "n": 1 }).unwrap(), 1);
        assert_eq!(items.count_documents(&Document::new()).unwrap(), 1);
    }

    // ========================================================================
    // Indexes and failures
    // ========================================================================

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        let options = IndexOptions {
            unique: true,
            ..Default::default()
        };
        let name = users.create_index(&doc! { "email": 1 }, &options).unwrap();
        assert_eq!(name, "email_1");

        users.insert_one(doc! { "email": "a@x" }).unwrap();
        let err = users.insert_one(doc! { "email": "a@x" }).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        users.insert_one(doc! { "_id": "ann" }).unwrap();
        assert!(users.insert_one(doc! { "_id": "ann" }).is_err());
    }

    #[test]
    fn test_drop_indexes_clears_list() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        users
            .create_index(&doc! { "email": 1 }, &IndexOptions::default())
            .unwrap();
        assert_eq!(users.list_indexes().unwrap().len(), 1);
        users.drop_indexes().unwrap();
        assert!(users.list_indexes().unwrap().is_empty());
    }

    #[test]
    fn test_failure_injection_and_counts() {
        let store = MemoryStore::new();
        let users = store.collection("users");
        store.fail_on(StoreOperation::CreateIndex);

        let err = users
            .create_index(&doc! { "email": 1 }, &IndexOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("injected failure"));
        assert_eq!(store.call_count(StoreOperation::CreateIndex), 1);

        store.clear_failures();
        assert!(
            users
                .create_index(&doc! { "email": 1 }, &IndexOptions::default())
                .is_ok()
        );
        assert_eq!(store.call_count(StoreOperation::CreateIndex), 2);
    }
}
