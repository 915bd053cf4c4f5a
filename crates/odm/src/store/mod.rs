//! Document store interface.
//!
//! The mapping engine talks to the database exclusively through the
//! [`DocumentStore`] and [`CollectionHandle`] traits defined here. Two
//! implementations ship with the crate:
//!
//! - [`MemoryStore`] - an in-process store for tests and embedded use
//! - `MongoStore` - an adapter over the official driver's synchronous API
//!   (requires the `mongodb` feature)

mod memory;
#[cfg(feature = "mongodb")]
mod mongo;

use std::sync::Arc;

use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::metadata::IndexOptions;

pub use memory::{MemoryStore, StoreOperation};
#[cfg(feature = "mongodb")]
pub use mongo::MongoStore;

/// Result of a replace or update call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Number of documents matching the filter.
    pub matched: u64,
    /// Number of documents changed.
    pub modified: u64,
    /// Identifier of the document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Description of an existing index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Key document, field to direction-or-type.
    pub keys: Document,
    /// Index options.
    pub options: IndexOptions,
}

/// Handle to one collection of a document store.
///
/// All operations are synchronous and take filters as equality documents.
/// Update documents use the `$set`, `$unset`, and `$inc` operators.
///
/// # Errors
///
/// Every operation reports store failures as [`StoreError`](crate::error::StoreError);
/// the mapping layer wraps them into [`MappingError`](crate::error::MappingError).
pub trait CollectionHandle: Send + Sync {
    /// Returns the collection name.
    fn name(&self) -> &str;

    /// Returns every document matching the filter, in insertion order.
    fn find(&self, filter: &Document) -> StoreResult<Vec<Document>>;

    /// Returns the first document matching the filter.
    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        Ok(self.find(filter)?.into_iter().next())
    }

    /// Inserts a document and returns its `_id`, assigning one if absent.
    fn insert_one(&self, document: Document) -> StoreResult<Bson>;

    /// Replaces the first document matching the filter.
    fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Applies an update document to the first matching document.
    fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Applies an update document to every matching document.
    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<UpdateOutcome>;

    /// Atomically applies an update to the first matching document (inserting
    /// one if `upsert` is set) and returns the document after the update.
    fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>>;

    /// Deletes the first matching document; returns the number deleted.
    fn delete_one(&self, filter: &Document) -> StoreResult<u64>;

    /// Deletes every matching document; returns the number deleted.
    fn delete_many(&self, filter: &Document) -> StoreResult<u64>;

    /// Counts the matching documents.
    fn count_documents(&self, filter: &Document) -> StoreResult<u64>;

    /// Creates an index and returns its name.
    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String>;

    /// Drops every index except the one on `_id`.
    fn drop_indexes(&self) -> StoreResult<()>;

    /// Lists the indexes of the collection, `_id` index excluded.
    fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>>;
}

/// A document database holding named collections.
pub trait DocumentStore: Send + Sync {
    /// Returns a human-readable name for this store.
    fn backend_name(&self) -> &'static str;

    /// Returns the handle of a collection, creating it lazily.
    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle>;
}

/// Returns the conventional index name for a key document, e.g. `email_1`.
pub fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, kind)| match kind {
            Bson::Int32(v) => format!("{}_{}", field, v),
            Bson::Int64(v) => format!("{}_{}", field, v),
            Bson::String(s) => format!("{}_{}", field, s),
            other => format!("{}_{}", field, other),
        })
        .collect::<Vec<_>>()
        .join("_")
}
