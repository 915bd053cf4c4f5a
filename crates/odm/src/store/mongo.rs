//! MongoDB adapter over the driver's synchronous API.

use std::sync::Arc;

use bson::{Bson, Document};
use mongodb::IndexModel;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions as DriverIndexOptions, ReturnDocument};
use mongodb::sync::{Client, Collection, Database};

use crate::error::{StoreError, StoreResult};
use crate::metadata::IndexOptions;

use super::{CollectionHandle, DocumentStore, IndexInfo, UpdateOutcome};

const DUPLICATE_KEY_CODE: i32 = 11000;
const ID_INDEX_NAME: &str = "_id_";

/// A [`DocumentStore`] backed by one MongoDB database.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Connects to `uri` and uses `database`.
    pub fn connect(uri: &str, database: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).map_err(|e| StoreError::Unavailable {
            message: format!("failed to connect to {}: {}", uri, e),
        })?;
        Ok(Self::new(client, database))
    }

    /// Wraps an existing client.
    pub fn new(client: Client, database: &str) -> Self {
        let database = client.database(database);
        tracing::debug!("Using MongoDB database {}", database.name());
        Self { client, database }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}

impl DocumentStore for MongoStore {
    fn backend_name(&self) -> &'static str {
        "mongodb"
    }

    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle> {
        Arc::new(MongoCollection {
            name: name.to_string(),
            inner: self.database.collection::<Document>(name),
        })
    }
}

struct MongoCollection {
    name: String,
    inner: Collection<Document>,
}

impl MongoCollection {
    fn convert(&self, operation: &str, err: mongodb::error::Error) -> StoreError {
        if let ErrorKind::Write(WriteFailure::WriteError(write)) = err.kind.as_ref() {
            if write.code == DUPLICATE_KEY_CODE {
                return StoreError::DuplicateKey {
                    collection: self.name.clone(),
                    key: write.message.clone(),
                };
            }
        }
        StoreError::operation(&self.name, operation, err.to_string())
    }
}

fn outcome(result: mongodb::results::UpdateResult) -> UpdateOutcome {
    UpdateOutcome {
        matched: result.matched_count,
        modified: result.modified_count,
        upserted_id: result.upserted_id,
    }
}

impl CollectionHandle for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find(&self, filter: &Document) -> StoreResult<Vec<Document>> {
        let cursor = self
            .inner
            .find(filter.clone())
            .run()
            .map_err(|e| self.convert("find", e))?;
        cursor
            .map(|doc| doc.map_err(|e| self.convert("find", e)))
            .collect()
    }

    fn find_one(&self, filter: &Document) -> StoreResult<Option<Document>> {
        self.inner
            .find_one(filter.clone())
            .run()
            .map_err(|e| self.convert("find", e))
    }

    fn insert_one(&self, document: Document) -> StoreResult<Bson> {
        let result = self
            .inner
            .insert_one(document)
            .run()
            .map_err(|e| self.convert("insert", e))?;
        Ok(result.inserted_id)
    }

    fn replace_one(
        &self,
        filter: &Document,
        replacement: Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.inner
            .replace_one(filter.clone(), replacement)
            .upsert(upsert)
            .run()
            .map(outcome)
            .map_err(|e| self.convert("replace", e))
    }

    fn update_one(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.inner
            .update_one(filter.clone(), update.clone())
            .upsert(upsert)
            .run()
            .map(outcome)
            .map_err(|e| self.convert("update", e))
    }

    fn update_many(&self, filter: &Document, update: &Document) -> StoreResult<UpdateOutcome> {
        self.inner
            .update_many(filter.clone(), update.clone())
            .run()
            .map(outcome)
            .map_err(|e| self.convert("update", e))
    }

    fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<Option<Document>> {
        self.inner
            .find_one_and_update(filter.clone(), update.clone())
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .run()
            .map_err(|e| self.convert("findAndModify", e))
    }

    fn delete_one(&self, filter: &Document) -> StoreResult<u64> {
        self.inner
            .delete_one(filter.clone())
            .run()
            .map(|result| result.deleted_count)
            .map_err(|e| self.convert("delete", e))
    }

    fn delete_many(&self, filter: &Document) -> StoreResult<u64> {
        self.inner
            .delete_many(filter.clone())
            .run()
            .map(|result| result.deleted_count)
            .map_err(|e| self.convert("delete", e))
    }

    fn count_documents(&self, filter: &Document) -> StoreResult<u64> {
        self.inner
            .count_documents(filter.clone())
            .run()
            .map_err(|e| self.convert("count", e))
    }

    fn create_index(&self, keys: &Document, options: &IndexOptions) -> StoreResult<String> {
        if options.drop_dups {
            tracing::debug!(
                "Ignoring drop_dups on {}; the server no longer supports it",
                self.name
            );
        }
        let mut driver_options = DriverIndexOptions::default();
        driver_options.name = options.name.clone();
        driver_options.unique = options.unique.then_some(true);
        driver_options.sparse = options.sparse.then_some(true);
        driver_options.background = options.background.then_some(true);

        let model = IndexModel::builder()
            .keys(keys.clone())
            .options(driver_options)
            .build();
        self.inner
            .create_index(model)
            .run()
            .map(|result| result.index_name)
            .map_err(|e| self.convert("createIndex", e))
    }

    fn drop_indexes(&self) -> StoreResult<()> {
        self.inner
            .drop_indexes()
            .run()
            .map_err(|e| self.convert("dropIndexes", e))
    }

    fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>> {
        let cursor = self
            .inner
            .list_indexes()
            .run()
            .map_err(|e| self.convert("listIndexes", e))?;
        let mut indexes = Vec::new();
        for model in cursor {
            let model = model.map_err(|e| self.convert("listIndexes", e))?;
            let driver_options = model.options.unwrap_or_default();
            let name = driver_options.name.clone().unwrap_or_default();
            if name == ID_INDEX_NAME {
                continue;
            }
            indexes.push(IndexInfo {
                name: name.clone(),
                keys: model.keys,
                options: IndexOptions {
                    name: Some(name),
                    unique: driver_options.unique.unwrap_or(false),
                    sparse: driver_options.sparse.unwrap_or(false),
                    background: driver_options.background.unwrap_or(false),
                    drop_dups: false,
                },
            });
        }
        Ok(indexes)
    }
}
