//! Test harness wiring a datastore over an in-memory store.

use std::sync::Arc;

use helios_odm::config::OdmConfig;
use helios_odm::datastore::Datastore;
use helios_odm::metadata::MetadataRegistry;
use helios_odm::store::{DocumentStore, MemoryStore};
use tracing_subscriber::EnvFilter;

/// A datastore together with the store it writes to.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub datastore: Datastore,
}

impl TestContext {
    /// Documents currently stored in `collection`.
    pub fn documents(&self, collection: &str) -> Vec<bson::Document> {
        self.store.documents(collection)
    }
}

/// Creates a context with the test configuration.
pub fn create_context() -> TestContext {
    create_context_with(OdmConfig::for_testing())
}

/// Creates a context with `config` and a fresh metadata registry.
pub fn create_context_with(config: OdmConfig) -> TestContext {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let datastore = Datastore::with_registry(
        Arc::clone(&store) as Arc<dyn DocumentStore>,
        config,
        Arc::new(MetadataRegistry::new()),
    );
    TestContext { store, datastore }
}

/// Installs a test-writer subscriber honoring `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
