//! Index tests.
//!
//! Verifies the indexes derived from field and compound declarations, the
//! idempotence of ensuring them, and re-issuing after a drop.

mod common;

use bson::doc;
use helios_odm::error::{MappingError, StoreError};
use helios_odm::index::derive_index_specs;
use helios_odm::store::{DocumentStore, StoreOperation};

use common::*;

fn index_names(ctx: &TestContext, collection: &str) -> Vec<String> {
    let mut names: Vec<String> = ctx
        .store
        .collection(collection)
        .list_indexes()
        .unwrap()
        .into_iter()
        .map(|index| index.name)
        .collect();
    names.sort();
    names
}

// ============================================================================
// Derivation Tests
// ============================================================================

#[test]
fn test_place_index_specs() {
    let ctx = create_context();
    let metadata = ctx.datastore.registry().get::<Place>();

    let specs = derive_index_specs(&metadata).unwrap();

    let names: Vec<&str> = specs.iter().map(|spec| spec.name()).collect();
    assert_eq!(
        names,
        vec!["location_2dsphere", "rating_-1", "country_1_name_-1", "by_name"]
    );

    let compound = &specs[2];
    assert!(compound.is_compound());
    assert!(compound.options().unique);
    assert_eq!(compound.keys_document(), doc! { "country": 1, "name": -1 });

    assert!(specs[1].options().sparse);
    assert_eq!(specs[3].keys_document(), doc! { "name": "text" });
}

// ============================================================================
// Ensure Tests
// ============================================================================

#[test]
fn test_ensure_creates_every_index() {
    let ctx = create_context();

    let created = ctx.datastore.ensure_indexes::<Place>().unwrap();

    assert_eq!(created, 4);
    assert_eq!(
        index_names(&ctx, "places"),
        vec!["by_name", "country_1_name_-1", "location_2dsphere", "rating_-1"]
    );
}

#[test]
fn test_ensure_is_idempotent() {
    let ctx = create_context();

    ctx.datastore.ensure_indexes::<Place>().unwrap();
    let again = ctx.datastore.ensure_indexes::<Place>().unwrap();

    assert_eq!(again, 0);
    assert_eq!(ctx.store.call_count(StoreOperation::CreateIndex), 4);
}

#[test]
fn test_drop_allows_reissue() {
    let ctx = create_context();

    ctx.datastore.ensure_indexes::<Place>().unwrap();
    ctx.datastore.drop_indexes::<Place>().unwrap();
    assert!(index_names(&ctx, "places").is_empty());

    let created = ctx.datastore.ensure_indexes::<Place>().unwrap();

    assert_eq!(created, 4);
    assert_eq!(ctx.store.call_count(StoreOperation::CreateIndex), 8);
}

#[test]
fn test_clear_forgets_ensured_types() {
    let ctx = create_context();

    ctx.datastore.ensure_indexes::<Place>().unwrap();
    ctx.datastore.clear_ensured_indexes();
    ctx.datastore.ensure_indexes::<Place>().unwrap();

    assert_eq!(ctx.store.call_count(StoreOperation::CreateIndex), 8);
}

#[test]
fn test_failed_create_is_retried() {
    let ctx = create_context();
    ctx.store.fail_on(StoreOperation::CreateIndex);

    let err = ctx.datastore.ensure_indexes::<Place>().unwrap_err();
    assert!(matches!(err, MappingError::Index { ref operation, .. } if operation == "create"));

    ctx.store.clear_failures();
    assert_eq!(ctx.datastore.ensure_indexes::<Place>().unwrap(), 4);
}

// ============================================================================
// Save Integration Tests
// ============================================================================

#[test]
fn test_save_ensures_indexes_once() {
    let ctx = create_context();

    let mut first = user_with(None);
    ctx.datastore.save(&mut first).unwrap();
    let mut second = User {
        username: "ada".to_string(),
        email: "ada@example.com".to_string(),
        address: None,
    };
    ctx.datastore.save(&mut second).unwrap();

    assert_eq!(ctx.store.call_count(StoreOperation::CreateIndex), 1);
    assert_eq!(index_names(&ctx, "users"), vec!["email_1"]);
}

#[test]
fn test_unique_index_rejects_duplicate() {
    let ctx = create_context();
    let mut first = user_with(None);
    ctx.datastore.save(&mut first).unwrap();

    let mut second = User {
        username: "imposter".to_string(),
        email: first.email.clone(),
        address: None,
    };
    let err = ctx.datastore.save(&mut second).unwrap_err();

    assert!(matches!(
        err,
        MappingError::Store(StoreError::DuplicateKey { .. })
    ));
}

#[test]
fn test_indexes_skipped_when_disabled() {
    let mut config = helios_odm::OdmConfig::for_testing();
    config.ensure_indexes_on_save = false;
    let ctx = create_context_with(config);

    let mut user = user_with(None);
    ctx.datastore.save(&mut user).unwrap();

    assert_eq!(ctx.store.call_count(StoreOperation::CreateIndex), 0);
}
