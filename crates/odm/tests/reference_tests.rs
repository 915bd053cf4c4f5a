//! Reference tests.
//!
//! Covers how references are stored as identifiers, cascaded on save, and
//! resolved on load under each load strategy, including reference cycles.

mod common;

use bson::{Bson, doc};
use helios_odm::{Entity, Ref};
use helios_odm::config::OdmConfig;
use helios_odm::error::MappingError;
use helios_odm::reference::{CascadeStrategy, LoadStrategy};
use helios_odm::store::{DocumentStore, StoreOperation};

use common::*;

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "tags")]
struct Tag {
    #[odm(id(auto_increment))]
    id: Option<i64>,
    label: String,
}

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "posts")]
struct Post {
    #[odm(id)]
    id: i64,
    #[odm(reference)]
    tag: Option<Ref<Tag>>,
    #[odm(reference)]
    related: Vec<Ref<Tag>>,
}

fn context(load: LoadStrategy, cascade: CascadeStrategy) -> TestContext {
    let mut config = OdmConfig::for_testing();
    config.load_strategy = load;
    config.cascade_strategy = cascade;
    create_context_with(config)
}

fn department_with_head() -> Department {
    Department {
        id: 1,
        name: "Research".to_string(),
        head: Some(Ref::loaded(Employee {
            id: 10,
            name: "Hopper".to_string(),
            department: Some(Ref::id(1_i64)),
        })),
    }
}

// ============================================================================
// Save Tests
// ============================================================================

#[test]
fn test_reference_without_id_is_fatal() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(None))));

    let err = ctx.datastore.save(&mut user).unwrap_err();

    assert!(matches!(
        err,
        MappingError::MissingIdentifier { ref type_name, .. } if type_name == "Address"
    ));
    assert!(ctx.documents("users").is_empty());
    assert!(ctx.documents("addresses").is_empty());
}

#[test]
fn test_reference_stored_as_id_and_cascaded() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));

    ctx.datastore.save(&mut user).unwrap();

    let users = ctx.documents("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get_str("_id").unwrap(), "grace");
    assert_eq!(users[0].get("address"), Some(&Bson::Int64(7)));

    let addresses = ctx.documents("addresses");
    assert_eq!(addresses.len(), 1);
    assert_eq!(
        addresses[0],
        doc! { "_id": 7_i64, "street": "12 Harbour Row", "city": "Portsmouth" }
    );
}

#[test]
fn test_raw_id_reference_is_not_cascaded() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::id(7_i64)));

    ctx.datastore.save(&mut user).unwrap();

    assert_eq!(ctx.documents("users")[0].get("address"), Some(&Bson::Int64(7)));
    assert!(ctx.documents("addresses").is_empty());
}

#[test]
fn test_no_cascade_stores_only_the_owner() {
    let ctx = context(LoadStrategy::Eager, CascadeStrategy::NoCascade);
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));

    ctx.datastore.save(&mut user).unwrap();

    assert_eq!(ctx.documents("users").len(), 1);
    assert!(ctx.documents("addresses").is_empty());
}

#[test]
fn test_cascade_direct_stops_at_first_level() {
    let ctx = context(LoadStrategy::Eager, CascadeStrategy::CascadeDirect);
    let mut employee = Employee {
        id: 10,
        name: "Hopper".to_string(),
        department: Some(Ref::loaded(Department {
            id: 1,
            name: "Research".to_string(),
            head: Some(Ref::loaded(Employee {
                id: 11,
                name: "Lovelace".to_string(),
                department: None,
            })),
        })),
    };

    ctx.datastore.save(&mut employee).unwrap();

    assert_eq!(ctx.documents("departments").len(), 1);
    assert_eq!(ctx.documents("employees").len(), 1);
}

#[test]
fn test_cycle_is_saved_once() {
    let ctx = create_context();
    let mut department = department_with_head();

    ctx.datastore.save(&mut department).unwrap();

    assert_eq!(ctx.documents("departments").len(), 1);
    let employees = ctx.documents("employees");
    assert_eq!(employees.len(), 1);
    assert_eq!(employees[0].get("department"), Some(&Bson::Int64(1)));
}

#[test]
fn test_cascaded_generated_id_is_stored_in_owner() {
    let ctx = create_context();
    let tag = Tag {
        id: Some(42),
        label: "rust".to_string(),
    };
    let mut post = Post {
        id: 1,
        tag: Some(Ref::loaded(tag.clone())),
        related: vec![Ref::loaded(tag)],
    };

    ctx.datastore.save(&mut post).unwrap();

    let tags = ctx.documents("tags");
    assert_eq!(tags.len(), 1);
    let tag_id = tags[0].get("_id").cloned().unwrap();
    assert_eq!(tag_id, Bson::Int64(1));

    let posts = ctx.documents("posts");
    assert_eq!(posts[0].get("tag"), Some(&tag_id));
    assert_eq!(posts[0].get_array("related").unwrap(), &vec![tag_id]);

    let in_memory = post.tag.as_ref().and_then(Ref::as_loaded).unwrap();
    assert_eq!(in_memory.id, Some(1));
    assert_eq!(post.related[0].as_loaded().unwrap().id, Some(1));
}

#[test]
fn test_cascaded_generated_id_resolves_on_load() {
    let ctx = create_context();
    let mut post = Post {
        id: 1,
        tag: Some(Ref::loaded(Tag {
            id: Some(42),
            label: "rust".to_string(),
        })),
        related: Vec::new(),
    };
    ctx.datastore.save(&mut post).unwrap();
    ctx.datastore.clear_cache();

    let loaded: Post = ctx.datastore.find_by_id(1_i64).unwrap().unwrap();

    let tag = loaded.tag.and_then(Ref::into_loaded).unwrap();
    assert_eq!(tag.id, Some(1));
    assert_eq!(tag.label, "rust");
}

// ============================================================================
// Load Tests
// ============================================================================

#[test]
fn test_eager_load_yields_loaded_reference() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));
    ctx.datastore.save(&mut user).unwrap();
    ctx.datastore.clear_cache();

    let loaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();

    let address = loaded.address.and_then(Ref::into_loaded).unwrap();
    assert_eq!(address.id, Some(7));
    assert_eq!(address.street, "12 Harbour Row");
}

#[test]
fn test_lazy_load_keeps_identifier() {
    let ctx = context(LoadStrategy::Lazy, CascadeStrategy::CascadeAll);
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));
    ctx.datastore.save(&mut user).unwrap();

    let loaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();

    let reference = loaded.address.unwrap();
    assert!(!reference.is_loaded());
    assert_eq!(reference.raw_id(), Some(&Bson::Int64(7)));
}

#[test]
fn test_eager_load_terminates_on_cycle() {
    let ctx = create_context();
    let mut department = department_with_head();
    ctx.datastore.save(&mut department).unwrap();

    let loaded: Department = ctx.datastore.find_by_id(1_i64).unwrap().unwrap();

    let head = loaded.head.and_then(Ref::into_loaded).unwrap();
    assert_eq!(head.name, "Hopper");
    let back = head.department.unwrap();
    assert!(!back.is_loaded());
    assert_eq!(back.raw_id(), Some(&Bson::Int64(1)));
}

#[test]
fn test_eager_direct_resolves_one_level() {
    let ctx = context(LoadStrategy::EagerDirect, CascadeStrategy::CascadeAll);
    let mut employee = Employee {
        id: 10,
        name: "Hopper".to_string(),
        department: Some(Ref::loaded(Department {
            id: 1,
            name: "Research".to_string(),
            head: Some(Ref::loaded(Employee {
                id: 11,
                name: "Lovelace".to_string(),
                department: None,
            })),
        })),
    };
    ctx.datastore.save(&mut employee).unwrap();

    let loaded: Employee = ctx.datastore.find_by_id(10_i64).unwrap().unwrap();

    let department = loaded.department.and_then(Ref::into_loaded).unwrap();
    assert_eq!(department.name, "Research");
    let head = department.head.unwrap();
    assert!(!head.is_loaded());
    assert_eq!(head.raw_id(), Some(&Bson::Int64(11)));
}

#[test]
fn test_dangling_reference_keeps_identifier() {
    let ctx = create_context();
    ctx.store
        .collection("users")
        .insert_one(doc! { "_id": "grace", "email": "grace@example.com", "address": 99_i64 })
        .unwrap();

    let loaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();

    assert_eq!(loaded.address.unwrap().raw_id(), Some(&Bson::Int64(99)));
}

#[test]
fn test_resolved_targets_are_cached() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));
    ctx.datastore.save(&mut user).unwrap();
    ctx.store.reset_call_counts();

    let _: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();
    let _: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();

    // two owner lookups, one target lookup
    assert_eq!(ctx.store.call_count(StoreOperation::Find), 3);
}
