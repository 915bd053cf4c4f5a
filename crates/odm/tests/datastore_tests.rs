//! Datastore tests.
//!
//! End-to-end save, load, query, and delete through a datastore backed by
//! the in-memory store, including lifecycle trigger ordering.

mod common;

use bson::{Bson, doc};
use helios_odm::error::MappingError;
use helios_odm::store::StoreOperation;
use helios_odm::{Entity, Ref};

use common::*;

#[derive(Debug, Clone, Default, Entity)]
#[odm(
    collection = "journals",
    trigger(action = "insert", phase = "pre", method = "before_insert"),
    trigger(action = "insert", phase = "post", method = "after_insert"),
    trigger(action = "update", phase = "pre", method = "before_update"),
    trigger(action = "update", phase = "post", method = "after_update"),
    trigger(action = "delete", phase = "pre", method = "before_delete"),
    trigger(action = "delete", phase = "post", method = "after_delete"),
    trigger(action = "load", phase = "pre", method = "before_load"),
    trigger(action = "load", phase = "post", method = "after_load")
)]
struct Journal {
    #[odm(id)]
    id: i64,
    title: String,
    #[odm(skip)]
    events: Vec<String>,
}

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "drafts")]
struct Draft {
    #[odm(id)]
    id: Option<String>,
    body: String,
}

impl Journal {
    fn record(&mut self, event: &str) {
        self.events.push(event.to_string());
    }

    fn before_insert(&mut self) {
        self.record("insert:pre");
    }

    fn after_insert(&mut self) {
        self.record("insert:post");
    }

    fn before_update(&mut self) {
        self.record("update:pre");
    }

    fn after_update(&mut self) {
        self.record("update:post");
    }

    fn before_delete(&mut self) {
        self.record("delete:pre");
    }

    fn after_delete(&mut self) {
        self.record("delete:post");
    }

    fn before_load(&mut self) {
        // fields are not populated yet
        let title = if self.title.is_empty() { "empty" } else { "populated" };
        self.record(&format!("load:pre:{}", title));
    }

    fn after_load(&mut self) {
        let title = if self.title.is_empty() { "empty" } else { "populated" };
        self.record(&format!("load:post:{}", title));
    }
}

// ============================================================================
// Save and Load Tests
// ============================================================================

#[test]
fn test_user_round_trip() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));

    let id = ctx.datastore.save(&mut user).unwrap();
    assert_eq!(id, Bson::String("grace".to_string()));

    let loaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();
    assert_eq!(loaded.username, user.username);
    assert_eq!(loaded.email, user.email);
    assert_eq!(
        loaded.address.and_then(Ref::into_loaded),
        Some(address(Some(7)))
    );
}

#[test]
fn test_missing_entity_is_none() {
    let ctx = create_context();

    let loaded = ctx.datastore.find_by_id::<User>("nobody").unwrap();

    assert!(loaded.is_none());
}

#[test]
fn test_save_existing_replaces_document() {
    let ctx = create_context();
    let mut user = user_with(None);
    ctx.datastore.save(&mut user).unwrap();

    user.email = "grace@navy.example".to_string();
    ctx.datastore.save(&mut user).unwrap();

    let users = ctx.documents("users");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].get_str("email").unwrap(), "grace@navy.example");
    assert!(!users[0].contains_key("address"));
}

#[test]
fn test_updated_reference_is_recascaded() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));
    ctx.datastore.save(&mut user).unwrap();

    let mut loaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();
    if let Some(address) = loaded.address.as_mut().and_then(Ref::as_loaded_mut) {
        address.street = "1 Dock Lane".to_string();
    }
    ctx.datastore.save(&mut loaded).unwrap();

    let reloaded: User = ctx.datastore.find_by_id("grace").unwrap().unwrap();
    let address = reloaded.address.and_then(Ref::into_loaded).unwrap();
    assert_eq!(address.street, "1 Dock Lane");
}

#[test]
fn test_store_assigned_id_in_string_field_replaces_on_resave() {
    let ctx = create_context();
    let mut draft = Draft {
        id: None,
        body: "first".to_string(),
    };

    let id = ctx.datastore.save(&mut draft).unwrap();
    let oid = id.as_object_id().unwrap();
    assert_eq!(draft.id.as_deref(), Some(oid.to_hex().as_str()));

    draft.body = "second".to_string();
    let again = ctx.datastore.save(&mut draft).unwrap();

    assert_eq!(again, Bson::ObjectId(oid));
    let drafts = ctx.documents("drafts");
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].get_object_id("_id").unwrap(), oid);
    assert_eq!(drafts[0].get_str("body").unwrap(), "second");

    let loaded: Draft = ctx.datastore.find_by_id(oid.to_hex()).unwrap().unwrap();
    assert_eq!(loaded.body, "second");
    assert_eq!(loaded.id, draft.id);

    assert!(ctx.datastore.delete(&mut draft).unwrap());
    assert!(ctx.documents("drafts").is_empty());
}

// ============================================================================
// Query Tests
// ============================================================================

#[test]
fn test_find_and_count_by_filter() {
    let ctx = create_context();
    for (name, city) in [("ada", "London"), ("grace", "Arlington"), ("alan", "London")] {
        let mut order = Order {
            notes: Some(format!("{} in {}", name, city)),
            total_cents: if city == "London" { 100 } else { 200 },
            ..sample_order()
        };
        ctx.datastore.save(&mut order).unwrap();
    }

    let cheap: Vec<Order> = ctx.datastore.find(doc! { "totalCents": 100_i64 }).unwrap();
    assert_eq!(cheap.len(), 2);
    assert!(cheap.iter().all(|order| order.total_cents == 100));

    assert_eq!(ctx.datastore.count::<Order>(doc! {}).unwrap(), 3);
    assert_eq!(
        ctx.datastore
            .count::<Order>(doc! { "status": "SHIPPED" })
            .unwrap(),
        3
    );
}

// ============================================================================
// Delete Tests
// ============================================================================

#[test]
fn test_delete_removes_only_the_owner() {
    let ctx = create_context();
    let mut user = user_with(Some(Ref::loaded(address(Some(7)))));
    ctx.datastore.save(&mut user).unwrap();

    assert!(ctx.datastore.delete(&mut user).unwrap());
    assert!(!ctx.datastore.delete(&mut user).unwrap());

    assert!(ctx.documents("users").is_empty());
    assert_eq!(ctx.documents("addresses").len(), 1);
}

#[test]
fn test_delete_without_id_fails() {
    let ctx = create_context();
    let mut address = address(None);

    let err = ctx.datastore.delete(&mut address).unwrap_err();

    assert!(matches!(err, MappingError::MissingIdentifier { .. }));
    assert_eq!(ctx.store.call_count(StoreOperation::Delete), 0);
}

// ============================================================================
// Trigger Tests
// ============================================================================

#[test]
fn test_trigger_order_across_lifecycle() {
    let ctx = create_context();
    let mut journal = Journal {
        id: 1,
        title: "Log".to_string(),
        events: Vec::new(),
    };

    ctx.datastore.save(&mut journal).unwrap();
    ctx.datastore.save(&mut journal).unwrap();
    ctx.datastore.delete(&mut journal).unwrap();

    assert_eq!(
        journal.events,
        vec![
            "insert:pre",
            "insert:post",
            "update:pre",
            "update:post",
            "delete:pre",
            "delete:post",
        ]
    );
}

#[test]
fn test_load_triggers_wrap_population() {
    let ctx = create_context();
    let mut journal = Journal {
        id: 2,
        title: "Log".to_string(),
        events: Vec::new(),
    };
    ctx.datastore.save(&mut journal).unwrap();

    let loaded: Journal = ctx.datastore.find_by_id(2_i64).unwrap().unwrap();

    assert_eq!(loaded.events, vec!["load:pre:empty", "load:post:populated"]);
}

#[test]
fn test_failed_save_skips_post_trigger() {
    let ctx = create_context();
    ctx.store.fail_on(StoreOperation::Replace);
    let mut journal = Journal {
        id: 3,
        title: "Log".to_string(),
        events: Vec::new(),
    };

    assert!(ctx.datastore.save(&mut journal).is_err());
    assert_eq!(journal.events, vec!["insert:pre"]);
}
