//! Mapping tests.
//!
//! Converts entities to documents and back through the datastore's chains:
//! key naming, sparse encoding, enums by name, embedded sequences, and the
//! handling of malformed stored values.

mod common;

use std::sync::Arc;

use bson::{Bson, doc};
use helios_odm::config::OdmConfig;
use helios_odm::error::MappingError;
use helios_odm::mapping::Deserializer;

use common::*;

fn deserializer(ctx: &TestContext) -> Deserializer {
    Deserializer::builder()
        .with_registry(Arc::clone(ctx.datastore.registry()))
        .skip_invalid_elements(false)
        .build()
}

// ============================================================================
// Serialization Tests
// ============================================================================

#[test]
fn test_order_document_layout() {
    let ctx = create_context();
    let order = sample_order();

    let document = ctx.datastore.serializer().to_document(&order).unwrap();

    assert_eq!(document.get_i64("_id").unwrap(), 1);
    assert_eq!(document.get_i64("orderNumber").unwrap(), 1);
    assert_eq!(document.get_str("status").unwrap(), "SHIPPED");
    assert_eq!(
        document.get_array("history").unwrap(),
        &vec![Bson::from("OPEN"), Bson::from("SHIPPED")]
    );
    assert_eq!(document.get_i64("totalCents").unwrap(), 2100);
    assert!(document.get_bool("express").unwrap());

    let lines = document.get_array("lines").unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(
        lines[0],
        Bson::Document(doc! { "sku": "A-1", "quantity": 2, "price": 4.5 })
    );
}

#[test]
fn test_absent_values_are_omitted() {
    let ctx = create_context();
    let order = sample_order();

    let document = ctx.datastore.serializer().to_document(&order).unwrap();

    assert!(!document.contains_key("notes"));
    assert!(!document.contains_key("giftWrap"));
    assert!(document.values().all(|value| *value != Bson::Null));
}

#[test]
fn test_renamed_variant_is_stored_by_its_name() {
    let ctx = create_context();
    let mut order = sample_order();
    order.status = OrderStatus::Canceled;

    let document = ctx.datastore.serializer().to_document(&order).unwrap();

    assert_eq!(document.get_str("status").unwrap(), "CANCELLED");
}

#[test]
fn test_dispatch_is_deterministic() {
    let first = create_context();
    let second = create_context();
    let order = sample_order();

    let a = first.datastore.serializer().to_document(&order).unwrap();
    let b = second.datastore.serializer().to_document(&order).unwrap();

    assert_eq!(a, b);
    assert_eq!(
        first.datastore.serializer().strategy_names(),
        second.datastore.serializer().strategy_names()
    );
}

// ============================================================================
// Round Trip Tests
// ============================================================================

#[test]
fn test_order_round_trip() {
    let ctx = create_context();
    let mut order = sample_order();
    order.notes = Some("leave at the door".to_string());
    order.gift_wrap = Some(LineItem {
        sku: "WRAP".to_string(),
        quantity: 1,
        price: 1.5,
    });

    let document = ctx.datastore.serializer().to_document(&order).unwrap();
    let decoded: Order = deserializer(&ctx).from_document(&document).unwrap();

    order.id = Some(1);
    order.order_number = 1;
    assert_eq!(decoded, order);
}

#[test]
fn test_missing_keys_keep_defaults() {
    let ctx = create_context();

    let decoded: Order = deserializer(&ctx)
        .from_document(&doc! { "_id": 9_i64, "status": "OPEN" })
        .unwrap();

    assert_eq!(decoded.id, Some(9));
    assert!(decoded.lines.is_empty());
    assert_eq!(decoded.notes, None);
    assert_eq!(decoded.total_cents, 0);
}

#[test]
fn test_numbers_are_widened_and_narrowed() {
    let ctx = create_context();

    let decoded: Order = deserializer(&ctx)
        .from_document(&doc! {
            "_id": 3_i32,
            "totalCents": 1500_i32,
            "lines": [ { "sku": "C-2", "quantity": 4_i64, "price": 3_i32 } ],
        })
        .unwrap();

    assert_eq!(decoded.id, Some(3));
    assert_eq!(decoded.total_cents, 1500);
    assert_eq!(decoded.lines[0].quantity, 4);
    assert_eq!(decoded.lines[0].price, 3.0);
}

// ============================================================================
// Malformed Document Tests
// ============================================================================

#[test]
fn test_unknown_enum_name_fails() {
    let ctx = create_context();

    let err = deserializer(&ctx)
        .from_document::<Order>(&doc! { "status": "LOST" })
        .unwrap_err();

    assert!(matches!(
        err,
        MappingError::UnknownEnumValue { ref value, .. } if value == "LOST"
    ));
}

#[test]
fn test_null_for_primitive_fails() {
    let ctx = create_context();

    let err = deserializer(&ctx)
        .from_document::<Order>(&doc! { "express": Bson::Null })
        .unwrap_err();

    assert!(matches!(err, MappingError::NullToPrimitive { .. }));
}

#[test]
fn test_invalid_elements_fail_when_not_skipped() {
    let ctx = create_context();

    let err = deserializer(&ctx)
        .from_document::<Order>(&doc! { "history": ["OPEN", 7_i32] })
        .unwrap_err();

    assert!(matches!(err, MappingError::TypeMismatch { .. }));
}

#[test]
fn test_invalid_sub_documents_dropped_when_skipped() {
    let mut config = OdmConfig::for_testing();
    config.skip_invalid_elements = true;
    let ctx = create_context_with(config);
    let deserializer = Deserializer::builder()
        .with_registry(Arc::clone(ctx.datastore.registry()))
        .skip_invalid_elements(ctx.datastore.config().skip_invalid_elements)
        .build();

    let decoded: Order = deserializer
        .from_document(&doc! {
            "lines": [
                { "sku": "A-1", "quantity": "many" },
                { "sku": "B-7", "quantity": 1 },
            ],
        })
        .unwrap();

    assert_eq!(decoded.lines.len(), 1);
    assert_eq!(decoded.lines[0].sku, "B-7");
}

#[test]
fn test_skipping_never_drops_scalar_elements() {
    let mut config = OdmConfig::for_testing();
    config.skip_invalid_elements = true;
    let ctx = create_context_with(config);
    let deserializer = Deserializer::builder()
        .with_registry(Arc::clone(ctx.datastore.registry()))
        .skip_invalid_elements(true)
        .build();

    let result = deserializer.from_document::<Order>(&doc! { "history": ["OPEN", 7_i32] });

    assert!(result.is_err());
}
