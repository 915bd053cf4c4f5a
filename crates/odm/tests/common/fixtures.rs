//! Entities shared by the integration tests.

use helios_odm::{Entity, Enumerated, Ref};

// ============================================================================
// Users and addresses
// ============================================================================

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "users")]
pub struct User {
    #[odm(id)]
    pub username: String,
    #[odm(index(unique))]
    pub email: String,
    #[odm(reference)]
    pub address: Option<Ref<Address>>,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[odm(collection = "addresses")]
pub struct Address {
    #[odm(id)]
    pub id: Option<i64>,
    pub street: String,
    pub city: String,
}

pub fn address(id: Option<i64>) -> Address {
    Address {
        id,
        street: "12 Harbour Row".to_string(),
        city: "Portsmouth".to_string(),
    }
}

pub fn user_with(address: Option<Ref<Address>>) -> User {
    User {
        username: "grace".to_string(),
        email: "grace@example.com".to_string(),
        address,
    }
}

// ============================================================================
// Mutually referencing entities
// ============================================================================

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "departments")]
pub struct Department {
    #[odm(id)]
    pub id: i64,
    pub name: String,
    #[odm(reference)]
    pub head: Option<Ref<Employee>>,
}

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "employees")]
pub struct Employee {
    #[odm(id)]
    pub id: i64,
    pub name: String,
    #[odm(reference)]
    pub department: Option<Ref<Department>>,
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Enumerated)]
#[odm(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Open,
    Shipped,
    #[odm(rename = "CANCELLED")]
    Canceled,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct LineItem {
    pub sku: String,
    pub quantity: i32,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[odm(collection = "orders", rename_all = "camelCase")]
pub struct Order {
    #[odm(id(auto_increment))]
    pub id: Option<i64>,
    #[odm(generated(generator = "sequence"))]
    pub order_number: i64,
    pub status: OrderStatus,
    pub history: Vec<OrderStatus>,
    #[odm(embedded)]
    pub lines: Vec<LineItem>,
    #[odm(embedded)]
    pub gift_wrap: Option<LineItem>,
    pub notes: Option<String>,
    pub total_cents: i64,
    pub express: bool,
}

pub fn sample_order() -> Order {
    Order {
        id: None,
        order_number: 0,
        status: OrderStatus::Shipped,
        history: vec![OrderStatus::Open, OrderStatus::Shipped],
        lines: vec![
            LineItem {
                sku: "A-1".to_string(),
                quantity: 2,
                price: 4.5,
            },
            LineItem {
                sku: "B-7".to_string(),
                quantity: 1,
                price: 12.0,
            },
        ],
        gift_wrap: None,
        notes: None,
        total_cents: 2100,
        express: true,
    }
}

// ============================================================================
// Indexed and generated entities
// ============================================================================

#[derive(Debug, Clone, Default, Entity)]
#[odm(
    collection = "places",
    compound_index(keys = "country_1,name_-1", unique),
    compound_index(name = "by_name", keys = "name_text")
)]
pub struct Place {
    #[odm(id)]
    pub id: Option<i64>,
    pub name: String,
    pub country: String,
    #[odm(index(kind = "2dsphere"))]
    pub location: Vec<f64>,
    #[odm(index(order = "desc", sparse))]
    pub rating: Option<i32>,
}

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "invoices")]
pub struct Invoice {
    #[odm(id(auto_increment))]
    pub id: Option<i64>,
    #[odm(generated(generator = "sequence"))]
    pub number: i64,
    #[odm(generated(generator = "sequence"))]
    pub revision: i32,
    #[odm(generated(generator = "uuid", update))]
    pub etag: Option<String>,
}
