//! Entities shared by the unit tests.

use crate::model::Ref;
use crate::{Entity, Enumerated};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Enumerated)]
pub enum Role {
    #[default]
    Member,
    Admin,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Location {
    pub city: String,
    pub zip: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[odm(collection = "people")]
pub struct Person {
    #[odm(id)]
    pub id: Option<i64>,
    pub name: String,
    pub age: i32,
    pub nickname: Option<String>,
    pub role: Role,
    #[odm(embedded)]
    pub home: Option<Location>,
    pub tags: Vec<String>,
    pub initial: char,
    pub score: f64,
    pub badges: Vec<Role>,
    #[odm(skip)]
    pub scratch: u64,
}

impl Person {
    pub fn sample() -> Self {
        Self {
            id: Some(1),
            name: "Ada".to_string(),
            age: 36,
            nickname: Some("Countess".to_string()),
            role: Role::Admin,
            home: Some(Location {
                city: "London".to_string(),
                zip: 1815,
            }),
            tags: vec!["math".to_string(), "engines".to_string()],
            initial: 'A',
            score: 9.5,
            badges: vec![Role::Admin, Role::Member],
            scratch: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
pub struct Trip {
    #[odm(id)]
    pub id: Option<i64>,
    #[odm(embedded)]
    pub stops: Vec<Location>,
    pub legs: Vec<Vec<i64>>,
}

#[derive(Debug, Clone, Default, Entity)]
#[odm(collection = "tickets")]
pub struct Ticket {
    #[odm(id(auto_increment))]
    pub id: Option<i64>,
    #[odm(generated(generator = "sequence"))]
    pub number: i64,
    #[odm(generated(generator = "uuid", update))]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Author {
    #[odm(id)]
    pub id: i64,
    pub name: String,
    #[odm(reference)]
    pub books: Vec<Ref<Book>>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Book {
    #[odm(id)]
    pub id: i64,
    pub title: String,
    #[odm(reference)]
    pub author: Option<Ref<Author>>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Shelf {
    #[odm(id)]
    pub id: Option<i64>,
    pub label: String,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Library {
    #[odm(id)]
    pub id: Option<i64>,
    #[odm(reference)]
    pub featured: Option<Ref<Shelf>>,
}

#[derive(Debug, Clone, Entity)]
#[odm(no_default)]
pub struct Sealed {
    pub value: i32,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Holder {
    #[odm(id)]
    pub id: Option<i64>,
    #[odm(embedded)]
    pub sealed: Option<Sealed>,
}

#[derive(Debug, Clone, Default, Entity)]
pub struct Note {
    #[odm(id)]
    pub id: String,
    pub text: String,
}
