//! Field conversion chains.
//!
//! Entities are converted field by field. For every field the chain scans its
//! strategies in ascending priority order and delegates to the first one whose
//! `can_handle` accepts the field; each chain ends with a fallback that
//! accepts everything, so exactly one strategy converts each field.
//!
//! - [`Serializer`] - entity to document ([`ser`])
//! - [`Deserializer`] - document to entity ([`de`])
//! - [`coerce`] - scalar conversions shared by both directions

pub mod coerce;
pub mod de;
pub mod ser;

pub use de::{DeserializationContext, DeserializationStrategy, Deserializer, DeserializerBuilder};
pub use ser::{
    SerializationContext, SerializationStrategy, Serialized, Serializer, SerializerBuilder,
};
