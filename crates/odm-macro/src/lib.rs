//! Derive macros for Helios ODM.
//!
//! - [`Entity`] - implements `Object`, `Entity`, and `Mapped` for a struct
//!   with named fields, producing its schema from `#[odm(...)]` attributes
//! - [`Enumerated`] - implements `Enumerated` and `Mapped` for a unit enum
//!
//! The generated code refers to the runtime crate as `::helios_odm`.

use proc_macro::TokenStream;

mod attrs;
mod entity;
mod enumerated;

/// Derives the schema and field access of an entity.
///
/// # Container attributes
///
/// ```ignore
/// #[odm(collection = "users")]
/// #[odm(rename_all = "camelCase")]
/// #[odm(no_default)]
/// #[odm(compound_index(name = "by_name", keys = "last_1,first_-1", unique))]
/// #[odm(trigger(action = "insert", phase = "pre", method = "stamp"))]
/// ```
///
/// # Field attributes
///
/// ```ignore
/// #[odm(id)]
/// #[odm(id(auto_increment, generator = "sequence"))]
/// #[odm(generated(generator = "uuid", update))]
/// #[odm(reference)]
/// #[odm(embedded)]
/// #[odm(index(name = "by_name", order = "desc", unique, sparse))]
/// #[odm(index(kind = "2dsphere"))]
/// #[odm(rename = "mail")]
/// #[odm(skip)]
/// ```
///
/// Unless `no_default` is given the type must implement `Default`, which
/// serves as its no-argument constructor. Skipped fields must implement
/// `Default` in any case.
#[proc_macro_derive(Entity, attributes(odm))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    entity::derive_entity(input.into()).into()
}

/// Derives symbolic-name storage for a unit enum.
///
/// Variants are stored by name; `#[odm(rename = "...")]` on a variant and
/// `#[odm(rename_all = "...")]` on the enum change the stored names.
#[proc_macro_derive(Enumerated, attributes(odm))]
pub fn derive_enumerated(input: TokenStream) -> TokenStream {
    enumerated::derive_enumerated(input.into()).into()
}
