//! Mapped types and their runtime surface.
//!
//! Every type the engine maps implements [`Object`], the object-safe view the
//! strategy chains use to read and write fields by name. Top-level and nested
//! types additionally implement [`Entity`], which supplies the declared
//! [`EntitySchema`](crate::metadata::EntitySchema) and an optional factory.
//! Both are normally produced by `#[derive(Entity)]`.
//!
//! Field types participate through [`Mapped`], which declares their
//! [`FieldType`](crate::metadata::FieldType) and converts them to and from
//! [`FieldValue`].

mod enumerated;
mod mapped;
mod reference;
mod value;

use std::any::Any;
use std::fmt;

use crate::error::MappingResult;
use crate::metadata::{EntitySchema, TypeRef};

pub use enumerated::Enumerated;
pub use mapped::Mapped;
pub use reference::Ref;
pub use value::FieldValue;

/// Object-safe access to the fields of a mapped type.
pub trait Object: Any + Send + Sync + fmt::Debug {
    /// Returns the runtime handle of the concrete type.
    fn type_ref(&self) -> TypeRef;

    /// Reads a field by its declared name.
    ///
    /// Returns `None` if the type has no such field.
    fn get_field(&self, name: &str) -> Option<FieldValue>;

    /// Writes a field by its declared name.
    fn set_field(&mut self, name: &str, value: FieldValue) -> MappingResult<()>;

    /// Clones the object behind a fresh box.
    fn clone_object(&self) -> Box<dyn Object>;

    /// Upcasts to [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Upcasts to mutable [`Any`] for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Converts the box into `Box<dyn Any>` for owned downcasting.
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

/// A type with a declared schema.
pub trait Entity: Object + Clone + Sized {
    /// Simple type name, the default collection name.
    const TYPE_NAME: &'static str;

    /// Declares the fields and tags of the type.
    fn schema() -> EntitySchema;

    /// Returns the no-argument constructor, if the type has one.
    fn factory() -> Option<fn() -> Box<dyn Object>>;
}

impl Clone for Box<dyn Object> {
    fn clone(&self) -> Self {
        self.clone_object()
    }
}

impl dyn Object {
    /// Returns a reference to the concrete type if it is `T`.
    pub fn downcast_ref<T: Object>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns a mutable reference to the concrete type if it is `T`.
    pub fn downcast_mut<T: Object>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Returns true if the concrete type is `T`.
    pub fn is<T: Object>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

/// Converts a boxed object back into its concrete type.
///
/// Returns the box unchanged when the type does not match.
pub fn downcast_box<T: Object>(obj: Box<dyn Object>) -> Result<T, Box<dyn Object>> {
    if obj.is::<T>() {
        match obj.into_any().downcast::<T>() {
            Ok(concrete) => Ok(*concrete),
            Err(_) => unreachable!("type checked before downcast"),
        }
    } else {
        Err(obj)
    }
}
