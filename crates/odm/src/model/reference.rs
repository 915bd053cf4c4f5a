use bson::Bson;

use crate::error::{MappingError, MappingResult};
use crate::metadata::{FieldType, TypeRef};

use super::{Entity, FieldValue, Mapped, downcast_box};

/// A link to another stored entity.
///
/// Freshly loaded documents hold the raw identifier; the resolver replaces it
/// with the loaded entity according to the configured load strategy.
#[derive(Debug, Clone)]
pub enum Ref<T: Entity> {
    /// Raw store identifier.
    Id(Bson),
    /// Loaded entity.
    Loaded(Box<T>),
}

impl<T: Entity> Ref<T> {
    /// Creates an unresolved reference.
    pub fn id(id: impl Into<Bson>) -> Self {
        Ref::Id(id.into())
    }

    /// Creates a reference holding an entity.
    pub fn loaded(entity: T) -> Self {
        Ref::Loaded(Box::new(entity))
    }

    /// Returns true if the target has been loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Ref::Loaded(_))
    }

    /// Returns the loaded entity, if any.
    pub fn as_loaded(&self) -> Option<&T> {
        match self {
            Ref::Loaded(entity) => Some(entity),
            Ref::Id(_) => None,
        }
    }

    /// Returns the loaded entity mutably, if any.
    pub fn as_loaded_mut(&mut self) -> Option<&mut T> {
        match self {
            Ref::Loaded(entity) => Some(entity),
            Ref::Id(_) => None,
        }
    }

    /// Consumes the reference, returning the loaded entity if any.
    pub fn into_loaded(self) -> Option<T> {
        match self {
            Ref::Loaded(entity) => Some(*entity),
            Ref::Id(_) => None,
        }
    }

    /// Returns the raw identifier of an unresolved reference.
    pub fn raw_id(&self) -> Option<&Bson> {
        match self {
            Ref::Id(id) => Some(id),
            Ref::Loaded(_) => None,
        }
    }
}

impl<T: Entity> From<T> for Ref<T> {
    fn from(entity: T) -> Self {
        Ref::loaded(entity)
    }
}

impl<T: Entity> Mapped for Ref<T> {
    fn field_type() -> FieldType {
        FieldType::Object(TypeRef::of::<T>())
    }

    fn to_field_value(&self) -> FieldValue {
        match self {
            Ref::Id(id) => FieldValue::from_id(id.clone()),
            Ref::Loaded(entity) => FieldValue::Object(Box::new(entity.as_ref().clone())),
        }
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Id(id) => Ok(Ref::Id(id)),
            FieldValue::Object(obj) => match downcast_box::<T>(obj) {
                Ok(entity) => Ok(Ref::loaded(entity)),
                Err(obj) => Err(MappingError::type_mismatch(
                    field,
                    T::TYPE_NAME,
                    obj.type_ref().name(),
                )),
            },
            FieldValue::Null => Err(MappingError::NullToPrimitive {
                field: field.to_string(),
                field_type: T::TYPE_NAME.to_string(),
            }),
            other => match other.to_scalar_bson() {
                Some(id) => Ok(Ref::Id(id)),
                None => Err(MappingError::type_mismatch(
                    field,
                    T::TYPE_NAME,
                    other.kind_name(),
                )),
            },
        }
    }
}
