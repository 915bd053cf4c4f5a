use crate::error::{MappingError, MappingResult};
use crate::metadata::EnumType;

use super::FieldValue;

/// A unit enum stored by the symbolic name of its variant.
///
/// Implemented by `#[derive(Enumerated)]`, which also provides the matching
/// [`Mapped`](super::Mapped) impl.
pub trait Enumerated: Sized + Copy + 'static {
    /// Enum type name.
    const ENUM_NAME: &'static str;

    /// Symbolic variant names in declaration order.
    const VARIANTS: &'static [&'static str];

    /// Returns the symbolic name of this variant.
    fn name(&self) -> &'static str;

    /// Looks up a variant by exact, case-sensitive name.
    fn from_name(name: &str) -> Option<Self>;

    /// Returns the declared enum description.
    fn enum_type() -> EnumType {
        EnumType::new(Self::ENUM_NAME, Self::VARIANTS)
    }

    /// Converts a stored name back into a variant.
    fn from_enum_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Enum(name) | FieldValue::String(name) => {
                Self::from_name(&name).ok_or(MappingError::UnknownEnumValue {
                    enum_name: Self::ENUM_NAME.to_string(),
                    value: name,
                })
            }
            FieldValue::Null => Err(MappingError::NullToPrimitive {
                field: field.to_string(),
                field_type: format!("enum {}", Self::ENUM_NAME),
            }),
            other => Err(MappingError::type_mismatch(
                field,
                format!("enum {}", Self::ENUM_NAME),
                other.kind_name(),
            )),
        }
    }
}
