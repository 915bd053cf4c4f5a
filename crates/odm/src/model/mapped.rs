//! Conversions between Rust field types and [`FieldValue`].

use bson::Bson;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};

use crate::error::{MappingError, MappingResult};
use crate::metadata::FieldType;

use super::FieldValue;

/// A type that can be stored in an entity field.
///
/// The derive macros implement it for entities and enumerated types; the
/// crate implements it for the scalar types, `Option`, `Vec`, and `Box`.
pub trait Mapped: Sized {
    /// Declared type of fields holding this type.
    fn field_type() -> FieldType;

    /// Returns true if `None` is a valid value.
    fn nullable() -> bool {
        false
    }

    /// Converts the value into its field form.
    fn to_field_value(&self) -> FieldValue;

    /// Converts a field value back, reporting failures against `field`.
    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self>;
}

fn mismatch<T>(field: &str, expected: &FieldType, found: &FieldValue) -> MappingResult<T> {
    Err(MappingError::type_mismatch(
        field,
        expected.to_string(),
        found.kind_name(),
    ))
}

fn null_to_primitive<T>(field: &str, expected: &FieldType) -> MappingResult<T> {
    Err(MappingError::NullToPrimitive {
        field: field.to_string(),
        field_type: expected.to_string(),
    })
}

/// Returns the value if it holds a number; raw ids are handled by `id_as_i64`.
fn numeric(value: &FieldValue) -> Option<&FieldValue> {
    if value.is_numeric() { Some(value) } else { None }
}

fn id_as_i64(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Id(Bson::Int32(v)) => Some(i64::from(*v)),
        FieldValue::Id(Bson::Int64(v)) => Some(*v),
        FieldValue::Id(Bson::Double(v)) => Some(*v as i64),
        _ => None,
    }
}

macro_rules! mapped_integer {
    ($ty:ty, $variant:ident, $field_type:ident) => {
        impl Mapped for $ty {
            fn field_type() -> FieldType {
                FieldType::$field_type
            }

            fn to_field_value(&self) -> FieldValue {
                FieldValue::$variant(*self)
            }

            fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
                if let FieldValue::$variant(v) = value {
                    return Ok(v);
                }
                if value.is_null() {
                    return null_to_primitive(field, &FieldType::$field_type);
                }
                if let Some(v) = numeric(&value).and_then(FieldValue::as_i64) {
                    return Ok(v as $ty);
                }
                if let Some(v) = id_as_i64(&value) {
                    return Ok(v as $ty);
                }
                mismatch(field, &FieldType::$field_type, &value)
            }
        }
    };
}

mapped_integer!(i8, Byte, Byte);
mapped_integer!(i16, Short, Short);
mapped_integer!(i32, Int, Int);
mapped_integer!(i64, Long, Long);

macro_rules! mapped_float {
    ($ty:ty, $variant:ident, $field_type:ident) => {
        impl Mapped for $ty {
            fn field_type() -> FieldType {
                FieldType::$field_type
            }

            fn to_field_value(&self) -> FieldValue {
                FieldValue::$variant(*self)
            }

            fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
                if let FieldValue::$variant(v) = value {
                    return Ok(v);
                }
                if value.is_null() {
                    return null_to_primitive(field, &FieldType::$field_type);
                }
                if let Some(v) = value.as_f64() {
                    return Ok(v as $ty);
                }
                mismatch(field, &FieldType::$field_type, &value)
            }
        }
    };
}

mapped_float!(f32, Float, Float);
mapped_float!(f64, Double, Double);

impl Mapped for bool {
    fn field_type() -> FieldType {
        FieldType::Bool
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Bool(*self)
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Bool(v) => Ok(v),
            FieldValue::Null => null_to_primitive(field, &FieldType::Bool),
            other => mismatch(field, &FieldType::Bool, &other),
        }
    }
}

impl Mapped for char {
    fn field_type() -> FieldType {
        FieldType::Char
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Char(*self)
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Char(c) => Ok(c),
            FieldValue::Null => null_to_primitive(field, &FieldType::Char),
            FieldValue::String(ref s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => mismatch(field, &FieldType::Char, &value),
                }
            }
            other => mismatch(field, &FieldType::Char, &other),
        }
    }
}

impl Mapped for String {
    fn field_type() -> FieldType {
        FieldType::String
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::String(self.clone())
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Null => Ok(String::new()),
            FieldValue::String(s) | FieldValue::Enum(s) => Ok(s),
            FieldValue::Char(c) => Ok(c.to_string()),
            FieldValue::Id(Bson::String(s)) => Ok(s),
            FieldValue::Id(Bson::ObjectId(oid)) => Ok(oid.to_hex()),
            other => mismatch(field, &FieldType::String, &other),
        }
    }
}

impl Mapped for DateTime<Utc> {
    fn field_type() -> FieldType {
        FieldType::DateTime
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::DateTime(*self)
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::DateTime(dt) => Ok(dt),
            FieldValue::Id(Bson::DateTime(dt)) => Ok(dt.to_chrono()),
            FieldValue::Null => null_to_primitive(field, &FieldType::DateTime),
            other => mismatch(field, &FieldType::DateTime, &other),
        }
    }
}

impl Mapped for ObjectId {
    fn field_type() -> FieldType {
        FieldType::ObjectId
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::Id(Bson::ObjectId(*self))
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Id(Bson::ObjectId(oid)) => Ok(oid),
            FieldValue::String(ref s) | FieldValue::Id(Bson::String(ref s)) => {
                ObjectId::parse_str(s).or_else(|_| mismatch(field, &FieldType::ObjectId, &value))
            }
            FieldValue::Null => null_to_primitive(field, &FieldType::ObjectId),
            other => mismatch(field, &FieldType::ObjectId, &other),
        }
    }
}

impl<T: Mapped> Mapped for Option<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn nullable() -> bool {
        true
    }

    fn to_field_value(&self) -> FieldValue {
        match self {
            Some(v) => v.to_field_value(),
            None => FieldValue::Null,
        }
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Null => Ok(None),
            other => T::from_field_value(other, field).map(Some),
        }
    }
}

impl<T: Mapped> Mapped for Vec<T> {
    fn field_type() -> FieldType {
        FieldType::List(Box::new(T::field_type()))
    }

    fn to_field_value(&self) -> FieldValue {
        FieldValue::List(self.iter().map(Mapped::to_field_value).collect())
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        match value {
            FieldValue::Null => Ok(Vec::new()),
            FieldValue::List(items) => items
                .into_iter()
                .map(|item| T::from_field_value(item, field))
                .collect(),
            other => mismatch(field, &Self::field_type(), &other),
        }
    }
}

impl<T: Mapped> Mapped for Box<T> {
    fn field_type() -> FieldType {
        T::field_type()
    }

    fn nullable() -> bool {
        T::nullable()
    }

    fn to_field_value(&self) -> FieldValue {
        self.as_ref().to_field_value()
    }

    fn from_field_value(value: FieldValue, field: &str) -> MappingResult<Self> {
        T::from_field_value(value, field).map(Box::new)
    }
}
