//! In-memory field values.
//!
//! [`FieldValue`] is the typed mirror of one entity field as seen by the
//! mapping chains. Entities hand their fields out as `FieldValue`s and accept
//! them back, which lets the chains work on any mapped type without runtime
//! introspection.

use bson::Bson;
use chrono::{DateTime, Utc};

use super::Object;

/// The value of one entity field.
#[derive(Debug, Clone)]
pub enum FieldValue {
    /// Absent value (`None`).
    Null,
    /// Boolean value.
    Bool(bool),
    /// 8-bit signed integer.
    Byte(i8),
    /// 16-bit signed integer.
    Short(i16),
    /// 32-bit signed integer.
    Int(i32),
    /// 64-bit signed integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Single character.
    Char(char),
    /// Text value.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Symbolic name of an enum variant.
    Enum(String),
    /// Raw store identifier (an unresolved reference or a native id).
    Id(Bson),
    /// Nested entity instance (embedded or referenced).
    Object(Box<dyn Object>),
    /// Sequence of values.
    List(Vec<FieldValue>),
}

impl FieldValue {
    /// Returns true for [`FieldValue::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Returns a short name of the variant for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Byte(_) => "byte",
            FieldValue::Short(_) => "short",
            FieldValue::Int(_) => "int",
            FieldValue::Long(_) => "long",
            FieldValue::Float(_) => "float",
            FieldValue::Double(_) => "double",
            FieldValue::Char(_) => "char",
            FieldValue::String(_) => "string",
            FieldValue::DateTime(_) => "datetime",
            FieldValue::Enum(_) => "enum",
            FieldValue::Id(_) => "id",
            FieldValue::Object(_) => "object",
            FieldValue::List(_) => "list",
        }
    }

    /// Returns true for the integral and floating-point variants.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldValue::Byte(_)
                | FieldValue::Short(_)
                | FieldValue::Int(_)
                | FieldValue::Long(_)
                | FieldValue::Float(_)
                | FieldValue::Double(_)
        )
    }

    /// Returns true if this is a numeric value equal to zero.
    ///
    /// Non-numeric values, `Null` included, are never zero.
    pub fn is_zero(&self) -> bool {
        match self {
            FieldValue::Byte(v) => *v == 0,
            FieldValue::Short(v) => *v == 0,
            FieldValue::Int(v) => *v == 0,
            FieldValue::Long(v) => *v == 0,
            FieldValue::Float(v) => *v == 0.0,
            FieldValue::Double(v) => *v == 0.0,
            _ => false,
        }
    }

    /// Returns the value as an `i64` if it is numeric.
    ///
    /// Floating-point values are truncated toward zero.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Byte(v) => Some(i64::from(*v)),
            FieldValue::Short(v) => Some(i64::from(*v)),
            FieldValue::Int(v) => Some(i64::from(*v)),
            FieldValue::Long(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Double(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the value as an `f64` if it is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Byte(v) => Some(f64::from(*v)),
            FieldValue::Short(v) => Some(f64::from(*v)),
            FieldValue::Int(v) => Some(f64::from(*v)),
            FieldValue::Long(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(f64::from(*v)),
            FieldValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice for `String` and `Enum` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) | FieldValue::Enum(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the nested object, if any.
    pub fn as_object(&self) -> Option<&dyn Object> {
        match self {
            FieldValue::Object(obj) => Some(obj.as_ref()),
            _ => None,
        }
    }

    /// Converts a scalar value (or a list of scalars) into its document form.
    ///
    /// Returns `None` for values that need the serialization chain:
    /// `Null`, nested objects, and lists containing objects.
    pub fn to_scalar_bson(&self) -> Option<Bson> {
        match self {
            FieldValue::Null | FieldValue::Object(_) => None,
            FieldValue::Bool(v) => Some(Bson::Boolean(*v)),
            FieldValue::Byte(v) => Some(Bson::Int32(i32::from(*v))),
            FieldValue::Short(v) => Some(Bson::Int32(i32::from(*v))),
            FieldValue::Int(v) => Some(Bson::Int32(*v)),
            FieldValue::Long(v) => Some(Bson::Int64(*v)),
            FieldValue::Float(v) => Some(Bson::Double(f64::from(*v))),
            FieldValue::Double(v) => Some(Bson::Double(*v)),
            FieldValue::Char(c) => Some(Bson::String(c.to_string())),
            FieldValue::String(s) | FieldValue::Enum(s) => Some(Bson::String(s.clone())),
            FieldValue::DateTime(dt) => Some(Bson::DateTime(bson::DateTime::from_chrono(*dt))),
            FieldValue::Id(id) => Some(id.clone()),
            FieldValue::List(items) => items
                .iter()
                .map(|item| match item {
                    FieldValue::Null => Some(Bson::Null),
                    other => other.to_scalar_bson(),
                })
                .collect::<Option<Vec<_>>>()
                .map(Bson::Array),
        }
    }

    /// Builds a field value from a raw identifier, unwrapping plain scalars.
    pub fn from_id(id: Bson) -> Self {
        match id {
            Bson::Null => FieldValue::Null,
            other => FieldValue::Id(other),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}
