//! Scalar conversions between stored values and declared field types.
//!
//! Numbers convert freely across the integral and floating-point widths
//! (truncating like an `as` cast), strings are parsed into numbers, a
//! single-character string becomes a `char`, and any scalar can be read into
//! a `String` through its textual representation.

use bson::Bson;
use bson::oid::ObjectId;
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{MappingError, MappingResult};
use crate::metadata::FieldType;
use crate::model::FieldValue;

#[derive(Debug, Clone, Copy)]
enum Number {
    Integral(i64),
    Floating(f64),
}

fn number_of(value: &Bson) -> Option<Number> {
    match value {
        Bson::Int32(v) => Some(Number::Integral(i64::from(*v))),
        Bson::Int64(v) => Some(Number::Integral(*v)),
        Bson::Double(v) => Some(Number::Floating(*v)),
        Bson::String(s) => parse_number(s.trim()),
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Number> {
    if let Ok(v) = s.parse::<i64>() {
        return Some(Number::Integral(v));
    }
    s.parse::<f64>().ok().map(Number::Floating)
}

fn cast(number: Number, target: &FieldType) -> Option<FieldValue> {
    let value = match (number, target) {
        (Number::Integral(v), FieldType::Byte) => FieldValue::Byte(v as i8),
        (Number::Integral(v), FieldType::Short) => FieldValue::Short(v as i16),
        (Number::Integral(v), FieldType::Int) => FieldValue::Int(v as i32),
        (Number::Integral(v), FieldType::Long) => FieldValue::Long(v),
        (Number::Integral(v), FieldType::Float) => FieldValue::Float(v as f32),
        (Number::Integral(v), FieldType::Double) => FieldValue::Double(v as f64),
        (Number::Floating(v), FieldType::Byte) => FieldValue::Byte(v as i8),
        (Number::Floating(v), FieldType::Short) => FieldValue::Short(v as i16),
        (Number::Floating(v), FieldType::Int) => FieldValue::Int(v as i32),
        (Number::Floating(v), FieldType::Long) => FieldValue::Long(v as i64),
        (Number::Floating(v), FieldType::Float) => FieldValue::Float(v as f32),
        (Number::Floating(v), FieldType::Double) => FieldValue::Double(v),
        _ => return None,
    };
    Some(value)
}

/// Returns the textual representation of a scalar, if it has one.
pub fn text_of(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) | Bson::Symbol(s) => Some(s.clone()),
        Bson::Int32(v) => Some(v.to_string()),
        Bson::Int64(v) => Some(v.to_string()),
        Bson::Double(v) => Some(v.to_string()),
        Bson::Boolean(v) => Some(v.to_string()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::DateTime(dt) => Some(dt.to_chrono().to_rfc3339()),
        _ => None,
    }
}

fn stored_kind(value: &Bson) -> String {
    format!("{:?}", value.element_type())
}

/// Converts a stored scalar into the declared scalar type.
///
/// `target` must be a scalar type: a primitive, `String`, `DateTime`, or
/// `ObjectId`. Null becomes [`FieldValue::Null`]; the caller decides whether
/// null is acceptable.
pub fn bson_to_scalar(value: &Bson, target: &FieldType, field: &str) -> MappingResult<FieldValue> {
    if matches!(value, Bson::Null | Bson::Undefined) {
        return Ok(FieldValue::Null);
    }

    let converted = match target {
        t if t.is_numeric() => number_of(value).and_then(|n| cast(n, t)),
        FieldType::Bool => match value {
            Bson::Boolean(v) => Some(FieldValue::Bool(*v)),
            Bson::String(s) => s.trim().parse::<bool>().ok().map(FieldValue::Bool),
            _ => None,
        },
        FieldType::Char => match value {
            Bson::String(s) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(FieldValue::Char(c)),
                    _ => None,
                }
            }
            Bson::Int32(v) => u32::try_from(*v)
                .ok()
                .and_then(char::from_u32)
                .map(FieldValue::Char),
            _ => None,
        },
        FieldType::String => text_of(value).map(FieldValue::String),
        FieldType::DateTime => match value {
            Bson::DateTime(dt) => Some(FieldValue::DateTime(dt.to_chrono())),
            Bson::Int64(millis) => Utc
                .timestamp_millis_opt(*millis)
                .single()
                .map(FieldValue::DateTime),
            Bson::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| FieldValue::DateTime(dt.with_timezone(&Utc))),
            _ => None,
        },
        FieldType::ObjectId => match value {
            Bson::ObjectId(oid) => Some(FieldValue::Id(Bson::ObjectId(*oid))),
            Bson::String(s) => ObjectId::parse_str(s)
                .ok()
                .map(|oid| FieldValue::Id(Bson::ObjectId(oid))),
            _ => None,
        },
        _ => None,
    };

    converted.ok_or_else(|| MappingError::type_mismatch(field, target.to_string(), stored_kind(value)))
}

/// Converts a stored value without a declared type to guide it.
///
/// Scalars map to their natural variant; documents and other values are
/// kept as raw [`FieldValue::Id`] payloads.
pub fn bson_to_dynamic(value: &Bson) -> FieldValue {
    match value {
        Bson::Null | Bson::Undefined => FieldValue::Null,
        Bson::Boolean(v) => FieldValue::Bool(*v),
        Bson::Int32(v) => FieldValue::Int(*v),
        Bson::Int64(v) => FieldValue::Long(*v),
        Bson::Double(v) => FieldValue::Double(*v),
        Bson::String(s) | Bson::Symbol(s) => FieldValue::String(s.clone()),
        Bson::DateTime(dt) => FieldValue::DateTime(dt.to_chrono()),
        Bson::Array(items) => FieldValue::List(items.iter().map(bson_to_dynamic).collect()),
        other => FieldValue::Id(other.clone()),
    }
}

/// Converts an in-memory value (typically a generator output) into the
/// declared scalar type of a field.
pub fn coerce_value(value: FieldValue, target: &FieldType, field: &str) -> MappingResult<FieldValue> {
    match value.to_scalar_bson() {
        Some(raw) if target.is_primitive()
            || matches!(
                target,
                FieldType::String | FieldType::DateTime | FieldType::ObjectId
            ) =>
        {
            bson_to_scalar(&raw, target, field)
        }
        _ => Ok(value),
    }
}
