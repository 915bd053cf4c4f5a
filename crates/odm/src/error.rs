//! Error types for the mapping layer.
//!
//! Every failure raised while mapping entities is reported as a
//! [`MappingError`]. Failures of the external document store are described by
//! [`StoreError`] and wrapped into the mapping error at the boundary, so callers
//! only ever match on one type.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The single error type of the mapping layer.
#[derive(Error, Debug)]
pub enum MappingError {
    /// A stored value cannot be converted into the declared field type.
    #[error("type mismatch for field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// A nested or embedded type cannot be instantiated.
    #[error("type '{type_name}' has no no-argument constructor")]
    MissingConstructor { type_name: String },

    /// A stored enum name matches none of the declared variants.
    #[error("unknown value '{value}' for enum {enum_name}")]
    UnknownEnumValue { enum_name: String, value: String },

    /// A stored null cannot be assigned to a non-nullable primitive field.
    #[error("cannot assign null to non-nullable field '{field}' of type {field_type}")]
    NullToPrimitive { field: String, field_type: String },

    /// A referenced entity cannot be cited without an identifier.
    #[error("referenced entity of type '{type_name}' has no identifier: {reason}")]
    MissingIdentifier { type_name: String, reason: String },

    /// An entity type does not expose the requested field.
    #[error("type '{type_name}' has no field '{field}'")]
    UnknownField { type_name: String, field: String },

    /// The declared schema of a type is malformed.
    #[error("invalid metadata for '{type_name}': {message}")]
    InvalidMetadata { type_name: String, message: String },

    /// An index key token cannot be parsed.
    #[error("invalid index key '{token}' on '{collection}': {message}")]
    InvalidIndexKey {
        collection: String,
        token: String,
        message: String,
    },

    /// Creating or dropping an index failed in the store.
    #[error("index {operation} failed on '{collection}': {source}")]
    Index {
        collection: String,
        operation: String,
        #[source]
        source: StoreError,
    },

    /// No generator is registered under the requested name.
    #[error("unknown generator '{name}'")]
    UnknownGenerator { name: String },

    /// A generator failed to produce a value.
    #[error("generator '{generator}' failed: {message}")]
    Generator { generator: String, message: String },

    /// Any other store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MappingError {
    /// Creates a type-mismatch error.
    pub fn type_mismatch(
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        MappingError::TypeMismatch {
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a missing-identifier error.
    pub fn missing_identifier(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        MappingError::MissingIdentifier {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error originates from the document store.
    pub fn is_store_error(&self) -> bool {
        matches!(self, MappingError::Store(_) | MappingError::Index { .. })
    }
}

/// Errors reported by a document store implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store cannot be reached.
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    /// An operation against a collection failed.
    #[error("{operation} failed on collection '{collection}': {message}")]
    Operation {
        collection: String,
        operation: String,
        message: String,
    },

    /// A unique constraint was violated.
    #[error("duplicate key in collection '{collection}': {key}")]
    DuplicateKey { collection: String, key: String },

    /// A document could not be encoded or decoded.
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Driver-level error with its original source.
    #[error("internal store error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StoreError {
    /// Creates an operation error.
    pub fn operation(
        collection: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StoreError::Operation {
            collection: collection.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<bson::ser::Error> for StoreError {
    fn from(err: bson::ser::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<bson::de::Error> for StoreError {
    fn from(err: bson::de::Error) -> Self {
        StoreError::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Internal {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
