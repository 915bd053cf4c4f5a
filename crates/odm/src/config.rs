//! Mapping engine configuration.
//!
//! Configuration can be built programmatically, deserialized with serde, or
//! read from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `ODM_LOAD_STRATEGY` | eager | Reference loading: eager, eager-direct, lazy |
//! | `ODM_CASCADE_STRATEGY` | cascade-all | Cascade on save: cascade-all, cascade-direct, no-cascade |
//! | `ODM_ENSURE_INDEXES` | true | Ensure indexes before the first save of a type |
//! | `ODM_SKIP_INVALID_ELEMENTS` | true | Skip sequence elements that fail to deserialize |
//! | `ODM_COUNTERS_COLLECTION` | _counters | Collection holding sequence counters |
//!
//! # Example
//!
//! ```rust
//! use helios_odm::OdmConfig;
//! use helios_odm::reference::LoadStrategy;
//!
//! // Create from environment
//! let config = OdmConfig::from_env();
//!
//! // Or create programmatically
//! let config = OdmConfig {
//!     load_strategy: LoadStrategy::Lazy,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::generator::DEFAULT_COUNTERS_COLLECTION;
use crate::reference::{CascadeStrategy, LoadStrategy};

/// Configuration of a [`Datastore`](crate::Datastore).
#[derive(Debug, Clone, PartialEq, Eq, Parser, Serialize, Deserialize)]
#[command(name = "helios-odm")]
#[command(about = "Object-document mapping engine")]
#[serde(default)]
pub struct OdmConfig {
    /// How references are resolved on load.
    #[arg(long, env = "ODM_LOAD_STRATEGY", value_enum, default_value_t = LoadStrategy::Eager)]
    pub load_strategy: LoadStrategy,

    /// Which referenced entities are persisted with their owner.
    #[arg(long, env = "ODM_CASCADE_STRATEGY", value_enum, default_value_t = CascadeStrategy::CascadeAll)]
    pub cascade_strategy: CascadeStrategy,

    /// Ensure the indexes of a type before it is first saved.
    #[arg(long, env = "ODM_ENSURE_INDEXES", default_value = "true", action = clap::ArgAction::Set)]
    pub ensure_indexes_on_save: bool,

    /// Skip sequence elements whose nested deserialization fails.
    #[arg(long, env = "ODM_SKIP_INVALID_ELEMENTS", default_value = "true", action = clap::ArgAction::Set)]
    pub skip_invalid_elements: bool,

    /// Collection holding the counters of the sequence generator.
    #[arg(long, env = "ODM_COUNTERS_COLLECTION", default_value = DEFAULT_COUNTERS_COLLECTION)]
    pub counters_collection: String,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            load_strategy: LoadStrategy::Eager,
            cascade_strategy: CascadeStrategy::CascadeAll,
            ensure_indexes_on_save: true,
            skip_invalid_elements: true,
            counters_collection: DEFAULT_COUNTERS_COLLECTION.to_string(),
        }
    }
}

impl OdmConfig {
    /// Creates a configuration from environment variables.
    ///
    /// Command line arguments are ignored; unset variables take their
    /// defaults, and unparsable values fall back to the full default set.
    pub fn from_env() -> Self {
        Self::try_parse_from(["helios-odm"]).unwrap_or_default()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.counters_collection.trim().is_empty() {
            errors.push("Counters collection cannot be empty".to_string());
        }

        if self.counters_collection.contains('$') {
            errors.push("Counters collection cannot contain '$'".to_string());
        }

        if self.counters_collection.starts_with("system.") {
            errors.push("Counters collection cannot use the system. prefix".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    ///
    /// Sequence elements are decoded strictly so that broken fixtures fail
    /// loudly, and counters go to a dedicated collection.
    pub fn for_testing() -> Self {
        Self {
            load_strategy: LoadStrategy::Eager,
            cascade_strategy: CascadeStrategy::CascadeAll,
            ensure_indexes_on_save: true,
            skip_invalid_elements: false,
            counters_collection: "_test_counters".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OdmConfig::default();
        assert_eq!(config.load_strategy, LoadStrategy::Eager);
        assert_eq!(config.cascade_strategy, CascadeStrategy::CascadeAll);
        assert!(config.ensure_indexes_on_save);
        assert!(config.skip_invalid_elements);
        assert_eq!(config.counters_collection, "_counters");
    }

    #[test]
    fn test_parse_matches_default() {
        let parsed = OdmConfig::try_parse_from(["helios-odm"]).unwrap();
        assert_eq!(parsed.counters_collection, OdmConfig::default().counters_collection);
    }

    #[test]
    fn test_parse_arguments() {
        let parsed = OdmConfig::try_parse_from([
            "helios-odm",
            "--load-strategy",
            "eager-direct",
            "--cascade-strategy",
            "no-cascade",
            "--ensure-indexes-on-save",
            "false",
        ])
        .unwrap();
        assert_eq!(parsed.load_strategy, LoadStrategy::EagerDirect);
        assert_eq!(parsed.cascade_strategy, CascadeStrategy::NoCascade);
        assert!(!parsed.ensure_indexes_on_save);
    }

    #[test]
    fn test_validate_valid() {
        assert!(OdmConfig::default().validate().is_ok());
        assert!(OdmConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_counters_collection() {
        let config = OdmConfig {
            counters_collection: " ".to_string(),
            ..Default::default()
        };
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().iter().any(|e| e.contains("empty")));

        let config = OdmConfig {
            counters_collection: "system.counters".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: OdmConfig =
            serde_json::from_str(r#"{"load_strategy": "lazy", "skip_invalid_elements": false}"#)
                .unwrap();
        assert_eq!(config.load_strategy, LoadStrategy::Lazy);
        assert!(!config.skip_invalid_elements);
        assert_eq!(config.cascade_strategy, CascadeStrategy::CascadeAll);
        assert_eq!(config.counters_collection, "_counters");
    }

    #[test]
    fn test_for_testing() {
        let config = OdmConfig::for_testing();
        assert!(!config.skip_invalid_elements);
        assert_eq!(config.counters_collection, "_test_counters");
    }
}
