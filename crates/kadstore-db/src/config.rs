//! Database configuration.
//!
//! Loaded from TOML by the embedding node. Every field has a default, so an
//! empty document yields [`DatabaseConfig::default`].
//!
//! ```toml
//! max_keys = 16384
//! max_records_per_key = 5
//! per_address_limit = 5
//! ban_threshold = 20
//!
//! [republish]
//! base_interval_secs = 3600
//! min_interval_secs = 120
//! replication_factor = 20
//!
//! [request_load]
//! smoothing_factor = 0.25
//! nulling_delay_secs = 30
//! ```
//!
//! Any of the four limits accepts the string `"unbounded"` in place of a count.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DbError, DEFAULT_BAN_THRESHOLD, DEFAULT_MAX_KEYS, DEFAULT_MAX_RECORDS_PER_KEY,
    DEFAULT_MIN_REPUBLISH_INTERVAL_SECS, DEFAULT_PER_ADDRESS_LIMIT,
    DEFAULT_REPLICATION_FACTOR, DEFAULT_REPUBLISH_INTERVAL_SECS,
    DEFAULT_REQUEST_LOAD_NULLING_DELAY_SECS, DEFAULT_REQUEST_LOAD_SMOOTHING,
    DEFAULT_VALUE_EXPIRATION_SECS,
};

/// Configuration for the value database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Maximum number of distinct keys created by remote stores
    #[serde(with = "limit")]
    pub max_keys: Option<usize>,
    /// Maximum number of creators per key for remote stores
    #[serde(with = "limit")]
    pub max_records_per_key: Option<usize>,
    /// Maximum live records a single source address may hold
    #[serde(with = "limit")]
    pub per_address_limit: Option<usize>,
    /// Record count above which a source address is banned
    #[serde(with = "limit")]
    pub ban_threshold: Option<usize>,
    /// Lifetime of a non-local record in seconds
    pub value_expiration_secs: u64,
    /// Republish bookkeeping for local records
    pub republish: RepublishConfig,
    /// Request load tracking
    pub request_load: RequestLoadConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_keys: Some(DEFAULT_MAX_KEYS),
            max_records_per_key: Some(DEFAULT_MAX_RECORDS_PER_KEY),
            per_address_limit: Some(DEFAULT_PER_ADDRESS_LIMIT),
            ban_threshold: Some(DEFAULT_BAN_THRESHOLD),
            value_expiration_secs: DEFAULT_VALUE_EXPIRATION_SECS,
            republish: RepublishConfig::default(),
            request_load: RequestLoadConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// Creates a configuration without any limits.
    pub fn unbounded() -> Self {
        Self {
            max_keys: None,
            max_records_per_key: None,
            per_address_limit: None,
            ban_threshold: None,
            ..Default::default()
        }
    }

    /// Parses a configuration from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, DbError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Checks values that would make the database misbehave.
    pub fn validate(&self) -> Result<(), DbError> {
        if self.republish.replication_factor == 0 {
            return Err(DbError::InvalidConfig(
                "replication_factor must be at least 1".into(),
            ));
        }

        let alpha = self.request_load.smoothing_factor;
        if !(0.0..=1.0).contains(&alpha) {
            return Err(DbError::InvalidConfig(format!(
                "smoothing_factor {alpha} outside [0, 1]"
            )));
        }

        Ok(())
    }

    /// Returns the lifetime of a non-local record.
    pub fn value_expiration(&self) -> Duration {
        Duration::from_secs(self.value_expiration_secs)
    }
}

/// Serde adapter for optional limits: a count, or `"unbounded"` for `None`.
mod limit {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    const UNBOUNDED: &str = "unbounded";

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Count(usize),
        Word(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<usize>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(count) => serializer.serialize_u64(*count as u64),
            None => serializer.serialize_str(UNBOUNDED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<usize>, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Count(count) => Ok(Some(count)),
            Repr::Word(word) if word == UNBOUNDED => Ok(None),
            Repr::Word(word) => Err(D::Error::custom(format!(
                "expected a count or \"{UNBOUNDED}\", got \"{word}\""
            ))),
        }
    }
}

/// Republish interval parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepublishConfig {
    /// Interval for a record replicated to `replication_factor` peers
    pub base_interval_secs: u64,
    /// Floor for the computed interval
    pub min_interval_secs: u64,
    /// Target number of remote holders (k)
    pub replication_factor: usize,
}

impl Default for RepublishConfig {
    fn default() -> Self {
        Self {
            base_interval_secs: DEFAULT_REPUBLISH_INTERVAL_SECS,
            min_interval_secs: DEFAULT_MIN_REPUBLISH_INTERVAL_SECS,
            replication_factor: DEFAULT_REPLICATION_FACTOR,
        }
    }
}

impl RepublishConfig {
    /// Returns the republish interval for a record held by `replica_count` peers.
    ///
    /// Scales linearly with the replica count and never drops below the
    /// configured minimum.
    pub fn interval_for(&self, replica_count: usize) -> Duration {
        let k = self.replication_factor.max(1) as u64;
        let scaled_ms = (replica_count as u64)
            .saturating_mul(self.base_interval_secs.saturating_mul(1000))
            / k;
        Duration::from_millis(scaled_ms).max(Duration::from_secs(self.min_interval_secs))
    }
}

/// Request load smoothing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLoadConfig {
    /// Weight of the newest sample (alpha)
    pub smoothing_factor: f32,
    /// Idle seconds after which the load resets to zero
    pub nulling_delay_secs: u64,
}

impl Default for RequestLoadConfig {
    fn default() -> Self {
        Self {
            smoothing_factor: DEFAULT_REQUEST_LOAD_SMOOTHING,
            nulling_delay_secs: DEFAULT_REQUEST_LOAD_NULLING_DELAY_SECS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_is_default() {
        let config = DatabaseConfig::from_toml_str("").unwrap();
        assert_eq!(config, DatabaseConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            max_records_per_key = 2

            [republish]
            replication_factor = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.max_records_per_key, Some(2));
        assert_eq!(config.max_keys, Some(DEFAULT_MAX_KEYS));
        assert_eq!(config.republish.replication_factor, 10);
        assert_eq!(config.republish.base_interval_secs, DEFAULT_REPUBLISH_INTERVAL_SECS);
    }

    #[test]
    fn test_unbounded_limit() {
        let config = DatabaseConfig::from_toml_str("max_keys = \"unbounded\"\nper_address_limit = 3\n").unwrap();
        assert_eq!(config.max_keys, None);
        assert_eq!(config.per_address_limit, Some(3));
    }

    #[test]
    fn test_serialize_roundtrip_keeps_unbounded() {
        let config = DatabaseConfig::unbounded();
        let encoded = toml::to_string(&config).unwrap();
        assert!(encoded.contains("\"unbounded\""));
        assert_eq!(DatabaseConfig::from_toml_str(&encoded).unwrap(), config);
    }

    #[test]
    fn test_zero_replication_factor_rejected() {
        let result = DatabaseConfig::from_toml_str("[republish]\nreplication_factor = 0\n");
        assert!(matches!(result, Err(DbError::InvalidConfig(_))));
    }

    #[test]
    fn test_smoothing_factor_out_of_range() {
        let result = DatabaseConfig::from_toml_str("[request_load]\nsmoothing_factor = 1.5\n");
        assert!(matches!(result, Err(DbError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = DatabaseConfig::from_toml_str("max_keys = \"lots\"");
        assert!(matches!(result, Err(DbError::Toml(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_keys = 100").unwrap();
        writeln!(file, "ban_threshold = 7").unwrap();

        let config = DatabaseConfig::load(file.path()).unwrap();
        assert_eq!(config.max_keys, Some(100));
        assert_eq!(config.ban_threshold, Some(7));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = DatabaseConfig::load(dir.path().join("missing.toml"));
        assert!(matches!(result, Err(DbError::Io(_))));
    }

    #[test]
    fn test_republish_interval() {
        let config = RepublishConfig {
            base_interval_secs: 3600,
            min_interval_secs: 120,
            replication_factor: 20,
        };

        // Fully replicated: full base interval
        assert_eq!(config.interval_for(20), Duration::from_secs(3600));
        // Half replicated: half the interval
        assert_eq!(config.interval_for(10), Duration::from_secs(1800));
        // Unreplicated: clamped to the minimum
        assert_eq!(config.interval_for(0), Duration::from_secs(120));
    }
}
