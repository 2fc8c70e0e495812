//! Configuration for the whole acceleration layer.
//!
//! Every misconfiguration surfaces here, when the layer is set up, never while
//! a request is being served.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::security::RateLimitConfig;

/// Errors detected while validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("rate-limit window must be longer than zero")]
    ZeroWindow,

    #[error("rate-limit quota must allow at least one request")]
    ZeroQuota,

    #[error("cache sweep interval must be longer than zero")]
    ZeroSweepInterval,

    #[error("unknown rate-limit profile `{0}`")]
    UnknownProfile(String),

    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Cache defaults plus named rate-limit profiles.
///
/// Profiles not mentioned in the JSON keep their built-in presets.
///
/// # Examples
///
/// ```
/// use ephemeris::config::AccelConfig;
///
/// let config = AccelConfig::from_json_str(r#"{
///     "cache": { "default_ttl_ms": 60000, "sweep_interval_ms": 30000 },
///     "rate_limits": {
///         "chart": { "window_ms": 60000, "max_requests": 20 },
///         "export": { "window_ms": 3600000, "max_requests": 3 }
///     }
/// }"#).unwrap();
///
/// assert_eq!(config.rate_limit("chart").unwrap().max_requests, 20);
/// assert_eq!(config.rate_limit("auth").unwrap().max_requests, 5);
/// assert!(config.rate_limit("export").is_ok());
/// assert!(config.rate_limit("nope").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AccelConfig {
    pub cache: CacheConfig,
    #[serde(deserialize_with = "merge_with_presets")]
    pub rate_limits: BTreeMap<String, RateLimitConfig>,
}

fn presets() -> BTreeMap<String, RateLimitConfig> {
    RateLimitConfig::presets()
        .into_iter()
        .map(|(name, config)| (name.to_string(), config))
        .collect()
}

fn merge_with_presets<'de, D>(deserializer: D) -> Result<BTreeMap<String, RateLimitConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides = BTreeMap::<String, RateLimitConfig>::deserialize(deserializer)?;
    let mut merged = presets();
    merged.extend(overrides);
    Ok(merged)
}

impl Default for AccelConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limits: presets(),
        }
    }
}

impl AccelConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed JSON, or any validation error.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cache settings and every rate-limit profile.
    ///
    /// # Errors
    ///
    /// The first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        for config in self.rate_limits.values() {
            config.quota()?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// [`ConfigError::UnknownProfile`] if no profile is named `name`.
    pub fn rate_limit(&self, name: &str) -> Result<&RateLimitConfig, ConfigError> {
        self.rate_limits
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile(name.to_string()))
    }
}
