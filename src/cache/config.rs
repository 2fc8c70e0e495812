//! Cache settings loadable from JSON.

use std::time::Duration;

use serde::Deserialize;

use super::{CachePolicy, DEFAULT_TTL};
use crate::config::ConfigError;

/// Process-wide cache defaults.
///
/// Every field is optional in the serialized form:
///
/// ```
/// use ephemeris::cache::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{ "stale_window_ms": 30000 }"#).unwrap();
/// assert_eq!(config.default_ttl_ms, 300_000);
/// assert_eq!(
///     config.default_policy().max_age(),
///     std::time::Duration::from_secs(330),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub default_ttl_ms: u64,
    pub stale_window_ms: Option<u64>,
    /// Period of the background sweep; `None` leaves expiry purely lazy.
    pub sweep_interval_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            stale_window_ms: None,
            sweep_interval_ms: None,
        }
    }
}

impl CacheConfig {
    pub fn default_policy(&self) -> CachePolicy {
        let policy = CachePolicy::new(Duration::from_millis(self.default_ttl_ms));
        match self.stale_window_ms {
            Some(ms) => policy.with_stale_window(Duration::from_millis(ms)),
            None => policy,
        }
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    /// # Errors
    ///
    /// [`ConfigError::ZeroSweepInterval`] for a sweep interval of `0`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == Some(0) {
            return Err(ConfigError::ZeroSweepInterval);
        }
        Ok(())
    }
}
