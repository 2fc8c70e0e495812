//! Rate-limit profiles.

use std::time::Duration;

use serde::Deserialize;

use super::Quota;
use crate::config::ConfigError;

pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// One named rate-limit profile, loadable from JSON.
///
/// # Examples
///
/// ```
/// use ephemeris::security::RateLimitConfig;
///
/// let auth = RateLimitConfig::auth();
/// assert_eq!(auth.max_requests, 5);
/// assert!(auth.quota().is_ok());
///
/// let custom: RateLimitConfig =
///     serde_json::from_str(r#"{ "window_ms": 1000, "max_requests": 3 }"#).unwrap();
/// assert!(custom.headers);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
    #[serde(default = "default_message")]
    pub message: String,
    /// Whether to attach `X-RateLimit-*` headers to responses.
    #[serde(default = "default_headers")]
    pub headers: bool,
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_headers() -> bool {
    true
}

impl RateLimitConfig {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window_ms: window.as_millis() as u64,
            max_requests,
            message: default_message(),
            headers: true,
        }
    }

    fn per_minute(max_requests: u32, message: &str) -> Self {
        Self {
            message: message.to_string(),
            ..Self::new(Duration::from_secs(60), max_requests)
        }
    }

    /// General API traffic: 100 requests per minute.
    pub fn general() -> Self {
        Self::per_minute(100, DEFAULT_MESSAGE)
    }

    /// Sign-in and sign-up: 5 requests per minute.
    pub fn auth() -> Self {
        Self::per_minute(5, "Too many authentication attempts, please try again later.")
    }

    /// Chart calculations: 10 requests per minute.
    pub fn chart() -> Self {
        Self::per_minute(10, "Too many chart calculation requests, please try again later.")
    }

    /// Payment webhooks: 50 requests per minute.
    pub fn stripe() -> Self {
        Self::per_minute(50, "Too many webhook requests, please try again later.")
    }

    /// Admin endpoints: 200 requests per minute.
    pub fn admin() -> Self {
        Self::per_minute(200, "Too many admin requests, please try again later.")
    }

    /// The built-in profiles by name.
    pub fn presets() -> [(&'static str, Self); 5] {
        [
            ("general", Self::general()),
            ("auth", Self::auth()),
            ("chart", Self::chart()),
            ("stripe", Self::stripe()),
            ("admin", Self::admin()),
        ]
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    #[must_use]
    pub fn headers(mut self, enabled: bool) -> Self {
        self.headers = enabled;
        self
    }

    /// # Errors
    ///
    /// [`ConfigError::ZeroWindow`] or [`ConfigError::ZeroQuota`].
    pub fn quota(&self) -> Result<Quota, ConfigError> {
        Quota::new(Duration::from_millis(self.window_ms), self.max_requests)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::general()
    }
}
