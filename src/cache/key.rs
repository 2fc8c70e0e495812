//! Deterministic cache key derivation.
//!
//! A key is `namespace` alone, or `namespace:name=value&name=value` with the
//! parameters sorted by name, so insertion order never matters. Every component
//! is percent-escaped for the separators `:` `=` `&` `|` and for `%` itself, so
//! two different parameter bags can never render to the same key.

use std::fmt::{Display, Write as _};

use serde::Serialize;

use super::CacheError;
use crate::http::Request;

/// Escapes the key separators and the escape character itself.
fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '=' => out.push_str("%3D"),
            '&' => out.push_str("%26"),
            '|' => out.push_str("%7C"),
            _ => out.push(ch),
        }
    }
    out
}

fn render(namespace: &str, mut params: Vec<(String, String)>) -> String {
    let mut key = escape(namespace);
    if params.is_empty() {
        return key;
    }
    params.sort();
    key.push(':');
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            key.push('&');
        }
        // Writing to a String cannot fail.
        let _ = write!(key, "{name}={value}");
    }
    key
}

/// Fluent builder for a namespaced key.
///
/// # Examples
///
/// ```
/// use ephemeris::cache::KeyBuilder;
///
/// let a = KeyBuilder::new("chart").param("user", 42).param("kind", "natal").build();
/// let b = KeyBuilder::new("chart").param("kind", "natal").param("user", 42).build();
///
/// assert_eq!(a, b);
/// assert_eq!(a, "chart:kind=natal&user=42");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
    params: Vec<(String, String)>,
}

impl KeyBuilder {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter rendered with its `Display` impl.
    #[must_use]
    pub fn param(mut self, name: &str, value: impl Display) -> Self {
        self.params.push((escape(name), escape(&value.to_string())));
        self
    }

    /// Adds a structured parameter rendered as compact JSON.
    ///
    /// Object keys come out sorted, so two equal maps built in different
    /// orders produce the same key.
    ///
    /// # Errors
    ///
    /// [`CacheError::KeyParam`] if `value` cannot be serialized.
    pub fn json_param<T>(mut self, name: &str, value: &T) -> Result<Self, CacheError>
    where
        T: Serialize + ?Sized,
    {
        let json = serde_json::to_value(value).map_err(|source| CacheError::KeyParam {
            name: name.to_string(),
            source,
        })?;
        self.params.push((escape(name), escape(&json.to_string())));
        Ok(self)
    }

    pub fn build(self) -> String {
        render(&self.namespace, self.params)
    }
}

/// Builds a key from a namespace and a bag of `(name, value)` pairs.
///
/// ```
/// use ephemeris::cache::build_key;
///
/// assert_eq!(
///     build_key("calendar", [("year", 2025), ("id", 7)]),
///     build_key("calendar", [("id", 7), ("year", 2025)]),
/// );
/// assert_ne!(build_key("user", [("id", 1)]), build_key("subscription", [("id", 1)]));
/// ```
pub fn build_key<I, K, V>(namespace: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    params
        .into_iter()
        .fold(KeyBuilder::new(namespace), |builder, (name, value)| {
            builder.param(name.as_ref(), value)
        })
        .build()
}

/// Derives the response-cache key for `request`.
///
/// Layout: `namespace:METHOD:path:query:vary`, where `query` is the sorted
/// query parameters and `vary` the lowercased names and values of those
/// `vary_headers` present on the request. An absent vary header contributes
/// nothing, so it is distinct from the same header sent empty.
///
/// ```
/// use ephemeris::cache::request_key;
/// use ephemeris::http::{Method, Request};
///
/// let a = Request::new(Method::Get, "/charts?b=2&a=1").header("Accept-Language", "en");
/// let b = Request::new(Method::Get, "/charts?a=1&b=2").header("accept-language", "en");
///
/// assert_eq!(
///     request_key("http", &a, &["Accept-Language"]),
///     request_key("http", &b, &["accept-language"]),
/// );
/// ```
pub fn request_key(namespace: &str, request: &Request, vary_headers: &[&str]) -> String {
    let mut query: Vec<(String, String)> = request
        .query_params()
        .map(|(name, value)| (escape(name), escape(value)))
        .collect();
    query.sort();

    let mut vary: Vec<(String, String)> = vary_headers
        .iter()
        .filter_map(|name| {
            let value = request.headers().get(name)?;
            Some((escape(&name.to_ascii_lowercase()), escape(value)))
        })
        .collect();
    vary.sort();
    vary.dedup();

    let join = |pairs: &[(String, String)]| {
        pairs
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    };

    format!(
        "{}:{}:{}:{}:{}",
        escape(namespace),
        escape(request.method().as_str()),
        escape(request.path()),
        join(&query),
        join(&vary),
    )
}
