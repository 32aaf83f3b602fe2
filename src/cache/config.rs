//! Cache settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::pool::DEFAULT_POOL_CAPACITY;

/// Tunables for [`CacheMiddleware`](super::CacheMiddleware).
///
/// Every field has a default, so a partial document is enough:
///
/// ```
/// use std::time::Duration;
/// use herd::cache::CacheConfig;
///
/// let config = CacheConfig::from_json(r#"{ "ttl_ms": 5000, "forget_after_ms": 250 }"#).unwrap();
/// assert_eq!(config.ttl(), Duration::from_secs(5));
/// assert_eq!(config.forget_after(), Some(Duration::from_millis(250)));
/// assert!(config.coalescing);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long stored responses live, in milliseconds. Zero stores without expiry.
    pub ttl_ms: u64,

    /// Whether concurrent misses for one key share a single handler execution.
    pub coalescing: bool,

    /// How long an in-flight execution accepts new followers, in
    /// milliseconds. Unset or zero means for as long as it runs.
    pub forget_after_ms: Option<u64>,

    /// Idle snapshots kept for reuse.
    pub pool_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 60_000,
            coalescing: true,
            forget_after_ms: None,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Parses a JSON document.
    ///
    /// # Errors
    ///
    /// Returns the [`serde_json::Error`] for malformed input or mistyped fields.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// The effective forget duration: `None` when unset, zero, or when
    /// coalescing is off.
    pub fn forget_after(&self) -> Option<Duration> {
        self.forget_after_ms
            .filter(|ms| *ms > 0 && self.coalescing)
            .map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl(), Duration::from_secs(60));
        assert!(config.coalescing);
        assert_eq!(config.forget_after(), None);
        assert_eq!(config.pool_capacity, DEFAULT_POOL_CAPACITY);
    }

    #[test]
    fn empty_document_is_default() {
        assert_eq!(CacheConfig::from_json("{}").unwrap(), CacheConfig::default());
    }

    #[test]
    fn zero_forget_is_disabled() {
        let config = CacheConfig::from_json(r#"{"forget_after_ms": 0}"#).unwrap();
        assert_eq!(config.forget_after(), None);
    }

    #[test]
    fn forget_ignored_without_coalescing() {
        let config =
            CacheConfig::from_json(r#"{"coalescing": false, "forget_after_ms": 100}"#).unwrap();
        assert_eq!(config.forget_after(), None);
    }

    #[test]
    fn rejects_mistyped_fields() {
        assert!(CacheConfig::from_json(r#"{"ttl_ms": "soon"}"#).is_err());
    }
}
