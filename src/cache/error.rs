//! Error types for the response cache.

use std::io;

use thiserror::Error;

/// Errors returned by a [`CacheStore`](super::CacheStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No value is stored under the key, or it has expired.
    #[error("cache miss")]
    Miss,

    /// The backend could not serve the call.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A stored value could not be decoded into a response snapshot.
    #[error("malformed cache entry: {0}")]
    Decode(String),
}

impl StoreError {
    /// Returns `true` for the expected not-found outcome.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Errors produced while coalescing concurrent executions of one key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoalesceError {
    /// The leading execution was cancelled or panicked before it published
    /// a result. Every waiter on that execution receives this error.
    #[error("leading execution ended without a result")]
    LeaderDropped,
}

/// Everything that can go wrong in the cache middleware.
///
/// Apart from [`MissingStore`](Self::MissingStore), which aborts construction,
/// none of these abort a request: they are logged, passed to the error hook,
/// and the request is answered anyway.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("a cache store is required")]
    MissingStore,

    #[error("get cache: {0}")]
    Lookup(#[source] StoreError),

    #[error("set cache: {0}")]
    Store(#[source] StoreError),

    #[error("write response: {0}")]
    Write(#[from] io::Error),

    #[error("coalesced execution failed: {0}")]
    Coalesce(#[from] CoalesceError),
}
