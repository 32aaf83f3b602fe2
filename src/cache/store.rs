//! The storage backend contract consumed by the cache middleware.

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;

use super::StoreError;

/// Boxed future returned by [`CacheStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// A byte-oriented key/value store with per-entry time-to-live.
///
/// The middleware only ever calls [`get`](Self::get) and [`set`](Self::set).
/// Values are opaque: the middleware encodes response snapshots itself, so a
/// backend just keeps the bytes it was given.
///
/// # Contract
///
/// - `get` returns [`StoreError::Miss`] for absent or expired keys and keeps
///   every other variant for genuine failures.
/// - A `ttl` of zero means the entry does not expire.
/// - Both methods may be called concurrently from many request tasks.
pub trait CacheStore: Send + Sync {
    /// Fetches the value stored under `key`.
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()>;
}
