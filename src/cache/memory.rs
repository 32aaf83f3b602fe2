//! In-process [`CacheStore`] backed by a hash map.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use tokio::{sync::RwLock, time::Instant};
use tracing::trace;

use super::{CacheStore, StoreError, StoreFuture};

#[derive(Debug)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A single-node store that keeps entries in memory until they expire.
///
/// Expired entries read as a miss and are evicted on the read that notices
/// them. There is no size bound.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use herd::cache::{CacheStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryStore::new();
/// store.set("k", Bytes::from_static(b"v"), Duration::from_secs(5)).await.unwrap();
/// assert_eq!(store.get("k").await.unwrap(), Bytes::from_static(b"v"));
/// assert!(store.get("other").await.unwrap_err().is_miss());
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are read.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Removes `key`, returning whether an entry was present.
    pub async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }
}

impl CacheStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Bytes> {
        Box::pin(async move {
            let now = Instant::now();
            {
                let entries = self.entries.read().await;
                match entries.get(key) {
                    None => return Err(StoreError::Miss),
                    Some(entry) if !entry.is_expired(now) => return Ok(entry.value.clone()),
                    Some(_) => {}
                }
            }

            let mut entries = self.entries.write().await;
            // Another task may have replaced the entry between the two locks.
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => Ok(entry.value.clone()),
                Some(_) => {
                    trace!(key, "evicting expired entry");
                    entries.remove(key);
                    Err(StoreError::Miss)
                }
                None => Err(StoreError::Miss),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes, ttl: Duration) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let expires_at = (!ttl.is_zero()).then(|| Instant::now() + ttl);
            self.entries
                .write()
                .await
                .insert(key.to_owned(), Entry { value, expires_at });
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_what_was_set() {
        let store = MemoryStore::new();
        store
            .set("/a", Bytes::from_static(b"one"), Duration::from_secs(1))
            .await
            .unwrap();
        store
            .set("/a", Bytes::from_static(b"two"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get("/a").await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn absent_key_is_a_miss() {
        let store = MemoryStore::new();
        assert_eq!(store.get("/nope").await, Err(StoreError::Miss));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("/a", Bytes::from_static(b"v"), Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("/a").await.is_ok());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("/a").await, Err(StoreError::Miss));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let store = MemoryStore::new();
        store
            .set("/a", Bytes::from_static(b"v"), Duration::ZERO)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(store.get("/a").await.is_ok());
        assert!(store.remove("/a").await);
        assert!(!store.remove("/a").await);
    }
}
