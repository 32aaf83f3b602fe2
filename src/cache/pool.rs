//! A free list of reusable [`ResponseSnapshot`]s.

use std::{
    mem,
    ops::{Deref, DerefMut},
    sync::{Mutex, MutexGuard, PoisonError},
};

use super::ResponseSnapshot;

/// Default number of idle snapshots a pool keeps.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// A concurrent pool of snapshots shared by every request of one cache.
///
/// [`acquire`](Self::acquire) hands out a snapshot that has already been
/// reset; dropping the returned guard gives it back. Snapshots beyond
/// `capacity` idle entries are freed instead of kept.
///
/// # Examples
///
/// ```
/// use herd::cache::SnapshotPool;
///
/// let pool = SnapshotPool::new(8);
/// {
///     let snapshot = pool.acquire();
///     assert!(snapshot.body().is_empty());
/// }
/// assert_eq!(pool.idle(), 1);
/// ```
#[derive(Debug)]
pub struct SnapshotPool {
    free: Mutex<Vec<ResponseSnapshot>>,
    capacity: usize,
}

impl Default for SnapshotPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}

impl SnapshotPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Takes an idle snapshot (or allocates one), reset and ready to fill.
    pub fn acquire(&self) -> PooledSnapshot<'_> {
        let mut snapshot = self.lock().pop().unwrap_or_default();
        snapshot.reset();
        PooledSnapshot {
            pool: self,
            snapshot,
        }
    }

    /// Number of snapshots waiting for reuse.
    pub fn idle(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, snapshot: ResponseSnapshot) {
        let mut free = self.lock();
        if free.len() < self.capacity {
            free.push(snapshot);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResponseSnapshot>> {
        // The free list holds no invariants a panicking holder could break.
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A snapshot on loan from a [`SnapshotPool`]; returned when dropped.
#[derive(Debug)]
pub struct PooledSnapshot<'a> {
    pool: &'a SnapshotPool,
    snapshot: ResponseSnapshot,
}

impl Deref for PooledSnapshot<'_> {
    type Target = ResponseSnapshot;

    fn deref(&self) -> &ResponseSnapshot {
        &self.snapshot
    }
}

impl DerefMut for PooledSnapshot<'_> {
    fn deref_mut(&mut self) -> &mut ResponseSnapshot {
        &mut self.snapshot
    }
}

impl Drop for PooledSnapshot<'_> {
    fn drop(&mut self) {
        self.pool.release(mem::take(&mut self.snapshot));
    }
}
