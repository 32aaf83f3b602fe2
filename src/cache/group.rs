//! Per-key execution coalescing.
//!
//! [`CoalescingGroup`] makes sure that, for any key, at most one producer is
//! running at a time. The first caller for a key becomes the [`Leader`] and
//! runs the work; callers arriving while it runs become [`Follower`]s and
//! wait for the leader's published value instead of running the work again.
//!
//! Results are handed over through a [`tokio::sync::watch`] channel created
//! per in-flight key: the leader publishes once, every follower reads the
//! same value, and dropping the leader without publishing closes the channel
//! so followers observe [`CoalesceError::LeaderDropped`].

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, time::Instant};
use tracing::trace;

use super::CoalesceError;

/// The in-flight record for one key.
#[derive(Debug)]
struct Slot<T> {
    /// Distinguishes this execution from a later one registered under the
    /// same key after this one was forgotten.
    id: u64,
    started: Instant,
    result: watch::Receiver<Option<T>>,
}

impl<T> Slot<T> {
    fn is_forgotten(&self, forget_after: Option<Duration>, now: Instant) -> bool {
        forget_after.is_some_and(|after| now.duration_since(self.started) >= after)
    }
}

/// Deduplicates concurrent work by key.
///
/// Each cache owns its own group; nothing is process-global.
///
/// When built with a forget duration, an execution stops accepting new
/// followers once it has been running for that long: the next caller starts a
/// fresh execution instead. The original leader keeps running and its
/// existing followers still receive its result.
///
/// # Examples
///
/// ```
/// use herd::cache::CoalescingGroup;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group = CoalescingGroup::new(None);
/// let (value, shared) = group.run("key", || async { 42 }).await.unwrap();
/// assert_eq!(value, 42);
/// assert!(!shared);
/// # }
/// ```
#[derive(Debug)]
pub struct CoalescingGroup<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
    forget_after: Option<Duration>,
    next_id: AtomicU64,
}

/// What a caller has to do after [`CoalescingGroup::join`].
#[derive(Debug)]
pub enum Role<'a, T> {
    /// No execution was in flight: run the work and publish it.
    Leader(Leader<'a, T>),
    /// An execution is in flight: wait for its result.
    Follower(Follower<T>),
}

impl<T> Default for CoalescingGroup<T> {
    fn default() -> Self {
        Self::new(None)
    }
}

impl<T> CoalescingGroup<T> {
    /// Creates an empty group. A zero `forget_after` is treated as none.
    pub fn new(forget_after: Option<Duration>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            forget_after: forget_after.filter(|after| !after.is_zero()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of keys with a joinable execution registered.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }

    /// Stops new callers from joining `key`'s current execution. The
    /// execution itself is not affected.
    pub fn forget(&self, key: &str) {
        self.lock().remove(key);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        // Slots are inserted and removed whole; a poisoned map is still consistent.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `key`'s slot if it still belongs to execution `id`.
    fn release(&self, key: &str, id: u64) {
        let mut slots = self.lock();
        if slots.get(key).is_some_and(|slot| slot.id == id) {
            slots.remove(key);
        }
    }
}

impl<T: Clone> CoalescingGroup<T> {
    /// Registers the caller for `key`, atomically deciding whether it leads a
    /// new execution or follows the one already in flight.
    pub fn join(&self, key: &str) -> Role<'_, T> {
        let now = Instant::now();
        let mut slots = self.lock();

        if let Some(slot) = slots.get(key) {
            if !slot.is_forgotten(self.forget_after, now) {
                trace!(key, id = slot.id, "joining in-flight execution");
                return Role::Follower(Follower {
                    result: slot.result.clone(),
                });
            }
            trace!(key, id = slot.id, "in-flight execution forgotten");
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.to_owned(),
            Slot {
                id,
                started: now,
                result: rx,
            },
        );
        trace!(key, id, "leading new execution");

        Role::Leader(Leader {
            group: self,
            key: key.to_owned(),
            id,
            result: tx,
        })
    }

    /// Runs `producer` once per in-flight key and returns its value together
    /// with a `shared` flag: `false` for the caller that ran the producer,
    /// `true` for callers that received another caller's value.
    ///
    /// # Errors
    ///
    /// Followers receive [`CoalesceError::LeaderDropped`] if the leading
    /// execution was cancelled or panicked. The leader itself never errors.
    pub async fn run<F, Fut>(&self, key: &str, producer: F) -> Result<(T, bool), CoalesceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        match self.join(key) {
            Role::Leader(leader) => {
                let value = producer().await;
                leader.publish(value.clone());
                Ok((value, false))
            }
            Role::Follower(follower) => follower.wait().await.map(|value| (value, true)),
        }
    }
}

/// The caller responsible for running a key's work.
///
/// Dropping a `Leader` without calling [`publish`](Self::publish) (because
/// the request was cancelled or the work panicked) unregisters the execution
/// and fails every follower waiting on it.
#[derive(Debug)]
pub struct Leader<'a, T> {
    group: &'a CoalescingGroup<T>,
    key: String,
    id: u64,
    result: watch::Sender<Option<T>>,
}

impl<T> Leader<'_, T> {
    /// Unregisters the execution and hands `value` to every follower.
    pub fn publish(self, value: T) {
        self.group.release(&self.key, self.id);
        self.result.send_replace(Some(value));
    }
}

impl<T> Drop for Leader<'_, T> {
    fn drop(&mut self) {
        self.group.release(&self.key, self.id);
    }
}

/// A caller waiting on another caller's execution.
#[derive(Debug)]
pub struct Follower<T> {
    result: watch::Receiver<Option<T>>,
}

impl<T: Clone> Follower<T> {
    /// Waits for the leader's value.
    ///
    /// # Errors
    ///
    /// Returns [`CoalesceError::LeaderDropped`] if the leader went away
    /// without publishing.
    pub async fn wait(mut self) -> Result<T, CoalesceError> {
        let published = self
            .result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CoalesceError::LeaderDropped)?;
        published.clone().ok_or(CoalesceError::LeaderDropped)
    }
}
