//! Response caching with request coalescing.
//!
//! [`CacheMiddleware`] sits in a middleware chain in front of an expensive
//! handler. Per request it:
//!
//! 1. derives a key (or skips caching entirely, see [`key`]);
//! 2. replays a stored [`ResponseSnapshot`] on a hit, without calling the
//!    rest of the chain;
//! 3. on a miss, runs the rest of the chain through a [`ResponseCapture`]
//!    so the response is recorded while it is written. Concurrent misses for
//!    the same key are funneled through a [`CoalescingGroup`] so the chain
//!    runs once and every waiting request gets a replay of that one result;
//! 4. stores the snapshot in the [`CacheStore`].
//!
//! Snapshots come from a [`SnapshotPool`] and are reset before reuse.
//! [`MemoryStore`] is an in-process store; anything implementing
//! [`CacheStore`] can stand in for it.

mod capture;
mod config;
mod error;
mod group;
pub mod key;
mod memory;
mod middleware;
mod pool;
mod snapshot;
mod store;

pub use capture::{CapturedResponse, ResponseCapture};
pub use config::CacheConfig;
pub use error::{CacheError, CoalesceError, StoreError};
pub use group::{CoalescingGroup, Follower, Leader, Role};
pub use key::KeyFn;
pub use memory::MemoryStore;
pub use middleware::{CacheMiddleware, CacheMiddlewareBuilder, DownstreamFuture, ErrorHook};
pub use pool::{DEFAULT_POOL_CAPACITY, PooledSnapshot, SnapshotPool};
pub use snapshot::ResponseSnapshot;
pub use store::{CacheStore, StoreFuture};
