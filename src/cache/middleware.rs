//! The caching stage of the middleware pipeline.

use std::{future::Future, io, pin::Pin, sync::Arc, time::Duration};

use tracing::{debug, warn};

use super::{
    CacheConfig, CacheError, CacheStore, CapturedResponse, CoalescingGroup, KeyFn,
    ResponseCapture, ResponseSnapshot, Role, SnapshotPool, StoreError, key,
};
use crate::{
    Request, Response,
    context::Context,
    http::ResponseWriter,
    middleware::{Middleware, Next},
};

/// Receives every non-fatal error the cache runs into.
pub type ErrorHook = Arc<dyn Fn(&CacheError) + Send + Sync>;

/// The future a downstream handler returns from [`CacheMiddleware::serve`].
pub type DownstreamFuture<'a> = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'a>>;

/// Response caching with request coalescing.
///
/// For every request the key function decides whether (and under which key)
/// to cache. A stored response is replayed without running the rest of the
/// pipeline. On a miss the pipeline runs once per key, however many requests
/// are waiting on that key: the first one executes it while its response is
/// recorded, the others receive a replay of that recording. The recording is
/// then stored for `ttl`.
///
/// Store and write failures never fail a request; they are logged with
/// `tracing` and passed to the optional error hook.
///
/// Cloning is cheap and clones share the store, the coalescing state and the
/// snapshot pool.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use herd::cache::{CacheMiddleware, MemoryStore};
/// use herd::middleware::{Next, from_middleware, handler_fn};
/// use herd::{Response, StatusCode};
///
/// let cache = CacheMiddleware::builder()
///     .store(Arc::new(MemoryStore::new()))
///     .ttl(Duration::from_secs(30))
///     .forget_after(Duration::from_millis(500))
///     .on_error(|err| eprintln!("cache: {err}"))
///     .build()
///     .expect("store is set");
///
/// let chain = vec![
///     from_middleware(Arc::new(cache)),
///     handler_fn(|_ctx| async { Response::new(StatusCode::Ok).body("expensive") }),
/// ];
/// # let _ = Next::new(chain);
/// ```
#[derive(Clone)]
pub struct CacheMiddleware {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CacheStore>,
    key_fn: KeyFn,
    ttl: Duration,
    coalescing: bool,
    group: CoalescingGroup<CapturedResponse>,
    pool: SnapshotPool,
    on_error: Option<ErrorHook>,
}

impl CacheMiddleware {
    pub fn builder() -> CacheMiddlewareBuilder {
        CacheMiddlewareBuilder::default()
    }

    /// Caches by full request target (path and query) with default settings.
    pub fn by_uri(store: Arc<dyn CacheStore>) -> Self {
        Self::from_parts(store, Arc::new(key::by_uri), CacheConfig::default(), None)
    }

    /// Caches by path only, with default settings. Requests differing only in
    /// their query string share one entry and one handler execution.
    pub fn by_path(store: Arc<dyn CacheStore>) -> Self {
        Self::from_parts(store, Arc::new(key::by_path), CacheConfig::default(), None)
    }

    fn from_parts(
        store: Arc<dyn CacheStore>,
        key_fn: KeyFn,
        config: CacheConfig,
        on_error: Option<ErrorHook>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                key_fn,
                ttl: config.ttl(),
                coalescing: config.coalescing,
                group: CoalescingGroup::new(config.forget_after()),
                pool: SnapshotPool::new(config.pool_capacity),
                on_error,
            }),
        }
    }

    /// Derives the cache key for `request`, `None` meaning "do not cache".
    pub fn key_for(&self, request: &Request) -> Option<String> {
        (self.inner.key_fn)(request)
    }

    /// Answers one request for `key` into `sink`.
    ///
    /// `handler` is the downstream work: it writes a response into the writer
    /// it is given. It runs at most once for this call, and not at all when
    /// the response is replayed from the store or from a concurrent request
    /// for the same key.
    pub async fn serve<W, H>(&self, key: &str, sink: &mut W, handler: H)
    where
        W: ResponseWriter,
        H: for<'w> FnOnce(&'w mut dyn ResponseWriter) -> DownstreamFuture<'w> + Send,
    {
        if self.lookup(key, sink).await {
            return;
        }

        let (recorded, shared) = self.produce(key, sink, handler).await;

        let mut snapshot = self.inner.pool.acquire();
        snapshot.fill(&recorded);

        if shared {
            // The leader stores the entry; a follower only needs its own reply.
            debug!(key, "replaying coalesced response");
            self.reply(key, &snapshot, sink);
            return;
        }

        if let Err(err) = self
            .inner
            .store
            .set(key, snapshot.encode(), self.inner.ttl)
            .await
        {
            self.report(key, CacheError::Store(err));
        }
    }

    /// Replays a stored response into `sink`. Returns `false` when the
    /// request has to be produced.
    async fn lookup<W: ResponseWriter>(&self, key: &str, sink: &mut W) -> bool {
        let mut snapshot = self.inner.pool.acquire();
        let found = match self.inner.store.get(key).await {
            Ok(value) => snapshot.decode_from(&value),
            Err(err) => Err(err),
        };

        match found {
            Ok(()) => {
                debug!(key, status = snapshot.status().as_u16(), "cache hit");
                self.reply(key, &snapshot, sink);
                true
            }
            Err(StoreError::Miss) => {
                debug!(key, "cache miss");
                false
            }
            Err(err) => {
                self.report(key, CacheError::Lookup(err));
                false
            }
        }
    }

    /// Runs the handler (or waits for the request already running it) and
    /// returns the recorded response with its `shared` flag.
    async fn produce<W, H>(&self, key: &str, sink: &mut W, handler: H) -> (CapturedResponse, bool)
    where
        W: ResponseWriter,
        H: for<'w> FnOnce(&'w mut dyn ResponseWriter) -> DownstreamFuture<'w> + Send,
    {
        if !self.inner.coalescing {
            return (self.execute(key, sink, handler).await, false);
        }

        match self.inner.group.join(key) {
            Role::Leader(leader) => {
                debug!(key, "leading handler execution");
                let recorded = self.execute(key, sink, handler).await;
                leader.publish(recorded.clone());
                (recorded, false)
            }
            Role::Follower(follower) => match follower.wait().await {
                Ok(recorded) => (recorded, true),
                Err(err) => {
                    // Nothing to replay; answer this request on its own.
                    self.report(key, CacheError::Coalesce(err));
                    (self.execute(key, sink, handler).await, false)
                }
            },
        }
    }

    /// Runs `handler` against a capture of `sink`.
    async fn execute<W, H>(&self, key: &str, sink: &mut W, handler: H) -> CapturedResponse
    where
        W: ResponseWriter,
        H: for<'w> FnOnce(&'w mut dyn ResponseWriter) -> DownstreamFuture<'w> + Send,
    {
        let mut capture = ResponseCapture::new(sink);
        if let Err(err) = handler(&mut capture).await {
            self.report(key, CacheError::Write(err));
        }
        capture.take_recording()
    }

    fn reply(&self, key: &str, snapshot: &ResponseSnapshot, sink: &mut dyn ResponseWriter) {
        if let Err(err) = snapshot.replay(sink) {
            self.report(key, CacheError::Write(err));
        }
    }

    fn report(&self, key: &str, err: CacheError) {
        warn!(key, error = %err, "response cache degraded");
        if let Some(hook) = &self.inner.on_error {
            hook(&err);
        }
    }
}

impl Middleware for CacheMiddleware {
    /// Serves the request from the cache, or runs the rest of the chain at
    /// most once and records its response.
    ///
    /// Requests the key function rejects go straight to `next`.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let cache = self.clone();
        Box::pin(async move {
            let Some(key) = cache.key_for(ctx.request()) else {
                debug!(path = ctx.request().path(), "not cacheable");
                return next.run(ctx).await;
            };

            let mut response = Response::default();
            cache
                .serve(&key, &mut response, move |sink| {
                    Box::pin(async move { next.run(ctx).await.write_to(sink) })
                })
                .await;
            response
        })
    }
}

/// Builder for [`CacheMiddleware`]. Only the store is required.
#[derive(Default)]
pub struct CacheMiddlewareBuilder {
    store: Option<Arc<dyn CacheStore>>,
    key_fn: Option<KeyFn>,
    config: CacheConfig,
    on_error: Option<ErrorHook>,
}

impl CacheMiddlewareBuilder {
    #[must_use]
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the key function. Defaults to [`key::by_uri`].
    #[must_use]
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Replaces every tunable at once.
    #[must_use]
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.config.ttl_ms = whole_millis(ttl);
        self
    }

    #[must_use]
    pub fn coalescing(mut self, enabled: bool) -> Self {
        self.config.coalescing = enabled;
        self
    }

    /// Stops new requests from joining an execution that has been running for
    /// `after`; they start their own instead.
    #[must_use]
    pub fn forget_after(mut self, after: Duration) -> Self {
        self.config.forget_after_ms = Some(whole_millis(after));
        self
    }

    #[must_use]
    pub fn pool_capacity(mut self, capacity: usize) -> Self {
        self.config.pool_capacity = capacity;
        self
    }

    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&CacheError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// # Errors
    ///
    /// Returns [`CacheError::MissingStore`] if no store was configured.
    pub fn build(self) -> Result<CacheMiddleware, CacheError> {
        let store = self.store.ok_or(CacheError::MissingStore)?;
        let key_fn = self.key_fn.unwrap_or_else(|| Arc::new(key::by_uri));
        Ok(CacheMiddleware::from_parts(
            store,
            key_fn,
            self.config,
            self.on_error,
        ))
    }
}

/// `d` in milliseconds, rounded up: only a zero duration maps to zero.
fn whole_millis(d: Duration) -> u64 {
    let partial = d.subsec_nanos() % 1_000_000 != 0;
    u64::try_from(d.as_millis() + u128::from(partial)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use bytes::Bytes;

    use super::*;
    use crate::{
        StatusCode,
        cache::{MemoryStore, StoreFuture},
    };

    /// A store whose every call fails.
    struct Broken;

    impl CacheStore for Broken {
        fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Bytes> {
            Box::pin(async { Err(StoreError::Backend("connection refused".into())) })
        }

        fn set<'a>(&'a self, _key: &'a str, _value: Bytes, _ttl: Duration) -> StoreFuture<'a, ()> {
            Box::pin(async { Err(StoreError::Backend("connection refused".into())) })
        }
    }

    async fn serve_counted(cache: &CacheMiddleware, key: &str, calls: &Arc<AtomicUsize>) -> Response {
        let calls = Arc::clone(calls);
        let mut response = Response::default();
        cache
            .serve(key, &mut response, move |sink| {
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sink.write_status(StatusCode::Ok);
                    sink.headers_mut().insert("X-Gen", "1");
                    sink.write_all(b"fresh")
                })
            })
            .await;
        response
    }

    #[test]
    fn build_requires_a_store() {
        let err = CacheMiddleware::builder().build().err();
        assert!(matches!(err, Some(CacheError::MissingStore)));
    }

    #[tokio::test]
    async fn serve_miss_then_hit() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheMiddleware::by_uri(store.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = serve_counted(&cache, "/k", &calls).await;
        let second = serve_counted(&cache, "/k", &calls).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(second.content(), b"fresh");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn broken_store_still_answers() {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        let cache = CacheMiddleware::builder()
            .store(Arc::new(Broken))
            .on_error(move |err| seen.lock().unwrap().push(err.to_string()))
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let response = serve_counted(&cache, "/k", &calls).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(response.content(), b"fresh");
        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("get cache"));
        assert!(errors[1].starts_with("set cache"));
    }

    #[tokio::test]
    async fn missing_hook_is_fine() {
        let cache = CacheMiddleware::builder()
            .store(Arc::new(Broken))
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let response = serve_counted(&cache, "/k", &calls).await;
        assert_eq!(response.content(), b"fresh");
    }

    #[test]
    fn durations_round_up_to_whole_millis() {
        assert_eq!(whole_millis(Duration::ZERO), 0);
        assert_eq!(whole_millis(Duration::from_nanos(1)), 1);
        assert_eq!(whole_millis(Duration::from_micros(1500)), 2);
        assert_eq!(whole_millis(Duration::from_millis(250)), 250);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_millisecond_ttl_still_expires() {
        let cache = CacheMiddleware::builder()
            .store(Arc::new(MemoryStore::new()))
            .ttl(Duration::from_micros(500))
            .build()
            .unwrap();
        assert_eq!(cache.inner.ttl, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));

        serve_counted(&cache, "/k", &calls).await;
        tokio::time::advance(Duration::from_secs(3600)).await;
        serve_counted(&cache, "/k", &calls).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sub_millisecond_forget_still_forgets() {
        let cache = CacheMiddleware::builder()
            .store(Arc::new(MemoryStore::new()))
            .forget_after(Duration::from_micros(500))
            .build()
            .unwrap();
        let Role::Leader(_first) = cache.inner.group.join("/k") else {
            panic!("expected leader");
        };

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(matches!(cache.inner.group.join("/k"), Role::Leader(_)));
    }

    #[tokio::test]
    async fn lookup_snapshot_goes_back_to_the_pool() {
        let cache = CacheMiddleware::by_uri(Arc::new(MemoryStore::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            serve_counted(&cache, "/k", &calls).await;
        }
        assert_eq!(cache.inner.pool.idle(), 1);
    }
}
