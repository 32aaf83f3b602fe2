//! # herd
//!
//! HTTP response caching middleware that keeps a thundering herd of
//! concurrent cache misses from running the same handler more than once.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use herd::cache::{CacheMiddleware, MemoryStore};
//! use herd::context::Context;
//! use herd::middleware::{Next, from_middleware, handler_fn};
//! use herd::{Request, Response, StatusCode};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cache = CacheMiddleware::by_path(Arc::new(MemoryStore::new()));
//! let chain = vec![
//!     from_middleware(Arc::new(cache)),
//!     handler_fn(|_ctx| async { Response::new(StatusCode::Ok).body("rendered") }),
//! ];
//!
//! let (request, _) = Request::parse(b"GET /report?page=2 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
//! let response = Next::new(chain).run(Context::new(request)).await;
//! assert_eq!(response.content(), b"rendered");
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod http;
pub mod middleware;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheConfig, CacheError, CacheMiddleware, CacheStore, MemoryStore};
pub use http::{Headers, Method, Request, Response, ResponseWriter, StatusCode};
