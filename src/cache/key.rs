//! Cache key derivation.

use std::sync::Arc;

use crate::Request;

/// Maps a request to its cache key, or `None` when the request must bypass
/// the cache entirely.
///
/// Key functions are shared by every request task and may run concurrently;
/// they must not mutate shared state.
pub type KeyFn = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Keys by the full request target, query string included.
pub fn by_uri(request: &Request) -> Option<String> {
    Some(request.uri().to_owned())
}

/// Keys by the path alone; requests that differ only in their query string
/// share one entry.
pub fn by_path(request: &Request) -> Option<String> {
    Some(request.path().to_owned())
}
