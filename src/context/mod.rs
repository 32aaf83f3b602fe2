//! Per-request context handed through the middleware pipeline.

use crate::Request;

/// Per-request state passed from one middleware to the next.
///
/// The context owns the parsed [`Request`]; middleware that short-circuits
/// (a cache hit, for instance) simply drops it without calling the rest of
/// the chain.
#[derive(Debug)]
pub struct Context {
    request: Request,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }
}
