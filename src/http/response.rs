//! HTTP response builder.
//!
//! Provides a fluent builder API for constructing responses and an
//! in-memory [`ResponseWriter`] implementation the pipeline writes into.

use std::io;

use super::{Headers, ResponseWriter, StatusCode};

/// An HTTP response: status, ordered headers and a body.
///
/// Two responses are equal when status, every header value in order, and the
/// body bytes all match.
///
/// # Examples
///
/// ```
/// use herd::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// assert_eq!(response.headers().get("content-type"), Some("application/json"));
/// assert_eq!(response.content(), br#"{"status":"ok"}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the headers set on this response.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the body bytes.
    pub fn content(&self) -> &[u8] {
        &self.body
    }

    /// Streams this response into `writer`: status first, then every header
    /// value in order, then the body.
    ///
    /// # Errors
    ///
    /// Returns the writer's error if the body could not be written.
    pub fn write_to(self, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        writer.write_status(self.status);
        let headers = writer.headers_mut();
        for (name, value) in self.headers.iter() {
            headers.insert(name, value);
        }
        writer.write_all(&self.body)
    }
}

impl ResponseWriter for Response {
    fn write_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    fn status(&self) -> StatusCode {
        self.status
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_every_part() {
        let r = Response::new(StatusCode::NotFound)
            .header("X-Request-Id", "abc-123")
            .body("Not Found");
        assert_eq!(r.status(), StatusCode::NotFound);
        assert_eq!(r.headers().get("x-request-id"), Some("abc-123"));
        assert_eq!(r.content(), b"Not Found");
    }

    #[test]
    fn equality_covers_header_order() {
        let a = Response::new(StatusCode::Ok).header("A", "1").header("B", "2");
        let b = Response::new(StatusCode::Ok).header("B", "2").header("A", "1");
        assert_ne!(a, b);
    }

    #[test]
    fn writer_appends_body_chunks() {
        let mut r = Response::default();
        r.write_status(StatusCode::Accepted);
        r.headers_mut().insert("X-Trace", "1");
        r.write_all(b"par").unwrap();
        r.write_all(b"tial").unwrap();
        assert_eq!(r.status(), StatusCode::Accepted);
        assert_eq!(r.content(), b"partial");
        assert_eq!(r.headers().get("x-trace"), Some("1"));
    }

    #[test]
    fn write_to_copies_everything() {
        let source = Response::new(StatusCode::Created)
            .header("Set-Cookie", "a=1")
            .header("Set-Cookie", "b=2")
            .body("made");
        let mut sink = Response::default();
        source.clone().write_to(&mut sink).unwrap();
        assert_eq!(sink, source);
    }
}
