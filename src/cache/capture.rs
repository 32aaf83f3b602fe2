//! Dual-write response recording.

use std::{io, mem};

use bytes::{Bytes, BytesMut};

use crate::http::{Headers, ResponseWriter, StatusCode};

/// Everything a handler wrote, detached from the sink it was written to.
///
/// Cloning is cheap for the body (a reference-counted [`Bytes`]); this is the
/// value coalesced followers receive from their leader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: Headers,
    pub body: Bytes,
}

/// A [`ResponseWriter`] decorator that forwards every write to the wrapped
/// sink while keeping a copy of the body.
///
/// Status and headers are read back from the sink, so whatever the handler
/// set is what gets recorded. A capture belongs to one request at a time;
/// [`reset`](Self::reset) rebinds it to the next request's sink.
///
/// # Examples
///
/// ```
/// use herd::cache::ResponseCapture;
/// use herd::http::{Response, ResponseWriter, StatusCode};
///
/// let mut client = Response::default();
/// let mut capture = ResponseCapture::new(&mut client);
/// capture.write_status(StatusCode::Created);
/// capture.write_all(b"made").unwrap();
///
/// let recorded = capture.take_recording();
/// assert_eq!(recorded.status, StatusCode::Created);
/// assert_eq!(&recorded.body[..], b"made");
/// assert_eq!(client.content(), b"made");
/// ```
#[derive(Debug)]
pub struct ResponseCapture<W> {
    sink: W,
    body: BytesMut,
}

impl<W: ResponseWriter> ResponseCapture<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            body: BytesMut::new(),
        }
    }

    /// Clears the recorded body and wraps `sink` instead, returning the
    /// previously wrapped sink.
    pub fn reset(&mut self, sink: W) -> W {
        self.body.clear();
        mem::replace(&mut self.sink, sink)
    }

    /// The body bytes recorded so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Detaches the recording. The capture's body buffer is left empty and
    /// the sink stays bound.
    pub fn take_recording(&mut self) -> CapturedResponse {
        CapturedResponse {
            status: self.sink.status(),
            headers: self.sink.headers().clone(),
            body: self.body.split().freeze(),
        }
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: ResponseWriter> ResponseWriter for ResponseCapture<W> {
    fn write_status(&mut self, status: StatusCode) {
        self.sink.write_status(status);
    }

    fn status(&self) -> StatusCode {
        self.sink.status()
    }

    fn headers(&self) -> &Headers {
        self.sink.headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        self.sink.headers_mut()
    }

    /// Records all of `data`, then forwards it. The recording does not depend
    /// on whether the client accepted the bytes.
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.body.extend_from_slice(data);
        self.sink.write_all(data)?;
        Ok(data.len())
    }
}
