//! The response sink contract.
//!
//! A [`ResponseWriter`] is where a handler puts its status line, headers and
//! body. [`Response`](super::Response) implements it as an in-memory sink;
//! [`ResponseCapture`](crate::cache::ResponseCapture) decorates any other
//! writer to record what passes through it.

use std::io;

use super::{Headers, StatusCode};

/// A destination for one HTTP response.
///
/// # Contract
///
/// - Implementations are used by a single request at a time and need no
///   internal locking, but must be `Send` so the request task can move
///   across runtime threads.
/// - [`write`](Self::write) may accept fewer bytes than offered; use
///   [`write_all`](Self::write_all) to push a whole buffer.
pub trait ResponseWriter: Send {
    /// Sets the status code of the response.
    fn write_status(&mut self, status: StatusCode);

    /// Returns the status code written so far (`200 OK` when none was set).
    fn status(&self) -> StatusCode;

    /// Returns the headers written so far.
    fn headers(&self) -> &Headers;

    /// Mutable access to the header set. Values are appended with
    /// [`Headers::insert`], never merged.
    fn headers_mut(&mut self) -> &mut Headers;

    /// Writes body bytes, returning how many were accepted.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the underlying destination refuses the write
    /// (for example, the client went away).
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Writes the whole of `data`, retrying short writes.
    ///
    /// # Errors
    ///
    /// Propagates the first error from [`write`](Self::write), or
    /// [`io::ErrorKind::WriteZero`] if the writer stops accepting bytes.
    fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            match self.write(data)? {
                0 => return Err(io::ErrorKind::WriteZero.into()),
                n => data = &data[n..],
            }
        }
        Ok(())
    }
}

impl<W: ResponseWriter + ?Sized> ResponseWriter for &mut W {
    fn write_status(&mut self, status: StatusCode) {
        (**self).write_status(status);
    }

    fn status(&self) -> StatusCode {
        (**self).status()
    }

    fn headers(&self) -> &Headers {
        (**self).headers()
    }

    fn headers_mut(&mut self) -> &mut Headers {
        (**self).headers_mut()
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        (**self).write(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call.
    struct Trickle {
        chunk: usize,
        headers: Headers,
        body: Vec<u8>,
    }

    impl ResponseWriter for Trickle {
        fn write_status(&mut self, _status: StatusCode) {}

        fn status(&self) -> StatusCode {
            StatusCode::Ok
        }

        fn headers(&self) -> &Headers {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut Headers {
            &mut self.headers
        }

        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let n = data.len().min(self.chunk);
            self.body.extend_from_slice(&data[..n]);
            Ok(n)
        }
    }

    #[test]
    fn write_all_retries_short_writes() {
        let mut w = Trickle {
            chunk: 3,
            headers: Headers::new(),
            body: Vec::new(),
        };
        w.write_all(b"hello world").unwrap();
        assert_eq!(w.body, b"hello world");
    }

    #[test]
    fn write_all_fails_on_zero_progress() {
        let mut w = Trickle {
            chunk: 0,
            headers: Headers::new(),
            body: Vec::new(),
        };
        let err = w.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
