//! Cacheable response snapshots and their storage encoding.
//!
//! A snapshot is encoded as a length-prefixed binary frame:
//!
//! ```text
//! "HRD1" | status: u16 | header count: u64 | (name, value)* | body
//! ```
//!
//! where every string and the body are written as a `u64` length followed by
//! the raw bytes. All integers are big-endian.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{CapturedResponse, StoreError};
use crate::http::{Headers, ResponseWriter, StatusCode};

const MAGIC: &[u8; 4] = b"HRD1";

/// The `(status, headers, body)` triple stored in and replayed from the cache.
///
/// Snapshots are pooled: [`reset`](Self::reset) empties one for reuse and
/// [`fill`](Self::fill) / [`decode_from`](Self::decode_from) overwrite it
/// while keeping its allocations. Once filled, a snapshot is only read until
/// it goes back to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
}

impl Default for ResponseSnapshot {
    fn default() -> Self {
        Self {
            status: StatusCode::Ok,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }
}

impl ResponseSnapshot {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Empties the body and header set, keeping their capacity.
    pub fn reset(&mut self) {
        self.status = StatusCode::Ok;
        self.headers.clear();
        self.body.clear();
    }

    /// Copies status, headers and body out of a finished capture.
    pub fn fill(&mut self, captured: &CapturedResponse) {
        self.status = captured.status;
        self.headers.clone_from_headers(&captured.headers);
        self.body.clear();
        self.body.extend_from_slice(&captured.body);
    }

    /// Writes the snapshot to `writer`: status, then each header value
    /// appended in order, then the body.
    ///
    /// # Errors
    ///
    /// Returns the writer's error if the body could not be written. The
    /// status and headers have been handed over by then.
    pub fn replay(&self, writer: &mut dyn ResponseWriter) -> io::Result<()> {
        writer.write_status(self.status);
        let headers = writer.headers_mut();
        for (name, value) in self.headers.iter() {
            headers.insert(name, value);
        }
        writer.write_all(&self.body)
    }

    /// Serializes the snapshot into its storage frame.
    pub fn encode(&self) -> Bytes {
        let header_bytes: usize = self.headers.iter().map(|(n, v)| n.len() + v.len() + 16).sum();
        let mut buf = BytesMut::with_capacity(MAGIC.len() + 2 + 8 + header_bytes + 8 + self.body.len());

        buf.put_slice(MAGIC);
        buf.put_u16(self.status.as_u16());
        buf.put_u64(self.headers.len() as u64);
        for (name, value) in self.headers.iter() {
            put_chunk(&mut buf, name.as_bytes());
            put_chunk(&mut buf, value.as_bytes());
        }
        put_chunk(&mut buf, &self.body);

        buf.freeze()
    }

    /// Overwrites this snapshot with the one encoded in `src`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when the frame is truncated, carries
    /// trailing bytes, has non-UTF-8 header text, or names a status code that
    /// is outside `100..=999`. The snapshot is left reset in that case.
    pub fn decode_from(&mut self, src: &[u8]) -> Result<(), StoreError> {
        self.reset();
        let decoded = self.decode_frame(src);
        if decoded.is_err() {
            self.reset();
        }
        decoded
    }

    fn decode_frame(&mut self, mut src: &[u8]) -> Result<(), StoreError> {
        if src.remaining() < MAGIC.len() || &src[..MAGIC.len()] != MAGIC {
            return Err(malformed("missing frame marker"));
        }
        src.advance(MAGIC.len());

        if src.remaining() < 2 {
            return Err(malformed("truncated status"));
        }
        self.status =
            StatusCode::try_from(src.get_u16()).map_err(|e| StoreError::Decode(e.to_string()))?;

        if src.remaining() < 8 {
            return Err(malformed("truncated header count"));
        }
        let count = src.get_u64();
        for _ in 0..count {
            let name = take_str(&mut src)?;
            let value = take_str(&mut src)?;
            self.headers.insert(name, value);
        }

        let body = take_chunk(&mut src)?;
        self.body.extend_from_slice(body);

        if src.has_remaining() {
            return Err(malformed("trailing bytes after body"));
        }
        Ok(())
    }
}

fn malformed(reason: &str) -> StoreError {
    StoreError::Decode(reason.to_owned())
}

fn put_chunk(buf: &mut BytesMut, chunk: &[u8]) {
    buf.put_u64(chunk.len() as u64);
    buf.put_slice(chunk);
}

fn take_chunk<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], StoreError> {
    if src.remaining() < 8 {
        return Err(malformed("truncated length prefix"));
    }
    let len = src.get_u64();
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= src.len())
        .ok_or_else(|| malformed("length prefix exceeds frame"))?;
    let whole: &'a [u8] = src;
    let (chunk, rest) = whole.split_at(len);
    *src = rest;
    Ok(chunk)
}

fn take_str<'a>(src: &mut &'a [u8]) -> Result<&'a str, StoreError> {
    let chunk = take_chunk(src)?;
    std::str::from_utf8(chunk).map_err(|e| StoreError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Response;

    fn captured() -> CapturedResponse {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "application/json");
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        CapturedResponse {
            status: StatusCode::Created,
            headers,
            body: Bytes::from_static(br#"{"id":7}"#),
        }
    }

    fn filled() -> ResponseSnapshot {
        let mut snapshot = ResponseSnapshot::default();
        snapshot.fill(&captured());
        snapshot
    }

    #[test]
    fn fill_copies_all_fields() {
        let snapshot = filled();
        assert_eq!(snapshot.status(), StatusCode::Created);
        assert_eq!(snapshot.body(), br#"{"id":7}"#);
        assert_eq!(snapshot.headers(), &captured().headers);
    }

    #[test]
    fn reset_clears_body_and_headers() {
        let mut snapshot = filled();
        snapshot.reset();
        assert!(snapshot.body().is_empty());
        assert!(snapshot.headers().is_empty());
        assert_eq!(snapshot.status(), StatusCode::Ok);
    }

    #[test]
    fn decode_restores_encoded_snapshot() {
        let original = filled();
        let mut decoded = ResponseSnapshot::default();
        decoded.decode_from(&original.encode()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_overwrites_previous_contents() {
        let mut target = filled();
        let mut empty = ResponseSnapshot::default();
        empty.fill(&CapturedResponse {
            status: StatusCode::NoContent,
            headers: Headers::new(),
            body: Bytes::new(),
        });
        target.decode_from(&empty.encode()).unwrap();
        assert_eq!(target, empty);
    }

    #[test]
    fn rejects_foreign_bytes() {
        let mut snapshot = filled();
        let err = snapshot.decode_from(b"{\"status\":200}").unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
        assert!(snapshot.body().is_empty());
    }

    #[test]
    fn rejects_truncated_frame() {
        let encoded = filled().encode();
        let mut snapshot = ResponseSnapshot::default();
        let err = snapshot.decode_from(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = BytesMut::from(&filled().encode()[..]);
        encoded.put_u8(0);
        let err = ResponseSnapshot::default().decode_from(&encoded).unwrap_err();
        assert_eq!(err, StoreError::Decode("trailing bytes after body".into()));
    }

    #[test]
    fn rejects_invalid_status() {
        let mut frame = BytesMut::new();
        frame.put_slice(MAGIC);
        frame.put_u16(1000);
        frame.put_u64(0);
        frame.put_u64(0);
        let err = ResponseSnapshot::default().decode_from(&frame).unwrap_err();
        assert!(matches!(err, StoreError::Decode(msg) if msg.contains("1000")));
    }

    #[test]
    fn keeps_unnamed_status() {
        let mut snapshot = ResponseSnapshot::default();
        snapshot.fill(&CapturedResponse {
            status: StatusCode::Other(451),
            headers: Headers::new(),
            body: Bytes::from_static(b"blocked"),
        });
        let mut decoded = ResponseSnapshot::default();
        decoded.decode_from(&snapshot.encode()).unwrap();
        assert_eq!(decoded.status().as_u16(), 451);
        assert_eq!(decoded.body(), b"blocked");
    }

    #[test]
    fn replay_appends_every_header_value() {
        let snapshot = filled();
        let mut client = Response::default();
        client.add_header("Server", "herd");
        snapshot.replay(&mut client).unwrap();

        assert_eq!(client.status(), StatusCode::Created);
        assert_eq!(client.content(), br#"{"id":7}"#);
        let cookies: Vec<_> = client.headers().get_all("set-cookie").collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(client.headers().get("server"), Some("herd"));
    }
}
