//! Response writing.
//!
//! Handlers write through the [`ResponseWriter`] trait rather than building
//! `http::Response` values directly, so middleware can interpose. The
//! server supplies a [`ResponseBuffer`] per request and converts it into
//! the wire response once the chain returns; [`ResponseRecorder`] wraps any
//! writer to selectively buffer the body for handlers that post-process
//! responses.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

/// The write side of a request exchange.
pub trait ResponseWriter: Send {
    /// Response headers, mutable until the header is written.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Response headers, read-only.
    fn headers(&self) -> &HeaderMap;

    /// Commit the status line. Subsequent calls are ignored.
    fn write_header(&mut self, status: StatusCode);

    /// Append body bytes, committing a 200 header first if none was
    /// written. Returns the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    /// The committed status, if any.
    fn status(&self) -> Option<StatusCode>;
}

/// The server-level writer: accumulates status, headers, and body, and
/// converts into the hyper response.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total body bytes written so far.
    pub fn size(&self) -> usize {
        self.body.len()
    }

    /// Finish the exchange: an untouched buffer becomes an empty 200.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut resp = http::Response::new(Full::new(self.body.freeze()));
        *resp.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *resp.headers_mut() = self.headers;
        resp
    }
}

impl ResponseWriter for ResponseBuffer {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_some() {
            tracing::debug!(status = %status, "superfluous write_header ignored");
            return;
        }
        self.status = Some(status);
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        self.body.extend_from_slice(data);
        data.len()
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

/// Predicate deciding whether a response should be buffered or streamed
/// through to the underlying writer.
pub type ShouldBuffer = Box<dyn Fn(StatusCode, &HeaderMap) -> bool + Send>;

/// Wraps a writer and selectively buffers the body.
///
/// The decision is made once, at `write_header` time, from the status and
/// the headers accumulated so far. While buffering, nothing reaches the
/// inner writer until [`ResponseRecorder::flush`].
pub struct ResponseRecorder<'a> {
    inner: &'a mut dyn ResponseWriter,
    should_buffer: ShouldBuffer,
    buf: BytesMut,
    status: Option<StatusCode>,
    size: usize,
    buffered: bool,
}

impl<'a> ResponseRecorder<'a> {
    pub fn new(inner: &'a mut dyn ResponseWriter, should_buffer: ShouldBuffer) -> Self {
        Self {
            inner,
            should_buffer,
            buf: BytesMut::new(),
            status: None,
            size: 0,
            buffered: false,
        }
    }

    /// Whether the body was captured rather than streamed.
    pub fn buffered(&self) -> bool {
        self.buffered
    }

    /// Body bytes written through this recorder.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The captured body (empty when streaming).
    pub fn body(&self) -> &[u8] {
        &self.buf
    }

    /// Write the captured status and body through to the inner writer.
    pub fn flush(self) {
        if let Some(status) = self.status {
            self.inner.write_header(status);
        }
        if self.buffered && !self.buf.is_empty() {
            self.inner.write(&self.buf);
        }
    }
}

impl ResponseWriter for ResponseRecorder<'_> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.status.is_some() {
            return;
        }
        self.status = Some(status);
        self.buffered = (self.should_buffer)(status, self.inner.headers());
        if !self.buffered {
            self.inner.write_header(status);
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if self.status.is_none() {
            self.write_header(StatusCode::OK);
        }
        let n = if self.buffered {
            self.buf.extend_from_slice(data);
            data.len()
        } else {
            self.inner.write(data)
        };
        self.size += n;
        n
    }

    fn status(&self) -> Option<StatusCode> {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_defaults_to_200() {
        let mut w = ResponseBuffer::new();
        w.write(b"hello");
        assert_eq!(w.status(), Some(StatusCode::OK));
        let resp = w.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn second_write_header_is_ignored() {
        let mut w = ResponseBuffer::new();
        w.write_header(StatusCode::NOT_FOUND);
        w.write_header(StatusCode::OK);
        assert_eq!(w.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn recorder_buffers_when_predicate_says_so() {
        let mut inner = ResponseBuffer::new();
        let mut rec = ResponseRecorder::new(&mut inner, Box::new(|status, _| status.is_client_error()));
        rec.write_header(StatusCode::NOT_FOUND);
        rec.write(b"missing");
        assert!(rec.buffered());
        assert_eq!(rec.size(), 7);
        assert_eq!(rec.body(), b"missing");
        // nothing reached the inner writer yet
        assert_eq!(inner.size(), 0);
        assert_eq!(inner.status(), None);
    }

    #[test]
    fn recorder_streams_when_predicate_declines() {
        let mut inner = ResponseBuffer::new();
        let mut rec = ResponseRecorder::new(&mut inner, Box::new(|status, _| status.is_client_error()));
        rec.write_header(StatusCode::OK);
        rec.write(b"content");
        assert!(!rec.buffered());
        assert_eq!(rec.size(), 7);
        assert_eq!(inner.size(), 7);
        assert_eq!(inner.status(), Some(StatusCode::OK));
    }

    #[test]
    fn recorder_flush_replays_into_inner() {
        let mut inner = ResponseBuffer::new();
        let mut rec = ResponseRecorder::new(&mut inner, Box::new(|_, _| true));
        rec.write(b"payload");
        rec.flush();
        assert_eq!(inner.status(), Some(StatusCode::OK));
        assert_eq!(inner.size(), 7);
    }
}
