//! Outgoing response wrapper and the transport writers behind it.
//!
//! A [`Response`] sits between renders and the wire. It owns the pending
//! header map and status, sends the header block exactly once, and counts
//! body bytes. The actual transport is a boxed [`ResponseWriter`], rebound
//! per request with [`Response::hijack`] so pooled contexts never allocate a
//! new wrapper.
//!
//! ```text
//! Render ──io::Write──▶ Response ──write_head / write_body──▶ ResponseWriter
//!                        │                                      (Recorder, Sink, …)
//!                        └─ status, size, header_flushed
//! ```

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;
use parking_lot::Mutex;
use tracing::warn;

// ── Transport ────────────────────────────────────────────────────────────────

/// The transport-level writer a [`Response`] is bound to.
pub trait ResponseWriter: Send {
    /// Sends the status line and header block.
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()>;

    /// Appends body bytes, returning how many were accepted.
    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A writer that discards everything. Idle pooled contexts are bound to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sink;

impl ResponseWriter for Sink {
    fn write_head(&mut self, _: StatusCode, _: &HeaderMap) -> io::Result<()> {
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

/// Buffers a whole response in memory.
///
/// `Recorder` is a cheap, cloneable handle: the server keeps one clone and
/// hands the other to the context, then converts the recorded data into a
/// hyper response once the pipeline returns. Tests use it the same way.
#[derive(Debug, Default, Clone)]
pub struct Recorder {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Default)]
struct Recorded {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    heads: usize,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The status of the first header block, `200 OK` if none was sent.
    pub fn status(&self) -> StatusCode {
        self.inner.lock().status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> HeaderMap {
        self.inner.lock().headers.clone()
    }

    /// First value of a recorded header, if it is valid UTF-8.
    pub fn header(&self, name: &str) -> Option<String> {
        let inner = self.inner.lock();
        inner.headers.get(name)?.to_str().ok().map(str::to_owned)
    }

    pub fn body(&self) -> Bytes {
        Bytes::copy_from_slice(&self.inner.lock().body)
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().body).into_owned()
    }

    /// How many header blocks reached the transport.
    pub fn head_count(&self) -> usize {
        self.inner.lock().heads
    }

    /// Drains the recording into a hyper-compatible response.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let recorded = std::mem::take(&mut *self.inner.lock());

        let mut res = http::Response::new(Full::new(recorded.body.freeze()));
        *res.status_mut() = recorded.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = recorded.headers;
        res
    }
}

impl ResponseWriter for Recorder {
    fn write_head(&mut self, status: StatusCode, headers: &HeaderMap) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.heads == 0 {
            inner.status = Some(status);
            inner.headers = headers.clone();
        }
        inner.heads += 1;
        Ok(())
    }

    fn write_body(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().body.extend_from_slice(buf);
        Ok(buf.len())
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// Body sink handed to renders: a byte stream plus access to the pending
/// response headers.
pub trait BodyWriter: io::Write {
    fn headers(&self) -> &HeaderMap;
    fn headers_mut(&mut self) -> &mut HeaderMap;
}

/// The response of the request currently being served.
pub struct Response {
    writer: Box<dyn ResponseWriter>,
    headers: HeaderMap,
    status: StatusCode,
    size: usize,
    flushed: bool,
}

impl Response {
    pub fn new(writer: impl ResponseWriter + 'static) -> Self {
        Self {
            writer: Box::new(writer),
            headers: HeaderMap::new(),
            status: StatusCode::OK,
            size: 0,
            flushed: false,
        }
    }

    pub fn header(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Status code set so far, `200 OK` by default.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Records the status to send. Ignored once the header block is out.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.flushed {
            warn!(%status, current = %self.status, "status change after header flush ignored");
            return;
        }
        self.status = status;
    }

    /// Body bytes written so far.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn header_flushed(&self) -> bool {
        self.flushed
    }

    /// Sends the header block unless it was already sent.
    pub fn flush_header(&mut self) -> io::Result<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        self.writer.write_head(self.status, &self.headers)
    }

    /// Rebinds the wrapper to `writer` and resets all bookkeeping, returning
    /// the previous writer.
    pub fn hijack(&mut self, writer: impl ResponseWriter + 'static) -> Box<dyn ResponseWriter> {
        self.headers.clear();
        self.status = StatusCode::OK;
        self.size = 0;
        self.flushed = false;
        std::mem::replace(&mut self.writer, Box::new(writer))
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(Sink)
    }
}

impl io::Write for Response {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.flush_header()?;
        let n = self.writer.write_body(buf)?;
        self.size += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_header()?;
        self.writer.flush()
    }
}

impl BodyWriter for Response {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use http::header::CONTENT_TYPE;

    use super::*;

    #[test]
    fn header_block_is_sent_once() {
        let recorder = Recorder::new();
        let mut res = Response::new(recorder.clone());

        res.flush_header().unwrap();
        res.flush_header().unwrap();
        res.write_all(b"hello").unwrap();

        assert!(res.header_flushed());
        assert_eq!(recorder.head_count(), 1);
        assert_eq!(res.size(), 5);
        assert_eq!(recorder.body_string(), "hello");
    }

    #[test]
    fn status_defaults_to_ok_and_freezes_after_flush() {
        let recorder = Recorder::new();
        let mut res = Response::new(recorder.clone());
        assert_eq!(res.status(), StatusCode::OK);

        res.set_status(StatusCode::CREATED);
        res.write_all(b"x").unwrap();
        res.set_status(StatusCode::NOT_FOUND);

        assert_eq!(res.status(), StatusCode::CREATED);
        assert_eq!(recorder.status(), StatusCode::CREATED);
    }

    #[test]
    fn hijack_resets_bookkeeping() {
        let first = Recorder::new();
        let mut res = Response::new(first.clone());
        res.header_mut().insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        res.set_status(StatusCode::ACCEPTED);
        res.write_all(b"abc").unwrap();

        let second = Recorder::new();
        res.hijack(second.clone());

        assert!(!res.header_flushed());
        assert_eq!(res.size(), 0);
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.header().is_empty());

        res.write_all(b"z").unwrap();
        assert_eq!(first.body_string(), "abc");
        assert_eq!(second.body_string(), "z");
        assert_eq!(second.header("content-type"), None);
    }

    #[test]
    fn recorder_converts_into_http_response() {
        let recorder = Recorder::new();
        let mut res = Response::new(recorder.clone());
        res.header_mut().insert(CONTENT_TYPE, "application/json".parse().unwrap());
        res.set_status(StatusCode::CREATED);
        res.write_all(b"{}").unwrap();

        let http = recorder.into_response();
        assert_eq!(http.status(), StatusCode::CREATED);
        assert_eq!(http.headers()[CONTENT_TYPE], "application/json");
    }
}
