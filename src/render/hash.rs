use std::io::{self, Write};

use http::HeaderMap;
use http::header::{ETAG, HeaderValue};
use sha2::{Digest, Sha256, Sha512};

use super::Render;
use crate::error::Error;
use crate::payload::Payload;
use crate::response::BodyWriter;

/// Digest algorithms available to [`HashRender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Hasher {
    Md5,
    #[default]
    Sha256,
    Sha512,
}

impl Hasher {
    /// Lowercase hex digest of `body`.
    pub fn digest(self, body: &[u8]) -> String {
        match self {
            Self::Md5 => format!("{:x}", md5::compute(body)),
            Self::Sha256 => hex::encode(Sha256::digest(body)),
            Self::Sha512 => hex::encode(Sha512::digest(body)),
        }
    }
}

/// Wraps another render and publishes a digest of its output as `ETag`.
///
/// The inner body is buffered in full so the header can precede it.
#[derive(Debug, Clone)]
pub struct HashRender<R> {
    inner: R,
    hasher: Hasher,
}

impl<R: Render> HashRender<R> {
    pub fn new(inner: R, hasher: Hasher) -> Self {
        Self { inner, hasher }
    }
}

impl<R: Render> Render for HashRender<R> {
    fn content_type<'a>(&'a self, current: Option<&'a str>) -> &'a str {
        self.inner.content_type(current)
    }

    fn render<T: Payload + ?Sized>(&self, w: &mut dyn BodyWriter, data: &T) -> Result<(), Error> {
        let body = {
            let mut capture = Capture { target: &mut *w, buf: Vec::new() };
            self.inner.render(&mut capture, data)?;
            capture.buf
        };

        let etag = HeaderValue::try_from(self.hasher.digest(&body))?;
        w.headers_mut().insert(ETAG, etag);
        w.write_all(&body)?;
        Ok(())
    }
}

/// Collects body bytes while exposing the real response headers.
struct Capture<'a> {
    target: &'a mut dyn BodyWriter,
    buf: Vec<u8>,
}

impl Write for Capture<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BodyWriter for Capture<'_> {
    fn headers(&self) -> &HeaderMap {
        self.target.headers()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.target.headers_mut()
    }
}
