//! Response data and its optional capabilities.
//!
//! Renders accept any [`Payload`]: a serde-serializable value that may also
//! expose one of two optional capabilities.
//!
//! - [`StatusCoder`]: the value carries its own HTTP status code, applied
//!   before the header block is sent.
//! - [`ByteProducer`]: the value already is a byte stream; renders that
//!   honour it copy the bytes verbatim instead of encoding.
//!
//! Capabilities are queried through `as_*` methods that default to `None`,
//! so a type opts in by overriding exactly the ones it supports.
//!
//! ```rust
//! use keel::payload::{Data, Payload, WithStatus};
//! use http::StatusCode;
//!
//! #[derive(serde::Serialize)]
//! struct User { id: u64 }
//!
//! impl Payload for User {}
//!
//! let created = WithStatus::new(StatusCode::CREATED, User { id: 1 });
//! assert_eq!(created.as_status_coder().unwrap().status_code(), StatusCode::CREATED);
//!
//! // Types without their own impl can be wrapped instead.
//! let _ = Data(vec![1, 2, 3]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use bytes::Bytes;
use http::StatusCode;
use serde::{Serialize, Serializer};

/// A value that knows which status code it should be sent with.
pub trait StatusCoder {
    fn status_code(&self) -> StatusCode;
}

/// A value that is already a byte stream.
pub trait ByteProducer {
    fn bytes(&self) -> &[u8];
}

/// Data accepted by every [`Render`](crate::render::Render).
pub trait Payload: Serialize {
    /// `true` for the "no body" value; [`Context::render`](crate::Context::render)
    /// skips the encoder entirely.
    fn is_nil(&self) -> bool {
        false
    }

    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        None
    }

    fn as_byte_producer(&self) -> Option<&dyn ByteProducer> {
        None
    }
}

// ── Forwarding impls ─────────────────────────────────────────────────────────

impl<T: Payload + ?Sized> Payload for &T {
    fn is_nil(&self) -> bool {
        (**self).is_nil()
    }

    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        (**self).as_status_coder()
    }

    fn as_byte_producer(&self) -> Option<&dyn ByteProducer> {
        (**self).as_byte_producer()
    }
}

impl<T: Payload> Payload for Option<T> {
    fn is_nil(&self) -> bool {
        self.as_ref().is_none_or(|inner| inner.is_nil())
    }

    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        self.as_ref().and_then(|inner| inner.as_status_coder())
    }

    fn as_byte_producer(&self) -> Option<&dyn ByteProducer> {
        self.as_ref().and_then(|inner| inner.as_byte_producer())
    }
}

/// The empty body.
impl Payload for () {
    fn is_nil(&self) -> bool {
        true
    }
}

macro_rules! plain_payload {
    ($($ty:ty),* $(,)?) => {
        $(impl Payload for $ty {})*
    };
}

plain_payload!(
    str, String, bool, char,
    i8, i16, i32, i64, i128, isize,
    u8, u16, u32, u64, u128, usize,
    f32, f64,
    serde_json::Value,
);

impl<T: Serialize> Payload for [T] {}
impl<T: Serialize> Payload for Vec<T> {}
impl<K: Serialize + Eq + Hash, V: Serialize> Payload for HashMap<K, V> {}
impl<K: Serialize + Ord, V: Serialize> Payload for BTreeMap<K, V> {}

// ── Wrappers ─────────────────────────────────────────────────────────────────

/// Adapts any serializable value without writing a `Payload` impl.
#[derive(Debug, Clone, Serialize)]
#[serde(transparent)]
pub struct Data<T>(pub T);

impl<T: Serialize> Payload for Data<T> {}

/// Attaches a status code to a payload.
#[derive(Debug, Clone)]
pub struct WithStatus<T> {
    status: StatusCode,
    data: T,
}

impl<T> WithStatus<T> {
    pub fn new(status: StatusCode, data: T) -> Self {
        Self { status, data }
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}

impl<T: Serialize> Serialize for WithStatus<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

impl<T> StatusCoder for WithStatus<T> {
    fn status_code(&self) -> StatusCode {
        self.status
    }
}

impl<T: Payload> Payload for WithStatus<T> {
    fn is_nil(&self) -> bool {
        self.data.is_nil()
    }

    fn as_status_coder(&self) -> Option<&dyn StatusCoder> {
        Some(self)
    }

    fn as_byte_producer(&self) -> Option<&dyn ByteProducer> {
        self.data.as_byte_producer()
    }
}

/// Pre-encoded bytes, copied to the body as they are.
#[derive(Debug, Clone, Default)]
pub struct Raw(pub Bytes);

impl Raw {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }
}

impl Serialize for Raw {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl ByteProducer for Raw {
    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Payload for Raw {
    fn as_byte_producer(&self) -> Option<&dyn ByteProducer> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_and_none_are_nil() {
        assert!(().is_nil());
        assert!(None::<String>.is_nil());
        assert!(!Some("x").is_nil());
        assert!(!"".is_nil());
    }

    #[test]
    fn with_status_forwards_capabilities() {
        let wrapped = WithStatus::new(StatusCode::ACCEPTED, Raw::new("abc"));
        assert_eq!(
            wrapped.as_status_coder().map(|coder| coder.status_code()),
            Some(StatusCode::ACCEPTED)
        );
        assert_eq!(
            wrapped.as_byte_producer().map(|producer| producer.bytes().to_vec()),
            Some(b"abc".to_vec())
        );
    }

    #[test]
    fn references_forward_capabilities() {
        let raw = Raw::new("xyz");
        let by_ref = &raw;
        assert!(by_ref.as_byte_producer().is_some());
        assert!(by_ref.as_status_coder().is_none());
    }
}
