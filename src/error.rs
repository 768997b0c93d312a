//! Unified error type.

use http::header::{InvalidHeaderName, InvalidHeaderValue};

/// The error type returned by keel's fallible operations.
///
/// Application-level outcomes (404, 422, etc.) are expressed by rendering a
/// response through the [`Context`](crate::Context), not as `Error`s. This
/// type surfaces contract violations on the per-request stores, encoder
/// failures and transport failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A frozen setting was written twice in the same request.
    #[error("frozen key `{0}` is already set")]
    DuplicateKey(String),

    /// A required setting was never bound.
    #[error("key `{0}` does not exist")]
    MissingKey(String),

    /// The payload could not be serialized.
    #[error("{format} encoding failed: {source}")]
    Encode {
        format: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] InvalidHeaderName),

    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] InvalidHeaderValue),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn encode<E>(format: &'static str, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Encode { format, source: Box::new(source) }
    }
}
