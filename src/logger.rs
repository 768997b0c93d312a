//! Request-scoped logging.
//!
//! keel logs through [`tracing`]. A [`Logger`] is nothing more than the
//! request id plus a span carrying it; every event the context emits is
//! parented to that span, so any subscriber can correlate lines per request.

use tracing::{Span, info_span};

#[derive(Debug, Clone)]
pub struct Logger {
    request_id: String,
    span: Span,
}

impl Logger {
    pub fn new(request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let span = info_span!("request", request_id = %request_id);
        Self { request_id, span }
    }

    /// Replaces this logger with a fresh one for `request_id`.
    pub fn reuse(&mut self, request_id: impl Into<String>) {
        *self = Self::new(request_id);
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for Logger {
    /// A logger with no request id and a disabled span.
    fn default() -> Self {
        Self { request_id: String::new(), span: Span::none() }
    }
}
