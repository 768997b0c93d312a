use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use http::StatusCode;
use tracing::error;

use super::{Middleware, from_fn};

/// Turns a panic in any later stage into a `500 Internal Server Error`.
///
/// The chain is aborted before the failure is suppressed, so no further
/// stage runs. If the panicking stage had already sent the header block,
/// the partial response is left as it is. Register it first.
pub fn recovery() -> impl Middleware {
    from_fn(|ctx| {
        Box::pin(async move {
            let outcome = AssertUnwindSafe(ctx.next()).catch_unwind().await;

            if let Err(panic) = outcome {
                ctx.abort();
                error!(parent: ctx.logger().span(), "middleware panicked: {}", panic_message(&*panic));

                if !ctx.response().header_flushed() {
                    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                    if let Err(e) = ctx.response_mut().flush_header() {
                        error!(parent: ctx.logger().span(), "failed to send 500: {e}");
                    }
                }
            }
        })
    })
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
