use tracing::info;

use super::{Middleware, from_fn};

/// Logs one line per request: method, path, status and latency.
///
/// Register it first so the latency covers every later stage.
pub fn trace() -> impl Middleware {
    from_fn(|ctx| {
        Box::pin(async move {
            let method = ctx.request().method().clone();
            let path = ctx.request().uri().path().to_owned();

            ctx.next().await;

            info!(
                parent: ctx.logger().span(),
                %method,
                path = %path,
                controller = ctx.controller(),
                action = ctx.action(),
                status = ctx.response().status().as_u16(),
                size = ctx.response().size(),
                elapsed_us = ctx.issued_at().elapsed().as_micros() as u64,
                "request served"
            );
        })
    })
}
