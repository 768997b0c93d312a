//! Built-in Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! Both are ordinary middleware; register them as the single stage of a route:
//!
//! ```rust
//! use keel::{Route, Router, health};
//!
//! let app = Router::new()
//!     .get("/healthz", Route::new("health", "liveness").with(health::liveness))
//!     .get("/readyz", Route::new("health", "readiness").with(health::readiness));
//! ```
//!
//! Replace `readiness` with your own stage if the pod must gate on
//! dependency availability (database connections, downstream services, etc.).

use crate::context::Context;
use crate::middleware::BoxFuture;

/// Always answers `200 OK` with body `"ok"`.
pub fn liveness(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let _ = ctx.text("ok");
    })
}

/// Answers `200 OK` with body `"ready"`.
pub fn readiness(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let _ = ctx.text("ready");
    })
}
