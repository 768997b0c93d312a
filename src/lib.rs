//! # keel
//!
//! The request-handling core of an HTTP service: a per-request [`Context`],
//! a middleware pipeline with explicit continuation, and content-negotiated
//! rendering.
//!
//! ## The contract
//!
//! Every request runs through a [`Chain`](middleware::Chain) of middleware
//! built once per route. Each stage either awaits `ctx.next()` to run the
//! rest of the chain, or ends it: rendering a response aborts the chain, and
//! so does `ctx.abort()`. A stage that does neither simply stops the chain
//! where it is.
//!
//! Rendering picks an encoder from the request's `Accept` header unless a
//! `Content-Type` is already set ([`Context::ret`]), or uses an explicit one
//! ([`Context::json`], [`Context::xml`], [`Context::text`], …).
//!
//! What keel leaves to others:
//!
//! - **Route matching**: delegated to [`matchit`]
//! - **TLS, body-size limits, slow clients**: the reverse proxy in front
//! - **Configuration files**: deserialize [`Config`] with any loader
//! - **Log output**: install any `tracing` subscriber
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use keel::middleware::{BoxFuture, recovery, trace};
//! use keel::payload::Data;
//! use keel::{Context, Route, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .wrap(recovery())
//!         .wrap(trace())
//!         .get("/users/{id}", Route::new("users", "show").with(auth).with(show_user));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn auth(ctx: &mut Context) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         if !ctx.has_header("authorization") {
//!             ctx.set_status(http::StatusCode::UNAUTHORIZED);
//!             ctx.abort();
//!             return;
//!         }
//!         ctx.next().await;
//!     })
//! }
//!
//! fn show_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
//!     Box::pin(async move {
//!         let id = ctx.params().get("id").unwrap_or("unknown").to_owned();
//!         let _ = ctx.ret(&Data(serde_json::json!({ "id": id })));
//!     })
//! }
//! ```

mod config;
mod context;
mod error;
mod logger;
mod params;
mod pool;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;
pub mod payload;
pub mod render;

pub use config::Config;
pub use context::{Context, Cursor, Incoming, Value};
pub use error::Error;
pub use logger::Logger;
pub use params::Params;
pub use pool::{ContextPool, Pooled};
pub use response::{BodyWriter, Recorder, Response, ResponseWriter, Sink};
pub use router::{Route, Router};
pub use server::{Dispatcher, Server};
