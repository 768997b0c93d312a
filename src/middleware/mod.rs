//! The pipeline contract: middleware, chains, and the built-in stages.
//!
//! A middleware is one unit of request processing. It receives the
//! [`Context`] and decides the fate of the rest of the chain:
//!
//! - `ctx.next().await` runs the remaining stages, then returns here;
//! - rendering (or `ctx.abort()`) stops the chain for good;
//! - returning without either silently halts the chain at this stage.
//!
//! # How middleware are stored
//!
//! A [`Chain`] holds stages of *different* concrete types, so each one is
//! kept behind `Arc<dyn Middleware>`. The chain itself is an `Arc<[…]>` built
//! once when the route is registered; every request matching the route shares
//! it read-only, and running a stage costs one `Arc` clone plus one virtual
//! call.
//!
//! ```text
//! fn auth(ctx: &mut Context) -> BoxFuture<'_, ()> { … }   ← user writes this
//!        ↓ Chain::new().with(auth)
//! Arc::new(auth) as Arc<dyn Middleware>                 ← blanket impl
//!        ↓ ctx.next()
//! stage.call(ctx)                                       ← one vtable dispatch
//! ```
//!
//! Closures need a nudge to be inferred as higher-ranked over the context
//! lifetime; wrap them in [`from_fn`]:
//!
//! ```rust
//! use keel::middleware::{Chain, from_fn};
//!
//! let chain = Chain::new()
//!     .with(from_fn(|ctx| Box::pin(async move {
//!         ctx.set("seen", true);
//!         ctx.next().await;
//!     })))
//!     .with(from_fn(|ctx| Box::pin(async move {
//!         let _ = ctx.text("hello");
//!     })));
//! assert_eq!(chain.len(), 2);
//! ```

mod recovery;
mod trace;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;

pub use recovery::recovery;
pub(crate) use recovery::panic_message;
pub use trace::trace;

/// A heap-allocated, type-erased future borrowing the context for `'a`.
///
/// `Send` lets tokio move the request task across worker threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of a request pipeline.
///
/// It is the stage's responsibility to call [`Context::next`] to continue
/// the chain.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()>;
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
        (self)(ctx)
    }
}

/// Pins a closure's signature so it satisfies [`Middleware`].
pub fn from_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, ()> + Send + Sync + 'static,
{
    f
}

/// An ordered, immutable sequence of middleware.
///
/// Builder methods allocate a new backing slice; they are meant for route
/// registration, never for the request path.
#[derive(Clone)]
pub struct Chain {
    stages: Arc<[Arc<dyn Middleware>]>,
}

impl Chain {
    pub fn new() -> Self {
        Self { stages: Arc::from(Vec::new()) }
    }

    /// Appends `middleware`. Returns `self` for chaining.
    pub fn with(self, middleware: impl Middleware) -> Self {
        self.push(Arc::new(middleware))
    }

    /// Appends an already shared middleware.
    pub fn push(self, middleware: Arc<dyn Middleware>) -> Self {
        let mut stages = self.stages.to_vec();
        stages.push(middleware);
        Self { stages: stages.into() }
    }

    /// Appends every stage of `other`, after the stages of `self`.
    pub fn then(self, other: &Chain) -> Self {
        if other.is_empty() {
            return self;
        }
        let mut stages = self.stages.to_vec();
        stages.extend(other.stages.iter().cloned());
        Self { stages: stages.into() }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<dyn Middleware>> {
        self.stages.get(index)
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain").field("len", &self.stages.len()).finish()
    }
}
