//! Context pooling.
//!
//! [`ContextPool::checkout`] leases a [`Context`] exclusively to one request;
//! dropping the returned [`Pooled`] guard resets the context and checks it
//! back in. Because the guard owns the context while leased, two live
//! requests can never hold the same one.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::context::Context;

pub struct ContextPool {
    idle: Mutex<Vec<Context>>,
    capacity: usize,
}

impl ContextPool {
    /// A pool keeping at most `capacity` idle contexts around. Contexts are
    /// created on demand; surplus ones are dropped on checkin.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self { idle: Mutex::new(Vec::with_capacity(capacity)), capacity })
    }

    pub fn checkout(self: &Arc<Self>) -> Pooled {
        let ctx = self.idle.lock().pop().unwrap_or_else(|| {
            trace!("context pool empty, allocating");
            Context::new()
        });
        Pooled { ctx: Some(ctx), pool: Arc::clone(self) }
    }

    /// Number of idle contexts ready for checkout.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn checkin(&self, mut ctx: Context) {
        ctx.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(ctx);
        }
    }
}

/// A context leased from a [`ContextPool`].
pub struct Pooled {
    ctx: Option<Context>,
    pool: Arc<ContextPool>,
}

impl Deref for Pooled {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx.as_ref().expect("pooled context is present until drop")
    }
}

impl DerefMut for Pooled {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_mut().expect("pooled context is present until drop")
    }
}

impl Drop for Pooled {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.checkin(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkin_resets_and_recycles() {
        let pool = ContextPool::new(2);

        {
            let mut ctx = pool.checkout();
            ctx.set("k", 1u8);
            ctx.set_final("f", 2u8).unwrap();
            ctx.abort();
            assert!(!ctx.is_idle());
        }

        assert_eq!(pool.idle(), 1);
        let ctx = pool.checkout();
        assert!(ctx.is_idle());
        assert_eq!(ctx.get::<u8>("k"), None);
        assert_eq!(ctx.get_final::<u8>("f"), None);
    }

    #[test]
    fn surplus_contexts_are_dropped() {
        let pool = ContextPool::new(1);
        let a = pool.checkout();
        let b = pool.checkout();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
