//! Route table: turns a method + path into the chain that serves it.
//!
//! One radix tree per HTTP method, O(path-length) lookup via [`matchit`].
//! Every registered [`Route`] gets its final chain assembled once, at
//! registration: the router-wide middleware first, then the route's own
//! stages. Requests only ever clone an `Arc`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::context::Context;
use crate::middleware::{BoxFuture, Chain, Middleware};

/// A chain plus optional terminal handler, named by controller and action.
///
/// The terminal handler runs after the chain only when no stage aborted and
/// nothing was sent yet; see [`Context::run`].
#[derive(Clone)]
pub struct Route {
    pub(crate) controller: String,
    pub(crate) action: String,
    pub(crate) chain: Chain,
    pub(crate) terminal: Option<Arc<dyn Middleware>>,
}

impl Route {
    pub fn new(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            action: action.into(),
            chain: Chain::new(),
            terminal: None,
        }
    }

    /// Appends a stage to this route's chain.
    pub fn with(mut self, middleware: impl Middleware) -> Self {
        self.chain = self.chain.with(middleware);
        self
    }

    /// Sets the handler that runs when the chain falls through.
    pub fn terminal(mut self, handler: impl Middleware) -> Self {
        self.terminal = Some(Arc::new(handler));
        self
    }

    pub fn controller(&self) -> &str {
        &self.controller
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    fn behind(&self, middleware: &Chain) -> Self {
        Self {
            chain: middleware.clone().then(&self.chain),
            ..self.clone()
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("controller", &self.controller)
            .field("action", &self.action)
            .field("chain", &self.chain)
            .field("terminal", &self.terminal.is_some())
            .finish()
    }
}

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Every builder method returns `self` so registrations chain naturally.
///
/// ```rust
/// use keel::{Route, Router};
/// use keel::middleware::{from_fn, trace};
///
/// let app = Router::new()
///     .wrap(trace())
///     .get("/users/{id}", Route::new("users", "show").with(from_fn(|ctx| Box::pin(async move {
///         let id = ctx.params().get("id").unwrap_or_default().to_owned();
///         let _ = ctx.text(&id);
///     }))));
/// ```
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
    middleware: Chain,
    fallback: Route,
    fallback_chain: Arc<Route>,
}

impl Router {
    pub fn new() -> Self {
        let fallback = Route::new("", "").terminal(not_found);
        Self {
            routes: HashMap::new(),
            middleware: Chain::new(),
            fallback_chain: Arc::new(fallback.clone()),
            fallback,
        }
    }

    /// Adds a middleware in front of every route registered *after* this
    /// call, and in front of the fallback.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        self.middleware = self.middleware.with(middleware);
        self.fallback_chain = Arc::new(self.fallback.behind(&self.middleware));
        self
    }

    /// Serves unmatched requests. Defaults to a bare `404 Not Found`.
    pub fn fallback(mut self, route: Route) -> Self {
        self.fallback_chain = Arc::new(route.behind(&self.middleware));
        self.fallback = route;
        self
    }

    /// Registers `route` for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; `ctx.params().get("name")`
    /// retrieves them.
    ///
    /// # Panics
    ///
    /// Panics if `path` is malformed or conflicts with an existing route.
    pub fn on(mut self, method: Method, path: &str, route: Route) -> Self {
        let route = Arc::new(route.behind(&self.middleware));
        self.routes
            .entry(method)
            .or_default()
            .insert(path, route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, route: Route) -> Self {
        self.on(Method::GET, path, route)
    }

    pub fn post(self, path: &str, route: Route) -> Self {
        self.on(Method::POST, path, route)
    }

    pub fn put(self, path: &str, route: Route) -> Self {
        self.on(Method::PUT, path, route)
    }

    pub fn patch(self, path: &str, route: Route) -> Self {
        self.on(Method::PATCH, path, route)
    }

    pub fn delete(self, path: &str, route: Route) -> Self {
        self.on(Method::DELETE, path, route)
    }

    /// Finds the route for a request, falling back to the fallback route.
    pub fn lookup(&self, method: &Method, path: &str) -> (Arc<Route>, HashMap<String, String>) {
        let matched = self
            .routes
            .get(method)
            .and_then(|tree| tree.at(path).ok());

        match matched {
            Some(m) => {
                let params = m
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect();
                (Arc::clone(m.value), params)
            }
            None => (Arc::clone(&self.fallback_chain), HashMap::new()),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move { ctx.set_status(StatusCode::NOT_FOUND) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::from_fn;

    fn pass(ctx: &mut Context) -> BoxFuture<'_, ()> {
        Box::pin(async move { ctx.next().await })
    }

    #[test]
    fn router_middleware_is_prepended_at_registration() {
        let router = Router::new()
            .get("/before", Route::new("a", "before").with(pass))
            .wrap(pass)
            .get("/users/{id}", Route::new("users", "show").with(pass).with(pass));

        let (route, params) = router.lookup(&Method::GET, "/users/7");
        assert_eq!(route.controller(), "users");
        assert_eq!(route.action(), "show");
        assert_eq!(route.chain().len(), 3);
        assert_eq!(params.get("id").map(String::as_str), Some("7"));

        let (before, _) = router.lookup(&Method::GET, "/before");
        assert_eq!(before.chain().len(), 1);
    }

    #[test]
    fn unmatched_requests_use_the_fallback() {
        let router = Router::new().wrap(pass);

        let (route, params) = router.lookup(&Method::POST, "/nowhere");
        assert!(params.is_empty());
        assert!(route.has_terminal());
        assert_eq!(route.chain().len(), 1);

        let router = router.fallback(Route::new("errors", "missing").with(from_fn(|ctx| {
            Box::pin(async move {
                let _ = ctx.text("gone");
            })
        })));
        let (route, _) = router.lookup(&Method::GET, "/");
        assert_eq!(route.controller(), "errors");
        assert_eq!(route.chain().len(), 2);
    }
}
