//! The per-request execution context.
//!
//! A [`Context`] carries everything one request needs while it travels
//! through its chain: the request, the response wrapper, two request-scoped
//! stores, the logger, and the cursor driving the pipeline.
//!
//! # Pipeline cursor
//!
//! ```text
//! NotStarted ──next()──▶ At(0) ──next()──▶ At(1) … ──next()──▶ At(len)
//!      │                   │                  │                  │
//!      └───────────────────┴──── abort() ─────┴──────────────────┴──▶ Terminated
//! ```
//!
//! The cursor only moves forward within a request. `Terminated` is final:
//! `next()` after it logs a warning and does nothing.
//!
//! # Reuse
//!
//! Contexts are pooled. [`Context::run`] and [`Context::reset`] rebuild every
//! field, so nothing of one request is visible to the next:
//!
//! | Field | On `run` | On `reset` |
//! |---|---|---|
//! | response | hijacked to the request's writer | hijacked to [`Sink`] |
//! | request, params | replaced | emptied |
//! | logger | re-created with the request id | disabled logger |
//! | controller, action | copied from the route | cleared |
//! | settings, frozen settings | cleared | cleared |
//! | chain | the route's chain | empty |
//! | cursor | `NotStarted`, then driven | `NotStarted` |
//! | issued_at | now | now |

use std::any::Any;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use http::{Method, Request, StatusCode};
use parking_lot::RwLock;
use tracing::{debug, error, warn};
use url::{Position, Url};

use crate::error::Error;
use crate::logger::Logger;
use crate::middleware::{BoxFuture, Chain};
use crate::params::Params;
use crate::payload::Payload;
use crate::render::{
    self, HashRender, Hasher, JsonRender, JsonpRender, Negotiated, Render,
    TextRender, XmlRender,
};
use crate::response::{Response, ResponseWriter, Sink};
use crate::router::Route;

/// A value bound in one of the request-scoped stores.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Position of the pipeline within its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cursor {
    #[default]
    NotStarted,
    /// Currently at stage `n`. `At(chain.len())` means the chain ran out.
    At(usize),
    Terminated,
}

/// Inbound data for one [`Context::run`].
#[derive(Debug, Default)]
pub struct Incoming {
    pub request: Request<Bytes>,
    pub params: Params,
    pub request_id: String,
}

pub struct Context {
    response: Response,
    request: Request<Bytes>,
    params: Params,
    logger: Logger,
    controller: String,
    action: String,
    settings: RwLock<HashMap<String, Value>>,
    frozen: RwLock<HashMap<String, Value>>,
    chain: Chain,
    cursor: Cursor,
    issued_at: Instant,
}

impl Context {
    pub fn new() -> Self {
        Self {
            response: Response::default(),
            request: Request::default(),
            params: Params::default(),
            logger: Logger::default(),
            controller: String::new(),
            action: String::new(),
            settings: RwLock::new(HashMap::new()),
            frozen: RwLock::new(HashMap::new()),
            chain: Chain::new(),
            cursor: Cursor::NotStarted,
            issued_at: Instant::now(),
        }
    }

    // ── Identification ───────────────────────────────────────────────────────

    /// Controller name of the matched route.
    pub fn controller(&self) -> &str {
        &self.controller
    }

    /// Action name of the matched route.
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn request_id(&self) -> &str {
        self.logger.request_id()
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    /// Path and query as sent by the client.
    pub fn request_uri(&self) -> &str {
        self.request
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// When the current request entered [`run`](Self::run).
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    // ── Settings ─────────────────────────────────────────────────────────────

    /// Binds `value` to `key` for the rest of the request, replacing any
    /// previous value.
    pub fn set<V: Any + Send + Sync>(&self, key: impl Into<String>, value: V) {
        self.settings.write().insert(key.into(), Arc::new(value));
    }

    /// Returns the value bound to `key`, if it exists and is a `V`.
    pub fn get<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.settings.read().get(key)?.downcast_ref::<V>().cloned()
    }

    /// Returns the type-erased value bound to `key`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.settings.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.settings.read().contains_key(key)
    }

    /// Like [`get`](Self::get), for values the request cannot do without.
    ///
    /// A missing key is a programming error: it is logged, the chain is
    /// aborted, and [`Error::MissingKey`] is returned. Callers propagate it
    /// or treat it as a defect.
    pub fn must_get<V: Any + Clone>(&mut self, key: &str) -> Result<V, Error> {
        match self.get(key) {
            Some(v) => Ok(v),
            None => Err(self.violation(Error::MissingKey(key.to_owned()))),
        }
    }

    /// Binds `value` to `key` in the frozen store. A key can be frozen only
    /// once per request; a second attempt fails with
    /// [`Error::DuplicateKey`] and keeps the first value.
    pub fn set_final<V: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: V,
    ) -> Result<(), Error> {
        match self.frozen.write().entry(key.into()) {
            Entry::Occupied(e) => Err(Error::DuplicateKey(e.key().clone())),
            Entry::Vacant(e) => {
                e.insert(Arc::new(value));
                Ok(())
            }
        }
    }

    pub fn get_final<V: Any + Clone>(&self, key: &str) -> Option<V> {
        self.frozen.read().get(key)?.downcast_ref::<V>().cloned()
    }

    pub fn get_final_value(&self, key: &str) -> Option<Value> {
        self.frozen.read().get(key).cloned()
    }

    /// [`set_final`](Self::set_final) for keys that must not be frozen yet;
    /// a duplicate is logged and aborts the chain.
    pub fn must_set_final<V: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        value: V,
    ) -> Result<(), Error> {
        self.set_final(key, value).map_err(|e| self.violation(e))
    }

    /// [`get_final`](Self::get_final) for keys that must exist; see
    /// [`must_get`](Self::must_get).
    pub fn must_get_final<V: Any + Clone>(&mut self, key: &str) -> Result<V, Error> {
        match self.get_final(key) {
            Some(v) => Ok(v),
            None => Err(self.violation(Error::MissingKey(key.to_owned()))),
        }
    }

    fn violation(&mut self, err: Error) -> Error {
        error!(parent: self.logger.span(), "contract violation: {err}");
        self.abort();
        err
    }

    // ── Headers and status ───────────────────────────────────────────────────

    /// Whether the request carries a header named exactly `key`.
    ///
    /// Names are compared as stored, without canonicalization.
    pub fn has_raw_header(&self, key: &str) -> bool {
        self.request.headers().keys().any(|name| name.as_str() == key)
    }

    /// All values of the header named exactly `key`, joined with `,`.
    pub fn raw_header(&self, key: &str) -> Option<String> {
        let headers = self.request.headers();
        let name = headers.keys().find(|name| name.as_str() == key)?;
        let values: Vec<_> = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .collect();
        Some(values.join(","))
    }

    /// Whether the request carries `key`, matched case-insensitively.
    pub fn has_header(&self, key: &str) -> bool {
        self.request.headers().contains_key(key)
    }

    /// First value of request header `key`, matched case-insensitively.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.request.headers().get(key)?.to_str().ok()
    }

    /// Appends a response header.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let (name, value) = (HeaderName::try_from(key)?, HeaderValue::try_from(value)?);
        self.response.header_mut().append(name, value);
        Ok(())
    }

    /// Sets a response header, replacing existing values.
    pub fn set_header(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let (name, value) = (HeaderName::try_from(key)?, HeaderValue::try_from(value)?);
        self.response.header_mut().insert(name, value);
        Ok(())
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.response.set_status(status);
    }

    // ── Responses ────────────────────────────────────────────────────────────

    /// Redirects to `location` and aborts the chain.
    ///
    /// Uses `302 Found` unless the response already carries `301`, `303` or
    /// `307`. A location without scheme or host is resolved against the
    /// request path and cleaned, so `edit` sent from `/users/1/show` becomes
    /// `/users/1/edit`.
    pub fn redirect(&mut self, location: &str) -> Result<(), Error> {
        self.abort();
        let location = self.resolve_location(location);
        let location = location.as_str();

        let current = self.response.status();
        let status = if [
            StatusCode::MOVED_PERMANENTLY,
            StatusCode::SEE_OTHER,
            StatusCode::TEMPORARY_REDIRECT,
        ]
        .contains(&current)
        {
            current
        } else {
            StatusCode::FOUND
        };

        self.response.header_mut().insert(LOCATION, HeaderValue::try_from(location)?);
        self.response.set_status(status);

        let method = self.request.method();
        let with_body = method == Method::GET;
        if with_body || method == Method::HEAD {
            self.response.header_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            );
        }

        self.response.flush_header()?;
        if with_body {
            let reason = status.canonical_reason().unwrap_or_default();
            let body = format!("<a href=\"{}\">{reason}</a>.\n", escape_html(location));
            self.response.write_all(body.as_bytes())?;
        }
        Ok(())
    }

    fn resolve_location(&self, location: &str) -> String {
        if location.starts_with("//") || Url::parse(location).is_ok() {
            return location.to_owned();
        }

        let resolved = Url::parse("http://localhost")
            .and_then(|base| base.join(self.request.uri().path()))
            .and_then(|base| base.join(location));
        match resolved {
            Ok(resolved) => resolved[Position::BeforePath..].to_owned(),
            Err(e) => {
                debug!(parent: self.logger.span(), location, "redirect location left as is: {e}");
                location.to_owned()
            }
        }
    }

    /// Responds with `data`, choosing the encoding from `Accept` unless a
    /// `Content-Type` was already set.
    pub fn ret<T: Payload + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        let render = self.negotiate();
        self.render(render, data)
    }

    /// Like [`ret`](Self::ret), and publishes a digest of the body as `ETag`.
    ///
    /// A nil payload is rendered as an empty string, so the `ETag` is always
    /// present.
    pub fn hashed_ret<T: Payload + ?Sized>(&mut self, hasher: Hasher, data: &T) -> Result<(), Error> {
        let render = HashRender::new(self.negotiate(), hasher);
        if data.is_nil() {
            if let Some(coder) = data.as_status_coder() {
                self.response.set_status(coder.status_code());
            }
            return self.render(render, "");
        }
        self.render(render, data)
    }

    /// Responds with `text/plain`.
    pub fn text<T: Payload + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        self.render(TextRender, data)
    }

    /// Responds with `application/json`.
    pub fn json<T: Payload + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        self.render(JsonRender, data)
    }

    /// Responds with `application/javascript`, JSON wrapped in `callback(…)`.
    pub fn jsonp<T: Payload + ?Sized>(&mut self, callback: &str, data: &T) -> Result<(), Error> {
        self.render(JsonpRender::new(callback), data)
    }

    /// Responds with `text/xml`.
    pub fn xml<T: Payload + ?Sized>(&mut self, data: &T) -> Result<(), Error> {
        self.render(XmlRender, data)
    }

    /// Writes `data` through `render`. Every response-producing method ends
    /// here.
    ///
    /// The chain is aborted first, whatever the outcome. A status carried by
    /// `data` is applied, `Content-Type` is set from the render, and the
    /// header block goes out with the first body byte (or right away for a
    /// nil payload, in which case the encoder is never invoked). Encoder
    /// failures are logged and returned; the response may be partially sent
    /// by then and must not be rendered again.
    pub fn render<R, T>(&mut self, render: R, data: &T) -> Result<(), Error>
    where
        R: Render,
        T: Payload + ?Sized,
    {
        self.abort();

        if let Some(coder) = data.as_status_coder() {
            self.response.set_status(coder.status_code());
        }

        let current = self
            .response
            .header()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let content_type = HeaderValue::try_from(render.content_type(current.as_deref()))?;
        self.response.header_mut().insert(CONTENT_TYPE, content_type);

        if data.is_nil() {
            self.response.flush_header()?;
            return Ok(());
        }

        let rendered = render.render(&mut self.response, data);
        let flushed = self.response.flush_header();

        if let Err(e) = rendered {
            error!(
                parent: self.logger.span(),
                render = std::any::type_name::<R>(),
                "render failed: {e}"
            );
            return Err(e);
        }
        flushed?;
        Ok(())
    }

    fn negotiate(&self) -> Negotiated {
        if self.response.header().contains_key(CONTENT_TYPE) {
            return Negotiated::Default;
        }
        match self.header(http::header::ACCEPT.as_str()) {
            Some(accept) => render::negotiate(accept),
            None => Negotiated::Default,
        }
    }

    // ── Pipeline ─────────────────────────────────────────────────────────────

    /// Runs the rest of the chain. Only meaningful inside middleware.
    pub fn next(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let position = match self.cursor {
                Cursor::NotStarted => 0,
                Cursor::At(n) => (n + 1).min(self.chain.len()),
                Cursor::Terminated => {
                    warn!(parent: self.logger.span(), "no more executor in the chain");
                    return;
                }
            };
            self.cursor = Cursor::At(position);

            match self.chain.get(position).cloned() {
                Some(stage) => stage.call(self).await,
                None => debug!(parent: self.logger.span(), "chain exhausted"),
            }
        })
    }

    /// Stops the chain: no later stage will run for this request.
    pub fn abort(&mut self) {
        self.cursor = Cursor::Terminated;
    }

    pub fn is_aborted(&self) -> bool {
        self.cursor == Cursor::Terminated
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Serves one request with `route`, writing to `writer`.
    ///
    /// Rebinds the response, replaces all per-request state (see the module
    /// docs) and starts the chain. When the chain returns without having been
    /// aborted, the route's terminal handler runs, unless a stage already
    /// sent the header block. If nothing was sent at all, the current status
    /// goes out as a bare response. The cursor ends `Terminated`.
    pub async fn run(
        &mut self,
        writer: impl ResponseWriter + 'static,
        incoming: Incoming,
        route: &Route,
    ) {
        self.response.hijack(writer);
        self.request = incoming.request;
        self.params = incoming.params;
        self.logger.reuse(incoming.request_id);
        self.controller.clone_from(&route.controller);
        self.action.clone_from(&route.action);
        self.settings.get_mut().clear();
        self.frozen.get_mut().clear();
        self.chain = route.chain.clone();
        self.issued_at = Instant::now();
        self.cursor = Cursor::NotStarted;

        self.next().await;

        if !self.is_aborted() {
            self.abort();

            if let Some(terminal) = route.terminal.as_ref() {
                if !self.response.header_flushed() {
                    terminal.call(self).await;
                }
            }
        }

        if !self.response.header_flushed() {
            if let Err(e) = self.response.flush_header() {
                warn!(parent: self.logger.span(), "failed to send bare status: {e}");
            }
        }
    }

    /// Clears every field, leaving the context idle and bound to [`Sink`].
    pub fn reset(&mut self) {
        self.response.hijack(Sink);
        self.request = Request::default();
        self.params.clear();
        self.logger = Logger::default();
        self.controller.clear();
        self.action.clear();
        self.settings.get_mut().clear();
        self.frozen.get_mut().clear();
        self.chain = Chain::new();
        self.issued_at = Instant::now();
        self.cursor = Cursor::NotStarted;
    }

    /// Whether the context holds no request-scoped state.
    pub fn is_idle(&self) -> bool {
        self.cursor == Cursor::NotStarted
            && self.chain.is_empty()
            && self.settings.read().is_empty()
            && self.frozen.read().is_empty()
            && self.params.is_empty()
            && self.controller.is_empty()
            && self.action.is_empty()
            && self.request_id().is_empty()
            && !self.response.header_flushed()
            && self.response.header().is_empty()
            && self.response.size() == 0
            && self.response.status() == StatusCode::OK
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_round_trip() {
        let ctx = Context::new();
        ctx.set("user", String::from("alice"));

        assert_eq!(ctx.get::<String>("user").as_deref(), Some("alice"));
        assert_eq!(ctx.get::<u32>("user"), None);
        assert!(ctx.contains("user"));
        assert!(ctx.get_value("missing").is_none());
    }

    #[test]
    fn frozen_keys_are_write_once() {
        let ctx = Context::new();
        ctx.set_final("tenant", 1u32).unwrap();

        let err = ctx.set_final("tenant", 2u32).unwrap_err();

        assert!(matches!(err, Error::DuplicateKey(ref k) if k == "tenant"));
        assert_eq!(ctx.get_final::<u32>("tenant"), Some(1));
    }

    #[test]
    fn must_accessors_abort_on_violation() {
        let mut ctx = Context::new();

        assert!(matches!(ctx.must_get::<u8>("nope"), Err(Error::MissingKey(_))));
        assert!(ctx.is_aborted());

        ctx.reset();
        ctx.must_set_final("k", 1u8).unwrap();
        assert!(!ctx.is_aborted());
        assert!(ctx.must_set_final("k", 2u8).is_err());
        assert!(ctx.is_aborted());
        assert_eq!(ctx.must_get_final::<u8>("k").unwrap(), 1);
    }

    #[test]
    fn abort_is_idempotent() {
        let mut ctx = Context::new();
        ctx.abort();
        ctx.abort();
        assert_eq!(ctx.cursor(), Cursor::Terminated);
    }

    #[test]
    fn html_is_escaped() {
        assert_eq!(escape_html(r#"/a?b=1&c="<x>""#), "/a?b=1&amp;c=&#34;&lt;x&gt;&#34;");
    }
}
