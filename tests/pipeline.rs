use std::sync::Arc;

use bytes::Bytes;
use http::{Request, StatusCode};
use keel::middleware::{BoxFuture, Middleware, from_fn, recovery};
use keel::{Context, ContextPool, Cursor, Error, Incoming, Params, Recorder, Route};
use parking_lot::Mutex;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn get(uri: &str) -> Request<Bytes> {
    Request::builder().uri(uri).body(Bytes::new()).unwrap()
}

async fn serve(ctx: &mut Context, route: &Route, request: Request<Bytes>) -> Recorder {
    let recorder = Recorder::new();
    let incoming = Incoming { request, params: Params::default(), request_id: "req-1".to_owned() };
    ctx.run(recorder.clone(), incoming, route).await;
    recorder
}

/// Records its name, then continues.
fn pass(log: &Log, name: &'static str) -> impl Middleware {
    let log = Arc::clone(log);
    from_fn(move |ctx| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().push(name);
            ctx.next().await;
        })
    })
}

/// Records its name and returns without continuing or aborting.
fn stall(log: &Log, name: &'static str) -> impl Middleware {
    let log = Arc::clone(log);
    from_fn(move |_ctx| {
        let log = Arc::clone(&log);
        Box::pin(async move {
            log.lock().push(name);
        })
    })
}

fn deny(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.set_status(StatusCode::UNAUTHORIZED);
        ctx.abort();
    })
}

fn explode(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.set("reached", true);
        panic!("boom");
    })
}

fn abort_without_status(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move { ctx.abort() })
}

#[tokio::test]
async fn abort_stops_the_chain_and_sends_the_bare_status() {
    let log = Log::default();
    let route = Route::new("users", "show")
        .with(pass(&log, "logger"))
        .with(deny)
        .with(pass(&log, "handler"));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/users/1")).await;

    assert_eq!(*log.lock(), ["logger"]);
    assert_eq!(recorder.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(recorder.head_count(), 1);
    assert!(recorder.body().is_empty());
    assert_eq!(ctx.cursor(), Cursor::Terminated);
}

#[tokio::test]
async fn abort_without_status_sends_ok() {
    let log = Log::default();
    let route = Route::new("users", "show")
        .with(pass(&log, "logger"))
        .with(abort_without_status)
        .with(pass(&log, "handler"));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;

    assert_eq!(*log.lock(), ["logger"]);
    assert_eq!(recorder.status(), StatusCode::OK);
    assert_eq!(recorder.head_count(), 1);
}

#[tokio::test]
async fn exhausted_chain_runs_every_stage_in_order() {
    let log = Log::default();
    let route = Route::new("c", "a")
        .with(pass(&log, "first"))
        .with(pass(&log, "second"))
        .with(pass(&log, "third"));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;

    assert_eq!(*log.lock(), ["first", "second", "third"]);
    assert_eq!(recorder.status(), StatusCode::OK);
    assert_eq!(recorder.head_count(), 1);
    assert_eq!(ctx.cursor(), Cursor::Terminated);
    assert_eq!(ctx.controller(), "c");
    assert_eq!(ctx.action(), "a");
    assert_eq!(ctx.request_id(), "req-1");
}

#[tokio::test]
async fn terminal_handler_runs_when_the_chain_falls_through() {
    let log = Log::default();
    let route = Route::new("files", "serve")
        .with(pass(&log, "logger"))
        .terminal(from_fn(|ctx| {
            Box::pin(async move {
                let _ = ctx.text("static");
            })
        }));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;

    assert_eq!(*log.lock(), ["logger"]);
    assert_eq!(recorder.body_string(), "static");
    assert_eq!(recorder.header("content-type").as_deref(), Some("text/plain"));
}

#[tokio::test]
async fn stalled_stage_falls_through_to_the_terminal_handler() {
    let log = Log::default();
    let route = Route::new("c", "a")
        .with(stall(&log, "stall"))
        .with(pass(&log, "never"))
        .terminal(stall(&log, "terminal"));

    let mut ctx = Context::new();
    serve(&mut ctx, &route, get("/")).await;

    assert_eq!(*log.lock(), ["stall", "terminal"]);
    assert_eq!(ctx.cursor(), Cursor::Terminated);
}

#[tokio::test]
async fn terminal_handler_is_skipped_after_abort_or_output() {
    let log = Log::default();

    let aborted = Route::new("c", "a").with(deny).terminal(stall(&log, "terminal"));
    let wrote = Route::new("c", "b")
        .with(from_fn(|ctx| {
            Box::pin(async move {
                let _ = ctx.response_mut().flush_header();
            })
        }))
        .terminal(stall(&log, "terminal"));

    let mut ctx = Context::new();
    serve(&mut ctx, &aborted, get("/")).await;
    let recorder = serve(&mut ctx, &wrote, get("/")).await;

    assert!(log.lock().is_empty());
    assert_eq!(recorder.head_count(), 1);
}

#[tokio::test]
async fn next_after_abort_is_a_no_op() {
    let log = Log::default();
    let route = Route::new("c", "a")
        .with(from_fn(|ctx| {
            Box::pin(async move {
                ctx.abort();
                ctx.abort();
                ctx.next().await;
                assert_eq!(ctx.cursor(), Cursor::Terminated);
            })
        }))
        .with(pass(&log, "after"));

    let mut ctx = Context::new();
    serve(&mut ctx, &route, get("/")).await;

    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn cursor_tracks_the_running_stage() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let probe = {
        let seen = Arc::clone(&seen);
        move || {
            let seen = Arc::clone(&seen);
            from_fn(move |ctx| {
                let seen = Arc::clone(&seen);
                Box::pin(async move {
                    seen.lock().push(ctx.cursor());
                    ctx.next().await;
                })
            })
        }
    };
    let route = Route::new("c", "a").with(probe()).with(probe());

    let mut ctx = Context::new();
    assert_eq!(ctx.cursor(), Cursor::NotStarted);
    serve(&mut ctx, &route, get("/")).await;

    assert_eq!(*seen.lock(), [Cursor::At(0), Cursor::At(1)]);
}

#[tokio::test]
async fn settings_do_not_survive_reuse() {
    let route = Route::new("c", "a").with(from_fn(|ctx| {
        Box::pin(async move {
            ctx.set("user", 7u32);
            ctx.set_final("tenant", "acme").unwrap();
            ctx.next().await;
        })
    }));
    let empty = Route::new("c", "b");

    let mut ctx = Context::new();
    serve(&mut ctx, &route, get("/")).await;
    assert_eq!(ctx.get::<u32>("user"), Some(7));
    assert_eq!(ctx.get_final::<&str>("tenant"), Some("acme"));

    serve(&mut ctx, &empty, get("/")).await;
    assert_eq!(ctx.get::<u32>("user"), None);
    assert_eq!(ctx.get_final::<&str>("tenant"), None);
    assert_eq!(ctx.controller(), "c");
    assert_eq!(ctx.action(), "b");
}

#[tokio::test]
async fn frozen_settings_reject_overwrites() {
    let route = Route::new("c", "a").with(from_fn(|ctx| {
        Box::pin(async move {
            ctx.set_final("role", "admin").unwrap();
            let second = ctx.set_final("role", "guest");
            assert!(matches!(second, Err(Error::DuplicateKey(_))));
            assert_eq!(ctx.get_final::<&str>("role"), Some("admin"));

            // Not a violation: the chain keeps going.
            ctx.next().await;
        })
    }));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;
    assert_eq!(recorder.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_required_key_aborts_the_chain() {
    let log = Log::default();
    let route = Route::new("c", "a")
        .with(from_fn(|ctx| {
            Box::pin(async move {
                if ctx.must_get::<String>("session").is_err() {
                    ctx.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                }
                ctx.next().await;
            })
        }))
        .with(pass(&log, "handler"));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;

    assert!(log.lock().is_empty());
    assert_eq!(recorder.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn recovery_turns_panics_into_500() {
    let log = Log::default();
    let route = Route::new("c", "a")
        .with(recovery())
        .with(explode)
        .terminal(stall(&log, "terminal"));

    let mut ctx = Context::new();
    let recorder = serve(&mut ctx, &route, get("/")).await;

    assert_eq!(recorder.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(log.lock().is_empty());
    assert!(ctx.is_aborted());
}

#[tokio::test]
async fn pooled_contexts_are_fully_reset() {
    let pool = ContextPool::new(1);
    let route = Route::new("c", "a").with(from_fn(|ctx| {
        Box::pin(async move {
            ctx.set("k", 1u8);
            ctx.set_final("f", 1u8).unwrap();
            ctx.set_header("x-leak", "1").unwrap();
            ctx.set_status(StatusCode::ACCEPTED);
            let _ = ctx.text("body");
        })
    }));

    {
        let mut ctx = pool.checkout();
        let request = Request::builder().uri("/a?x=1").body(Bytes::new()).unwrap();
        let incoming = Incoming {
            request,
            params: Params::new(Default::default(), Some("x=1")),
            request_id: "r".to_owned(),
        };
        ctx.run(Recorder::new(), incoming, &route).await;
        assert!(!ctx.is_idle());
    }

    let ctx = pool.checkout();
    assert!(ctx.is_idle());
    assert_eq!(ctx.request_uri(), "/");
    assert!(ctx.params().query("x").is_none());
    assert!(!ctx.response().header().contains_key("x-leak"));
}
