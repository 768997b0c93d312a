//! Minimal keel service: negotiated user endpoints, an auth stage and
//! health checks.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42 -H 'authorization: x'
//!   curl http://localhost:3000/users/42 -H 'authorization: x' -H 'accept: text/xml'
//!   curl -X POST http://localhost:3000/users \
//!        -H 'authorization: x' \
//!        -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/old
//!   curl http://localhost:3000/healthz

use http::StatusCode;
use keel::middleware::{BoxFuture, recovery, trace};
use keel::payload::{Payload, WithStatus};
use keel::render::Hasher;
use keel::{Context, Route, Router, Server, health};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "user")]
struct User {
    id: String,
    name: String,
}

impl Payload for User {}

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = Router::new()
        .wrap(recovery())
        .wrap(trace())
        .get("/healthz", Route::new("health", "liveness").with(health::liveness))
        .get("/readyz", Route::new("health", "readiness").with(health::readiness))
        .get("/old", Route::new("pages", "old").with(moved))
        .get("/users/{id}", Route::new("users", "show").with(auth).with(show_user))
        .post("/users", Route::new("users", "create").with(auth).with(create_user));

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// Every /users route needs some Authorization header; the value is
// published to later stages as a frozen setting.
fn auth(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let Some(token) = ctx.header("authorization").map(str::to_owned) else {
            ctx.set_status(StatusCode::UNAUTHORIZED);
            ctx.abort();
            return;
        };
        if ctx.must_set_final("token", token).is_err() {
            return;
        }
        ctx.next().await;
    })
}

// GET /users/{id}: JSON or XML depending on Accept, with an ETag.
fn show_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        let user = User {
            id: ctx.params().get("id").unwrap_or("unknown").to_owned(),
            name: "alice".to_owned(),
        };
        let _ = ctx.hashed_ret(Hasher::Sha256, &user);
    })
}

// POST /users → 201, or 400 when the body is not a user.
fn create_user(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        match serde_json::from_slice::<CreateUser>(ctx.request().body()) {
            Ok(input) => {
                let user = User { id: "99".to_owned(), name: input.name };
                let _ = ctx.set_header("location", "/users/99");
                let _ = ctx.json(&WithStatus::new(StatusCode::CREATED, user));
            }
            Err(e) => {
                ctx.set_status(StatusCode::BAD_REQUEST);
                let _ = ctx.text(&e.to_string());
            }
        }
    })
}

fn moved(ctx: &mut Context) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        ctx.set_status(StatusCode::MOVED_PERMANENTLY);
        let _ = ctx.redirect("/users/42");
    })
}
