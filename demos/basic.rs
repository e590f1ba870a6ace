//! Minimal trellis example — module-scoped JSON endpoints, middleware, and
//! a form handler.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/ping
//!   curl http://localhost:3000/api/users
//!   curl -X POST http://localhost:3000/api/users -d 'name=alice' \
//!        -H 'content-type: application/x-www-form-urlencoded'
//!   curl http://localhost:3000/api/users/search?cb=render
//!   curl -X DELETE http://localhost:3000/api/users        # 405
//!   curl http://localhost:3000/anything                   # matches any verb

use serde_json::json;
use trellis::render::{JsonpResolver, kind};
use trellis::{App, Context, Error, StatusCode, middleware};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();

    let mut app = App::new();
    app.register_result_resolver(kind::JSONP, JsonpResolver::new("render"));

    app.router().wrap(middleware::trace());
    app.router().get("/ping", ping);
    app.router().any("/anything", anything);

    let api = app.router().module("/api");
    api.get("/users", list_users)
        .post("/users", create_user)
        .get("/users/search", search_users);

    app.run("0.0.0.0:3000").await
}

async fn ping(ctx: Context) -> Result<(), Error> {
    ctx.content("pong")
}

async fn anything(ctx: Context) -> Result<(), Error> {
    ctx.content(format!("you sent {}", ctx.method()))
}

// GET /api/users
async fn list_users(ctx: Context) -> Result<(), Error> {
    ctx.json(&json!([
        {"id": 1, "name": "alice"},
        {"id": 2, "name": "bob"},
    ]))
}

// POST /api/users — reads an urlencoded form field.
async fn create_user(ctx: Context) -> Result<(), Error> {
    let Some(name) = ctx.form("name") else {
        ctx.status(StatusCode::BAD_REQUEST);
        return ctx.content("name is required");
    };
    ctx.status(StatusCode::CREATED);
    ctx.json(&json!({"id": 99, "name": name}))
}

// GET /api/users/search — renders through the registered jsonp resolver.
async fn search_users(ctx: Context) -> Result<(), Error> {
    let term = ctx.query("q").unwrap_or_default();
    ctx.jsonp(&json!({"q": term, "hits": []}))
}
