//! # trellis
//!
//! A tiny module-tree HTTP framework. Declare handlers and middleware with
//! a fluent API; trellis does the wiring.
//!
//! ## The contract
//!
//! hyper owns the wire: connection lifecycle, HTTP/1.1 and HTTP/2, TLS via
//! whatever sits in front. trellis owns the part that changes between
//! applications:
//!
//! - **Module-scoped routing** — a tree of prefix-scoped routers, flattened
//!   into an exact-match table at startup
//! - **Middleware** — plain handler-wrapping functions, composed
//!   first-registered-outermost
//! - **Result resolvers** — an open registry mapping a render kind
//!   (`json`, `jsonp`, `content`, `html`, or your own) to a payload renderer
//! - **Templates** — a pluggable named-template resolver, minijinja by
//!   default
//! - **Graceful shutdown** — SIGTERM / Ctrl-C / programmatic handle, drains
//!   in-flight requests
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trellis::{App, Context, Error, middleware};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut app = App::new();
//!
//!     app.router().wrap(middleware::trace());
//!     app.router().get("/ping", ping);
//!
//!     let api = app.router().module("/api");
//!     api.get("/users", list_users)
//!        .post("/users", create_user);
//!
//!     app.run("0.0.0.0:3000").await
//! }
//!
//! async fn ping(ctx: Context) -> Result<(), Error> {
//!     ctx.content("pong")
//! }
//!
//! async fn list_users(ctx: Context) -> Result<(), Error> {
//!     ctx.json(&serde_json::json!([{"id": 1, "name": "alice"}]))
//! }
//!
//! async fn create_user(ctx: Context) -> Result<(), Error> {
//!     let Some(name) = ctx.form("name") else {
//!         ctx.status(trellis::StatusCode::BAD_REQUEST);
//!         return ctx.content("name is required");
//!     };
//!     ctx.status(trellis::StatusCode::CREATED);
//!     ctx.json(&serde_json::json!({"id": 99, "name": name}))
//! }
//! ```

mod app;
mod context;
mod error;
mod router;
mod server;

pub mod handler;
pub mod middleware;
pub mod render;

pub use app::App;
pub use context::Context;
pub use error::Error;
pub use handler::{BoxedHandler, Handler};
pub use middleware::Middleware;
pub use render::{ResultResolver, TemplateResolver};
pub use router::{HandlerInfo, Router};
pub use server::ShutdownHandle;

// Re-exported so applications don't need a direct `http` dependency for
// the common cases.
pub use http::{Method, StatusCode};
