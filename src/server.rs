//! HTTP server: route table, request dispatch, and graceful shutdown.
//!
//! The server has two phases. While *configuring*, routes and static mounts
//! accumulate. `run` flattens the router, folds every middleware list into
//! its composed handler, and freezes the result into an immutable route
//! table; from then on the server is *running* and the table is read-only.
//!
//! # Graceful shutdown
//!
//! The accept loop stops on the first of SIGTERM, Ctrl-C, or a
//! [`ShutdownHandle::shutdown`] call, then lets every in-flight connection
//! task run to completion before `run` returns. Under Kubernetes, set
//! `terminationGracePeriodSeconds` longer than your slowest request.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::app::Config;
use crate::context::{Context, RequestParts};
use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::middleware;
use crate::router::{HandlerInfo, Router};

// ── Shutdown coordination ─────────────────────────────────────────────────────

/// Stops a running server from anywhere.
///
/// Obtain one with [`App::shutdown_handle`](crate::App::shutdown_handle)
/// before calling `run`. Triggering is idempotent; the accept loop closes
/// and in-flight requests drain, exactly as on SIGTERM.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(());
    }
}

// ── Server ────────────────────────────────────────────────────────────────────

/// Owns the routing tree, the static mounts, and the listener lifecycle.
pub(crate) struct Server {
    router: Router,
    mounts: Vec<StaticMount>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl Server {
    pub(crate) fn new() -> Self {
        // The receiver is created up front so a handle triggered before
        // `run` still stops the server immediately at startup.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Self { router: Router::new(), mounts: Vec::new(), shutdown_tx, shutdown_rx }
    }

    pub(crate) fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    /// Registers a prefix-stripped file-serving mount.
    ///
    /// Mounts sit beside the route table: they never appear in the
    /// flattened handler list and no middleware runs for them.
    pub(crate) fn static_dir(&mut self, pattern: &str, folder: impl Into<PathBuf>) {
        self.mounts.push(StaticMount { prefix: pattern.to_owned(), dir: folder.into() });
    }

    pub(crate) fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { tx: self.shutdown_tx.clone() }
    }

    /// Builds the route table, binds, and serves until shutdown.
    pub(crate) async fn run(mut self, addr: &str, config: Arc<Config>) -> Result<(), Error> {
        let addr: SocketAddr = addr.parse()?;
        let table = Arc::new(RouteTable::build(&self.router, std::mem::take(&mut self.mounts))?);

        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "trellis listening");

        // JoinSet tracks every spawned connection task so the drain below
        // can wait for them all.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal(self.shutdown_rx);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` checks arms top-to-bottom: a shutdown signal must
                // stop the accept loop even when connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let table = Arc::clone(&table);
                    let config = Arc::clone(&config);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        // Called once per request on the connection, not
                        // once per connection.
                        let svc = service_fn(move |req| {
                            let table = Arc::clone(&table);
                            let config = Arc::clone(&config);
                            async move { dispatch(table, config, req).await }
                        });

                        // `auto::Builder` handles HTTP/1.1 and HTTP/2,
                        // whatever the client negotiates.
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connection tasks so the JoinSet does not
                // grow without bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("trellis stopped");
        Ok(())
    }
}

// ── Route table ───────────────────────────────────────────────────────────────

struct RouteEntry {
    method: Option<Method>,
    handler: BoxedHandler,
}

impl std::fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteEntry").field("method", &self.method).finish()
    }
}

#[derive(Debug)]
struct RouteTable {
    routes: HashMap<String, RouteEntry>,
    mounts: Vec<StaticMount>,
}

#[derive(Debug)]
struct StaticMount {
    prefix: String,
    dir: PathBuf,
}

impl RouteTable {
    /// Flattens the tree and composes each middleware chain around its
    /// handler. Two registrations on the same exact pattern conflict.
    fn build(router: &Router, mounts: Vec<StaticMount>) -> Result<Self, Error> {
        let mut routes = HashMap::new();
        for info in router.handlers() {
            info!(
                pattern = %info.pattern,
                method = info.method.as_ref().map_or("ANY", Method::as_str),
                "route registered"
            );
            let HandlerInfo { pattern, method, handler, middleware: chain } = info;
            let composed = middleware::compose(handler, &chain);
            match routes.entry(pattern) {
                Entry::Occupied(occupied) => {
                    return Err(Error::DuplicateRoute(occupied.key().clone()));
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(RouteEntry { method, handler: composed });
                }
            }
        }
        Ok(Self { routes, mounts })
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: routes one request and produces one response.
///
/// The error type is [`Infallible`] — every failure becomes a response
/// (404, 405, 500) so hyper never sees an error.
async fn dispatch<B>(
    table: Arc<RouteTable>,
    config: Arc<Config>,
    req: Request<B>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: http_body::Body + Send,
    B::Data: Send,
{
    let (parts, body) = req.into_parts();

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            return Ok(plain_text(StatusCode::BAD_REQUEST, "failed to read request body"));
        }
    };

    let path = parts.uri.path().to_owned();
    let Some(entry) = table.routes.get(&path) else {
        let response = match serve_static(&table.mounts, &path).await {
            Some(response) => response,
            None => empty_status(StatusCode::NOT_FOUND),
        };
        return Ok(response);
    };

    // The method check runs before any middleware: a mismatched verb never
    // enters the chain.
    if let Some(method) = &entry.method {
        if *method != parts.method {
            let body = format!("{} {} Method not allowed", parts.method, parts.uri);
            return Ok(plain_text(StatusCode::METHOD_NOT_ALLOWED, &body));
        }
    }

    debug!(method = %parts.method, path, "dispatching");

    let ctx = Context::new(
        config,
        RequestParts { method: parts.method, uri: parts.uri, headers: parts.headers, body },
    );

    match entry.handler.call(ctx.clone()).await {
        Ok(()) => {
            let state = ctx.finish();
            let mut response = Response::new(Full::new(Bytes::from(state.body)));
            *response.status_mut() = state.status;
            *response.headers_mut() = state.headers;
            Ok(response)
        }
        Err(e) => {
            error!(method = %ctx.method(), path, error = %e, "handler failed");
            // Whatever the handler wrote is discarded; the error text is
            // the whole body.
            Ok(plain_text(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()))
        }
    }
}

fn plain_text(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::copy_from_slice(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain;charset=UTF-8"));
    response
}

fn empty_status(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

// ── Static file serving ───────────────────────────────────────────────────────

/// Serves `path` from the longest-prefix mount that matches, if any.
async fn serve_static(mounts: &[StaticMount], path: &str) -> Option<Response<Full<Bytes>>> {
    let (mount, rest) = mounts
        .iter()
        .filter_map(|m| match_mount(m, path).map(|rest| (m, rest)))
        .max_by_key(|(m, _)| m.prefix.len())?;

    let Some(file) = resolve_path(&mount.dir, rest) else {
        return Some(empty_status(StatusCode::NOT_FOUND));
    };

    match tokio::fs::read(&file).await {
        Ok(bytes) => {
            let mut response = Response::new(Full::new(Bytes::from(bytes)));
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(static_content_type(&file)));
            Some(response)
        }
        Err(_) => Some(empty_status(StatusCode::NOT_FOUND)),
    }
}

fn match_mount<'a>(mount: &StaticMount, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(&mount.prefix)?;
    if rest.is_empty() || rest.starts_with('/') || mount.prefix.ends_with('/') {
        Some(rest)
    } else {
        // `/assets` must not claim `/assetsfoo`.
        None
    }
}

/// Maps the stripped URL remainder under the mount directory, refusing
/// anything that would escape it.
fn resolve_path(base: &Path, rest: &str) -> Option<PathBuf> {
    let mut out = base.to_path_buf();
    for comp in Path::new(rest.trim_start_matches('/')).components() {
        match comp {
            Component::Normal(s) => out.push(s),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(out)
}

fn static_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|s| s.to_str()).unwrap_or("").to_lowercase().as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown trigger the process receives.
///
/// On Unix this listens for SIGTERM (Kubernetes control plane), SIGINT
/// (Ctrl-C), and the programmatic [`ShutdownHandle`]. On Windows only
/// Ctrl-C and the handle are available.
async fn shutdown_signal(mut handle: broadcast::Receiver<()>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm
    // is effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
        _ = handle.recv() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler;
    use crate::render::{ContentResolver, JsonResolver, kind};
    use serde_json::json;
    use std::sync::Mutex;

    fn test_config() -> Arc<Config> {
        let mut config = Config::default();
        config.register_result_resolver(kind::JSON, JsonResolver);
        config.register_result_resolver(kind::CONTENT, ContentResolver);
        Arc::new(config)
    }

    fn table(router: &Router) -> Arc<RouteTable> {
        Arc::new(RouteTable::build(router, Vec::new()).unwrap())
    }

    fn request(method: Method, uri: &str) -> Request<Full<Bytes>> {
        Request::builder().method(method).uri(uri).body(Full::new(Bytes::new())).unwrap()
    }

    async fn send(
        table: &Arc<RouteTable>,
        req: Request<Full<Bytes>>,
    ) -> (StatusCode, http::HeaderMap, Vec<u8>) {
        let response = dispatch(Arc::clone(table), test_config(), req).await.unwrap();
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap().to_bytes().to_vec();
        (parts.status, parts.headers, body)
    }

    #[tokio::test]
    async fn handler_response_flows_through() {
        let mut router = Router::new();
        router.get("/users", |ctx: Context| async move { ctx.json(&json!({"a": 1})) });
        let table = table(&router);

        let (status, headers, body) = send(&table, request(Method::GET, "/users")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "application/json;charset=UTF-8");
        assert_eq!(body, br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn method_mismatch_is_405_with_exact_body() {
        let mut router = Router::new();
        router.get("/path", |ctx: Context| async move { ctx.content("never") });
        let table = table(&router);

        let (status, headers, body) = send(&table, request(Method::POST, "/path")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers.get("content-type").unwrap(), "text/plain;charset=UTF-8");
        assert_eq!(body, b"POST /path Method not allowed");
    }

    #[tokio::test]
    async fn method_mismatch_skips_the_middleware_chain() {
        let ran = Arc::new(Mutex::new(false));
        let ran_probe = Arc::clone(&ran);
        let probe = middleware::from_fn(move |next| {
            let ran = Arc::clone(&ran_probe);
            handler::from_fn(move |ctx: Context| {
                *ran.lock().unwrap() = true;
                next.call(ctx)
            })
        });

        let mut router = Router::new();
        router.wrap(probe);
        router.get("/path", |ctx: Context| async move { ctx.content("never") });
        let table = table(&router);

        let (status, _, _) = send(&table, request(Method::PUT, "/path")).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(!*ran.lock().unwrap());
    }

    #[tokio::test]
    async fn any_route_matches_every_method() {
        let mut router = Router::new();
        router.any("/ping", |ctx: Context| async move { ctx.content("pong") });
        let table = table(&router);

        for method in [Method::GET, Method::POST, Method::DELETE, Method::PATCH] {
            let (status, _, body) = send(&table, request(method, "/ping")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, b"pong");
        }
    }

    async fn failing(_ctx: Context) -> Result<(), Error> {
        Err(Error::msg("boom"))
    }

    async fn failing_after_write(ctx: Context) -> Result<(), Error> {
        ctx.content("half a response")?;
        Err(Error::msg("gone wrong"))
    }

    #[tokio::test]
    async fn handler_error_is_500_with_error_text() {
        let mut router = Router::new();
        router.get("/fail", failing);
        let table = table(&router);

        let (status, headers, body) = send(&table, request(Method::GET, "/fail")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers.get("content-type").unwrap(), "text/plain;charset=UTF-8");
        assert_eq!(body, b"boom");
    }

    #[tokio::test]
    async fn handler_error_discards_partial_writes() {
        let mut router = Router::new();
        router.get("/partial", failing_after_write);
        let table = table(&router);

        let (status, _, body) = send(&table, request(Method::GET, "/partial")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, b"gone wrong");
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let router = Router::new();
        let table = table(&router);
        let (status, _, body) = send(&table, request(Method::GET, "/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn explicit_status_is_preserved() {
        let mut router = Router::new();
        router.post("/users", |ctx: Context| async move {
            ctx.status(StatusCode::CREATED);
            ctx.json(&json!({"id": 99}))
        });
        let table = table(&router);

        let (status, _, body) = send(&table, request(Method::POST, "/users")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, br#"{"id":99}"#);
    }

    #[test]
    fn duplicate_patterns_fail_table_build() {
        let mut router = Router::new();
        router.get("/same", |ctx: Context| async move { ctx.content("a") });
        router.post("/same", |ctx: Context| async move { ctx.content("b") });

        let err = RouteTable::build(&router, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::DuplicateRoute(pattern) if pattern == "/same"));
    }

    #[tokio::test]
    async fn static_mount_serves_files_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), "Hello\n").unwrap();

        let mounts =
            vec![StaticMount { prefix: "/assets/".to_owned(), dir: dir.path().to_path_buf() }];
        let table = Arc::new(RouteTable::build(&Router::new(), mounts).unwrap());

        let (status, headers, body) = send(&table, request(Method::GET, "/assets/hello.txt")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers.get("content-type").unwrap(), "text/plain");
        assert_eq!(body, b"Hello\n");

        let (status, _, _) = send(&table, request(Method::GET, "/assets/missing.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn static_mount_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        // The mount points at `public/`; a sibling file plays the secret.
        let public = dir.path().join("public");
        std::fs::create_dir(&public).unwrap();
        std::fs::write(public.join("inside.txt"), "in").unwrap();
        std::fs::write(dir.path().join("outside-secret"), "secret").unwrap();

        let mounts = vec![StaticMount { prefix: "/files/".to_owned(), dir: public }];
        let table = Arc::new(RouteTable::build(&Router::new(), mounts).unwrap());

        let (status, _, body) =
            send(&table, request(Method::GET, "/files/../outside-secret")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.is_empty());

        let (status, _, body) = send(&table, request(Method::GET, "/files/inside.txt")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"in");
    }

    #[tokio::test]
    async fn static_prefix_must_match_on_a_boundary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.txt"), "x").unwrap();

        let mounts =
            vec![StaticMount { prefix: "/assets".to_owned(), dir: dir.path().to_path_buf() }];
        let table = Arc::new(RouteTable::build(&Router::new(), mounts).unwrap());

        let (status, _, _) = send(&table, request(Method::GET, "/assets/x.txt")).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(&table, request(Method::GET, "/assetsx.txt")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
