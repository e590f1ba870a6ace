//! Prefix-scoped module tree of route registrations.
//!
//! A [`Router`] is a tree: each node owns a path prefix, its own handler
//! registrations, its own middleware list, and zero or more child modules.
//! Registration mutates the tree in place; nothing is resolved until
//! [`Router::handlers`] flattens the whole tree into one ordered list of
//! `(method, full pattern, middleware chain, handler)` entries for the
//! server to install.
//!
//! Flattening is pure — the tree is never mutated, so flattening twice
//! yields the same list.

use http::Method;

use crate::handler::{BoxedHandler, Handler};
use crate::middleware::Middleware;

/// One flattened route registration.
#[derive(Clone)]
pub struct HandlerInfo {
    /// Exact-match URL path, fully prefix-joined.
    pub pattern: String,
    /// `None` means the route matches regardless of request method.
    pub method: Option<Method>,
    pub handler: BoxedHandler,
    /// Ancestor middleware first, then node-local, then handler-local.
    pub middleware: Vec<Middleware>,
}

/// One node of the routing tree.
///
/// The root is created by [`App`](crate::App); child nodes come from
/// [`Router::module`]. Every registration method returns `&mut Self` so
/// calls chain:
///
/// ```rust,no_run
/// # use trellis::{App, Context, Error};
/// # async fn list_users(_: Context) -> Result<(), Error> { Ok(()) }
/// # async fn create_user(_: Context) -> Result<(), Error> { Ok(()) }
/// # let mut app = App::new();
/// let api = app.router().module("/api");
/// api.get("/users", list_users)
///    .post("/users", create_user);
/// ```
pub struct Router {
    prefix: String,
    modules: Vec<Router>,
    handlers: Vec<HandlerInfo>,
    middleware: Vec<Middleware>,
}

impl Router {
    pub fn new() -> Self {
        Self::with_prefix("")
    }

    fn with_prefix(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            modules: Vec::new(),
            handlers: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Creates a child module scoped under `prefix` and returns it.
    ///
    /// Registrations on the child inherit this node's prefix and middleware.
    pub fn module(&mut self, prefix: &str) -> &mut Router {
        self.modules.push(Router::with_prefix(prefix));
        self.modules.last_mut().expect("module just pushed")
    }

    /// Appends middleware applying to this node's handlers and every
    /// descendant module's handlers.
    pub fn wrap(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Registers one handler at this node.
    ///
    /// `method: None` matches any request method. An empty pattern
    /// normalizes to `/`. `middleware` is handler-local, appended after
    /// every inherited list when the tree flattens.
    pub fn add(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        handler: impl Handler,
        middleware: Vec<Middleware>,
    ) -> &mut Self {
        let pattern = if pattern.is_empty() { "/" } else { pattern };
        self.handlers.push(HandlerInfo {
            pattern: pattern.to_owned(),
            method,
            handler: handler.into_boxed_handler(),
            middleware,
        });
        self
    }

    /// Registers a handler matching every request method.
    pub fn any(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(None, pattern, handler, Vec::new())
    }

    pub fn get(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::GET), pattern, handler, Vec::new())
    }

    pub fn post(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::POST), pattern, handler, Vec::new())
    }

    pub fn put(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::PUT), pattern, handler, Vec::new())
    }

    pub fn delete(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::DELETE), pattern, handler, Vec::new())
    }

    pub fn patch(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::PATCH), pattern, handler, Vec::new())
    }

    pub fn options(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::OPTIONS), pattern, handler, Vec::new())
    }

    pub fn head(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.add(Some(Method::HEAD), pattern, handler, Vec::new())
    }

    /// Flattens the tree into one ordered list, depth-first.
    ///
    /// Patterns are the path-join of every ancestor prefix and the local
    /// pattern; middleware lists concatenate ancestor-first with
    /// handler-local middleware last. The tree itself is untouched.
    pub fn handlers(&self) -> Vec<HandlerInfo> {
        let mut out = Vec::new();
        self.flatten_into("", &[], &mut out);
        out
    }

    fn flatten_into(&self, parent: &str, inherited: &[Middleware], out: &mut Vec<HandlerInfo>) {
        let scope = join_path(&[parent, &self.prefix]);
        for info in &self.handlers {
            let mut middleware =
                Vec::with_capacity(inherited.len() + self.middleware.len() + info.middleware.len());
            middleware.extend(inherited.iter().cloned());
            middleware.extend(self.middleware.iter().cloned());
            middleware.extend(info.middleware.iter().cloned());
            out.push(HandlerInfo {
                pattern: join_path(&[&scope, &info.pattern]),
                method: info.method.clone(),
                handler: info.handler.clone(),
                middleware,
            });
        }

        let inherited: Vec<Middleware> =
            inherited.iter().chain(self.middleware.iter()).cloned().collect();
        for module in &self.modules {
            module.flatten_into(&scope, &inherited, out);
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Joins URL path fragments into one rooted, cleaned path.
///
/// Duplicate slashes collapse, `.` segments drop, `..` pops, and the result
/// always starts with `/` — empty input becomes `/`.
fn join_path(parts: &[&str]) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for part in parts {
        for segment in part.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                s => segments.push(s),
            }
        }
    }

    if segments.is_empty() {
        return "/".to_owned();
    }
    let mut out = String::with_capacity(segments.iter().map(|s| s.len() + 1).sum());
    for segment in segments {
        out.push('/');
        out.push_str(segment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Config;
    use crate::context::testing::context;
    use crate::handler::{self, BoxedHandler};
    use crate::middleware::{self, compose};
    use crate::Context;
    use std::sync::{Arc, Mutex};

    async fn noop(_ctx: Context) -> Result<(), crate::Error> {
        Ok(())
    }

    fn patterns(router: &Router) -> Vec<String> {
        router.handlers().into_iter().map(|h| h.pattern).collect()
    }

    #[test]
    fn flatten_joins_nested_prefixes() {
        let mut root = Router::new();
        root.get("/ping", noop);
        let api = root.module("/api");
        api.get("/users", noop);
        let v1 = api.module("/v1");
        v1.get("/users", noop).post("reports/daily", noop);

        assert_eq!(
            patterns(&root),
            ["/ping", "/api/users", "/api/v1/users", "/api/v1/reports/daily"]
        );
    }

    #[test]
    fn empty_pattern_normalizes_to_root() {
        let mut root = Router::new();
        root.module("/admin").get("", noop);
        root.get("", noop);

        assert_eq!(patterns(&root), ["/", "/admin"]);
    }

    #[test]
    fn sloppy_slashes_are_cleaned() {
        let mut root = Router::new();
        root.module("/api/").get("//users", noop);
        root.module("v2").get("./users/../teams", noop);

        assert_eq!(patterns(&root), ["/api/users", "/v2/teams"]);
    }

    #[test]
    fn flatten_is_idempotent_and_pure() {
        let mut root = Router::new();
        root.wrap(middleware::from_fn(|next| next));
        root.module("/api").get("/users", noop);
        root.get("/ping", noop);

        let first = root.handlers();
        let second = root.handlers();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.pattern, b.pattern);
            assert_eq!(a.method, b.method);
            assert_eq!(a.middleware.len(), b.middleware.len());
        }
    }

    #[test]
    fn middleware_concatenates_ancestor_first() {
        let mut root = Router::new();
        root.wrap(middleware::from_fn(|next| next));
        let api = root.module("/api");
        api.wrap(middleware::from_fn(|next| next));
        api.wrap(middleware::from_fn(|next| next));
        api.add(Some(Method::GET), "/users", noop, vec![middleware::from_fn(|next| next)]);

        let flat = root.handlers();
        assert_eq!(flat.len(), 1);
        // root + two module-level + one handler-local
        assert_eq!(flat[0].middleware.len(), 4);
    }

    fn labelled(label: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> crate::Middleware {
        middleware::from_fn(move |next| {
            let log = Arc::clone(&log);
            handler::from_fn(move |ctx: Context| {
                let next = next.clone();
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(label);
                    next.call(ctx).await
                }
            })
        })
    }

    #[tokio::test]
    async fn flattened_chain_runs_ancestor_to_local() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut root = Router::new();
        root.wrap(labelled("root", Arc::clone(&log)));
        let api = root.module("/api");
        api.wrap(labelled("api", Arc::clone(&log)));
        api.add(
            Some(Method::GET),
            "/users",
            noop,
            vec![labelled("local", Arc::clone(&log))],
        );

        let flat = root.handlers();
        let composed: BoxedHandler = compose(flat[0].handler.clone(), &flat[0].middleware);
        composed
            .call(context(Config::default(), Method::GET, "/api/users", b""))
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), ["root", "api", "local"]);
    }

    #[test]
    fn join_path_edge_cases() {
        assert_eq!(join_path(&["", ""]), "/");
        assert_eq!(join_path(&["", "/"]), "/");
        assert_eq!(join_path(&["/a/", "/b"]), "/a/b");
        assert_eq!(join_path(&["/a", "../b"]), "/b");
        assert_eq!(join_path(&["/..", "/a"]), "/a");
    }
}
