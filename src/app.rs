//! Framework facade and resolver registry.
//!
//! [`App`] is what an application touches: it owns the resolver registry
//! and the server, pre-wires the default resolvers, and forwards
//! registration and lifecycle calls. Calling [`App::run`] consumes the
//! facade — the registry is frozen into an `Arc` at that moment, so the
//! mutate-then-serve phase separation is enforced by ownership rather than
//! convention.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::error;

use crate::error::Error;
use crate::render::{
    ContentResolver, HtmlResolver, JsonResolver, ResultResolver, TemplateResolver, TemplateSet,
    kind,
};
use crate::router::Router;
use crate::server::{Server, ShutdownHandle};

/// The shared resolver registry, read by every request's
/// [`Context`](crate::Context).
#[derive(Default)]
pub(crate) struct Config {
    result_resolvers: HashMap<String, Arc<dyn ResultResolver>>,
    template_resolver: Option<Arc<dyn TemplateResolver>>,
}

impl Config {
    pub(crate) fn register_result_resolver(
        &mut self,
        kind: impl Into<String>,
        resolver: impl ResultResolver + 'static,
    ) {
        self.result_resolvers.insert(kind.into(), Arc::new(resolver));
    }

    pub(crate) fn register_template_resolver(&mut self, resolver: impl TemplateResolver + 'static) {
        self.template_resolver = Some(Arc::new(resolver));
    }

    pub(crate) fn result_resolver(&self, kind: &str) -> Option<Arc<dyn ResultResolver>> {
        self.result_resolvers.get(kind).map(Arc::clone)
    }

    pub(crate) fn template_resolver(&self) -> Option<Arc<dyn TemplateResolver>> {
        self.template_resolver.as_ref().map(Arc::clone)
    }
}

/// The application entry point.
///
/// ```rust,no_run
/// use trellis::{App, Context, Error};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Error> {
///     let mut app = App::new();
///     app.router().get("/ping", ping);
///     app.run("0.0.0.0:3000").await
/// }
///
/// async fn ping(ctx: Context) -> Result<(), Error> {
///     ctx.content("pong")
/// }
/// ```
pub struct App {
    config: Config,
    server: Server,
}

impl App {
    /// Creates an app with the `json`, `content`, and `html` resolvers
    /// pre-registered. `jsonp` is not: register a
    /// [`JsonpResolver`](crate::render::JsonpResolver) with the callback
    /// your clients expect.
    pub fn new() -> Self {
        let mut config = Config::default();
        config.register_result_resolver(kind::JSON, JsonResolver);
        config.register_result_resolver(kind::CONTENT, ContentResolver);
        config.register_result_resolver(kind::HTML, HtmlResolver);
        Self { config, server: Server::new() }
    }

    /// The root of the routing tree.
    pub fn router(&mut self) -> &mut Router {
        self.server.router()
    }

    /// Registers (or replaces) the result resolver for `kind`.
    pub fn register_result_resolver(
        &mut self,
        kind: impl Into<String>,
        resolver: impl ResultResolver + 'static,
    ) -> &mut Self {
        self.config.register_result_resolver(kind, resolver);
        self
    }

    /// Registers the template resolver.
    pub fn register_template_resolver(
        &mut self,
        resolver: impl TemplateResolver + 'static,
    ) -> &mut Self {
        self.config.register_template_resolver(resolver);
        self
    }

    /// Loads every template under `dir` and registers the set as the
    /// template resolver.
    ///
    /// Templates are essential startup state: a missing directory or a
    /// malformed template logs the failure and terminates the process.
    pub fn support_templates(&mut self, dir: impl AsRef<Path>) -> &mut Self {
        let dir = dir.as_ref();
        match TemplateSet::from_dir(dir) {
            Ok(set) => {
                self.config.register_template_resolver(set);
            }
            Err(e) => {
                error!(dir = %dir.display(), error = %e, "template load failed");
                std::process::exit(1);
            }
        }
        self
    }

    /// Serves files from `folder` under the URL prefix `pattern`,
    /// bypassing the router and all middleware.
    pub fn static_dir(&mut self, pattern: &str, folder: impl Into<std::path::PathBuf>) -> &mut Self {
        self.server.static_dir(pattern, folder);
        self
    }

    /// A handle that stops the server from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Freezes the configuration, installs the flattened routes, and
    /// serves on `addr` until shutdown. Blocks for the life of the server.
    pub async fn run(self, addr: &str) -> Result<(), Error> {
        let config = Arc::new(self.config);
        self.server.run(addr, config).await
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}
