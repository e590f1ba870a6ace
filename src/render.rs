//! Result resolvers and the template resolver.
//!
//! A *result resolver* turns a [`serde_json::Value`] payload into response
//! bytes. Resolvers live in an open registry keyed by a kind string — the
//! [`Context`](crate::Context) render helpers look up the four built-in
//! kinds, and applications may register their own kinds or replace the
//! built-ins wholesale.
//!
//! The *template resolver* is a separate, optional slot: one per
//! application, rendering a named template against a payload.

use std::fs;
use std::path::Path;

use minijinja::Environment;
use serde_json::Value;

use crate::error::Error;

// ── Render kinds ──────────────────────────────────────────────────────────────

/// Registry keys for the built-in result resolvers.
pub mod kind {
    pub const JSON: &str = "json";
    pub const JSONP: &str = "jsonp";
    pub const CONTENT: &str = "content";
    pub const HTML: &str = "html";
}

/// The content-type a successful render of `kind` stamps on the response.
///
/// Kinds outside the built-in four get no automatic header; a custom
/// resolver's caller sets its own via
/// [`Context::set_header`](crate::Context::set_header) before rendering.
pub(crate) fn content_type_for(kind: &str) -> Option<&'static str> {
    match kind {
        self::kind::JSON | self::kind::JSONP => Some("application/json;charset=UTF-8"),
        self::kind::CONTENT => Some("text/plain;charset=UTF-8"),
        self::kind::HTML => Some("text/html;charset=UTF-8"),
        _ => None,
    }
}

// ── Result resolvers ──────────────────────────────────────────────────────────

/// Renders a payload into response bytes.
///
/// Implement this to add a render kind (msgpack, CSV, …) and register it
/// with [`App::register_result_resolver`](crate::App::register_result_resolver).
pub trait ResultResolver: Send + Sync {
    fn render(&self, data: &Value) -> Result<Vec<u8>, Error>;
}

/// The `json` kind: straight `serde_json` marshaling.
pub struct JsonResolver;

impl ResultResolver for JsonResolver {
    fn render(&self, data: &Value) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(data)?)
    }
}

/// The `jsonp` kind: JSON wrapped in a fixed callback.
///
/// Not registered by default. The callback is part of the resolver, so an
/// application picks it once at registration:
///
/// ```rust,no_run
/// # let mut app = trellis::App::new();
/// app.register_result_resolver(trellis::render::kind::JSONP,
///     trellis::render::JsonpResolver::new("cb"));
/// ```
pub struct JsonpResolver {
    callback: String,
}

impl JsonpResolver {
    pub fn new(callback: impl Into<String>) -> Self {
        Self { callback: callback.into() }
    }
}

impl ResultResolver for JsonpResolver {
    fn render(&self, data: &Value) -> Result<Vec<u8>, Error> {
        let json = serde_json::to_vec(data)?;
        let mut out = Vec::with_capacity(self.callback.len() + json.len() + 2);
        out.extend_from_slice(self.callback.as_bytes());
        out.push(b'(');
        out.extend_from_slice(&json);
        out.push(b')');
        Ok(out)
    }
}

/// The `content` kind: a string payload passed through raw, no escaping.
pub struct ContentResolver;

impl ResultResolver for ContentResolver {
    fn render(&self, data: &Value) -> Result<Vec<u8>, Error> {
        as_string_bytes(data, "content")
    }
}

/// The `html` kind: a string payload emitted as trusted HTML.
pub struct HtmlResolver;

impl ResultResolver for HtmlResolver {
    fn render(&self, data: &Value) -> Result<Vec<u8>, Error> {
        as_string_bytes(data, "html")
    }
}

fn as_string_bytes(data: &Value, kind: &'static str) -> Result<Vec<u8>, Error> {
    data.as_str()
        .map(|s| s.as_bytes().to_vec())
        .ok_or(Error::StringPayload { kind })
}

// ── Template resolver ─────────────────────────────────────────────────────────

/// Renders a named template against a payload, fully buffered.
pub trait TemplateResolver: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> Result<Vec<u8>, Error>;
}

/// The default [`TemplateResolver`]: a pre-parsed set of minijinja
/// templates, keyed by file name.
///
/// [`TemplateSet::from_dir`] loads every regular file in one directory and
/// parses it eagerly, so a malformed template fails at load time rather
/// than on the first request. For custom delimiters, filters, or globals,
/// build your own [`Environment`] and use [`TemplateSet::from_env`].
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    /// Loads and parses every regular file directly under `dir`.
    ///
    /// Template names are the file names (`views/index.html` registers as
    /// `index.html`). Subdirectories are skipped.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let mut env = Environment::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let source = fs::read_to_string(entry.path())?;
            env.add_template_owned(name, source)?;
        }
        Ok(Self { env })
    }

    /// Wraps an [`Environment`] the application configured itself.
    pub fn from_env(env: Environment<'static>) -> Self {
        Self { env }
    }
}

impl TemplateResolver for TemplateSet {
    fn render(&self, name: &str, data: &Value) -> Result<Vec<u8>, Error> {
        let template = self.env.get_template(name)?;
        Ok(template.render(data)?.into_bytes())
    }
}
