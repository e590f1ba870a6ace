//! Per-request context.
//!
//! One [`Context`] exists per dispatched request. It bundles the buffered
//! request, the response accumulator, and the frozen resolver registry, and
//! is the only thing a handler touches. Cloning is cheap (three `Arc`s);
//! every clone sees the same response state, which is how middleware and the
//! handler cooperate on one response.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::app::Config;
use crate::error::Error;
use crate::render::{content_type_for, kind};

/// The buffered inbound request.
///
/// The server collects the full body before the handler runs, so `form` and
/// `forms` always have their bytes at hand.
pub(crate) struct RequestParts {
    pub(crate) method: Method,
    pub(crate) uri: Uri,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

/// The response being accumulated: status line, headers, body bytes, and
/// whether body bytes have been written yet.
pub(crate) struct ResponseState {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Vec<u8>,
    committed: bool,
}

impl ResponseState {
    fn new() -> Self {
        Self { status: StatusCode::OK, headers: HeaderMap::new(), body: Vec::new(), committed: false }
    }
}

/// Per-request facade handed to handlers and middleware.
#[derive(Clone)]
pub struct Context {
    config: Arc<Config>,
    request: Arc<RequestParts>,
    response: Arc<Mutex<ResponseState>>,
}

impl Context {
    pub(crate) fn new(config: Arc<Config>, request: RequestParts) -> Self {
        Self {
            config,
            request: Arc::new(request),
            response: Arc::new(Mutex::new(ResponseState::new())),
        }
    }

    // ── Request accessors ─────────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        &self.request.method
    }

    pub fn uri(&self) -> &Uri {
        &self.request.uri
    }

    pub fn path(&self) -> &str {
        self.request.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.request.headers
    }

    /// Case-insensitive header lookup; `None` for absent or non-UTF-8 values.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The full request body, already collected.
    pub fn body(&self) -> &[u8] {
        &self.request.body
    }

    /// First decoded value of `key` in the URL query string.
    pub fn query(&self, key: &str) -> Option<String> {
        form_urlencoded::parse(self.raw_query().as_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Every decoded value of `key` in the URL query string, in order.
    pub fn queries(&self, key: &str) -> Vec<String> {
        form_urlencoded::parse(self.raw_query().as_bytes())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    /// First decoded value of `key` in a urlencoded request body.
    ///
    /// Returns `None` unless the request declares
    /// `content-type: application/x-www-form-urlencoded`.
    pub fn form(&self, key: &str) -> Option<String> {
        form_urlencoded::parse(self.form_bytes())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Every decoded value of `key` in a urlencoded request body, in order.
    pub fn forms(&self, key: &str) -> Vec<String> {
        form_urlencoded::parse(self.form_bytes())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .collect()
    }

    fn raw_query(&self) -> &str {
        self.request.uri.query().unwrap_or("")
    }

    fn form_bytes(&self) -> &[u8] {
        let is_form = self
            .header("content-type")
            .is_some_and(|ct| {
                ct.trim_start().to_ascii_lowercase().starts_with("application/x-www-form-urlencoded")
            });
        if is_form { &self.request.body } else { &[] }
    }

    // ── Response writers ──────────────────────────────────────────────────────

    /// Renders `data` through the `json` resolver and writes the bytes.
    pub fn json<T: Serialize>(&self, data: &T) -> Result<(), Error> {
        self.render(kind::JSON, &serde_json::to_value(data)?)
    }

    /// Renders `data` through the `jsonp` resolver and writes the bytes.
    ///
    /// There is no default jsonp resolver; register a
    /// [`JsonpResolver`](crate::render::JsonpResolver) first or this returns
    /// [`Error::ResolverNotFound`].
    pub fn jsonp<T: Serialize>(&self, data: &T) -> Result<(), Error> {
        self.render(kind::JSONP, &serde_json::to_value(data)?)
    }

    /// Writes `body` through the `content` resolver as plain text.
    pub fn content(&self, body: impl Into<String>) -> Result<(), Error> {
        self.render(kind::CONTENT, &Value::String(body.into()))
    }

    /// Writes `body` through the `html` resolver as trusted HTML.
    pub fn html(&self, body: impl Into<String>) -> Result<(), Error> {
        self.render(kind::HTML, &Value::String(body.into()))
    }

    /// Renders through the resolver registered under `kind`.
    ///
    /// This is how custom-registered kinds are reached. Built-in kinds stamp
    /// their content-type on success; other kinds leave headers untouched.
    /// Errors are returned to the caller and nothing is written.
    pub fn render(&self, kind: &str, data: &Value) -> Result<(), Error> {
        let resolver = self
            .config
            .result_resolver(kind)
            .ok_or_else(|| Error::resolver_not_found(kind))?;
        let bytes = resolver.render(data)?;
        if let Some(ct) = content_type_for(kind) {
            self.set_header(http::header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        self.write(&bytes);
        Ok(())
    }

    /// Renders the named template against `data` and writes the bytes.
    ///
    /// No content-type is set; template output declares its own meaning.
    pub fn template<T: Serialize>(&self, name: &str, data: &T) -> Result<(), Error> {
        let resolver = self
            .config
            .template_resolver()
            .ok_or_else(|| Error::resolver_not_found("template"))?;
        let bytes = resolver.render(name, &serde_json::to_value(data)?)?;
        self.write(&bytes);
        Ok(())
    }

    /// Sets the response status line.
    ///
    /// Must be called before any body write; once bytes are out the status
    /// is fixed and later calls are ignored.
    pub fn status(&self, code: StatusCode) {
        let mut state = self.state();
        if state.committed {
            debug!(%code, "status ignored, body already written");
            return;
        }
        state.status = code;
    }

    /// Sets (replacing, not appending) a response header.
    pub fn set_header(&self, name: HeaderName, value: HeaderValue) {
        self.state().headers.insert(name, value);
    }

    fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.state();
        state.body.extend_from_slice(bytes);
        state.committed = true;
    }

    fn state(&self) -> MutexGuard<'_, ResponseState> {
        self.response.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drains the accumulated response for the server to emit.
    pub(crate) fn finish(&self) -> ResponseState {
        let mut state = self.state();
        ResponseState {
            status: state.status,
            headers: std::mem::take(&mut state.headers),
            body: std::mem::take(&mut state.body),
            committed: state.committed,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A context over an in-memory request, for exercising handlers directly.
    pub(crate) fn context(config: Config, method: Method, uri: &str, body: &[u8]) -> Context {
        context_with_headers(config, method, uri, body, HeaderMap::new())
    }

    pub(crate) fn context_with_headers(
        config: Config,
        method: Method,
        uri: &str,
        body: &[u8],
        headers: HeaderMap,
    ) -> Context {
        let request = RequestParts {
            method,
            uri: uri.parse().unwrap(),
            headers,
            body: Bytes::copy_from_slice(body),
        };
        Context::new(Arc::new(config), request)
    }
}
