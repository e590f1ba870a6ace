//! Unified error type.

use std::net::AddrParseError;

use thiserror::Error as ThisError;

/// The error type returned by trellis's fallible operations.
///
/// Render failures and handler failures share this type: a handler returns
/// whatever `Error` its render calls produced, or builds its own with
/// [`Error::msg`]. The server writes the `Display` output of any error a
/// handler returns as the body of a plain-text 500.
#[derive(Debug, ThisError)]
pub enum Error {
    /// No resolver is registered under the requested render kind.
    #[error("no resolver registered for `{kind}`")]
    ResolverNotFound { kind: String },

    /// JSON marshaling failed inside the json or jsonp resolver.
    #[error("json render: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// Template lookup or execution failed.
    #[error("template render: {source}")]
    Template {
        #[from]
        source: minijinja::Error,
    },

    /// The content and html resolvers accept only string payloads.
    #[error("`{kind}` render expects a string payload")]
    StringPayload { kind: &'static str },

    /// Two registrations flattened to the same exact pattern.
    #[error("duplicate route `{0}`")]
    DuplicateRoute(String),

    /// The listen address did not parse as `host:port`.
    #[error("invalid listen address: {source}")]
    InvalidAddr {
        #[from]
        source: AddrParseError,
    },

    /// Socket-level failure while binding or accepting.
    #[error("io: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A free-form handler failure.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Builds a handler error from any displayable text.
    ///
    /// The text is what the client sees in the 500 body, verbatim.
    pub fn msg(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    pub(crate) fn resolver_not_found(kind: &str) -> Self {
        Self::ResolverNotFound { kind: kind.to_owned() }
    }
}
