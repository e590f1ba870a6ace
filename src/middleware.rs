//! Middleware as handler wrapping.
//!
//! A middleware is a function from one request-handling capability to
//! another: it receives the next [`BoxedHandler`] in line and returns the
//! handler that should run in its place. Composition is a right fold over
//! the registered list, so for middleware `[A, B, C]` and handler `H` the
//! composed handler is `A(B(C(H)))` — the first registration is the
//! outermost wrapper, running first on the way in and last on the way out.
//!
//! Register middleware on a router node with
//! [`Router::wrap`](crate::Router::wrap); it applies to every handler on
//! that node and its descendants.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::context::Context;
use crate::handler::{self, BoxedHandler};

/// A shared middleware: maps the next handler to its replacement.
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>;

/// Wraps a plain function as a [`Middleware`].
///
/// ```rust,no_run
/// use trellis::{handler, middleware, BoxedHandler, Context};
///
/// let gate = middleware::from_fn(|next: BoxedHandler| {
///     handler::from_fn(move |ctx: Context| {
///         let next = next.clone();
///         async move {
///             // before…
///             let out = next.call(ctx).await;
///             // …after
///             out
///         }
///     })
/// });
/// ```
pub fn from_fn<F>(f: F) -> Middleware
where
    F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Right-folds `chain` around `handler`, producing the onion.
pub(crate) fn compose(handler: BoxedHandler, chain: &[Middleware]) -> BoxedHandler {
    chain.iter().rev().fold(handler, |next, middleware| middleware(next))
}

/// Per-request tracing: method, path, outcome, latency.
///
/// Wrap it around the whole application or a single module:
///
/// ```rust,no_run
/// # let mut app = trellis::App::new();
/// app.router().wrap(trellis::middleware::trace());
/// ```
pub fn trace() -> Middleware {
    from_fn(|next| {
        handler::from_fn(move |ctx: Context| {
            let next = next.clone();
            async move {
                let started = Instant::now();
                let method = ctx.method().clone();
                let path = ctx.path().to_owned();
                let result = next.call(ctx).await;
                let elapsed = started.elapsed();
                match &result {
                    Ok(()) => info!(%method, path, ?elapsed, "request handled"),
                    Err(e) => warn!(%method, path, ?elapsed, error = %e, "request failed"),
                }
                result
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Config;
    use crate::context::testing::context;
    use crate::error::Error;
    use http::Method;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<String>>>;

    fn recording(label: &'static str, log: CallLog) -> Middleware {
        from_fn(move |next| {
            let log = Arc::clone(&log);
            handler::from_fn(move |ctx: Context| {
                let next = next.clone();
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("{label}:in"));
                    let out = next.call(ctx).await;
                    log.lock().unwrap().push(format!("{label}:out"));
                    out
                }
            })
        })
    }

    fn terminal(log: CallLog) -> BoxedHandler {
        handler::from_fn(move |_ctx: Context| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                Ok::<(), Error>(())
            }
        })
    }

    #[tokio::test]
    async fn composition_is_an_onion() {
        let log: CallLog = Arc::default();
        let chain = vec![
            recording("a", Arc::clone(&log)),
            recording("b", Arc::clone(&log)),
            recording("c", Arc::clone(&log)),
        ];

        let composed = compose(terminal(Arc::clone(&log)), &chain);
        let ctx = context(Config::default(), Method::GET, "/", b"");
        composed.call(ctx).await.unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            ["a:in", "b:in", "c:in", "handler", "c:out", "b:out", "a:out"]
        );
    }

    #[tokio::test]
    async fn empty_chain_is_the_handler_itself() {
        let log: CallLog = Arc::default();
        let composed = compose(terminal(Arc::clone(&log)), &[]);
        composed.call(context(Config::default(), Method::GET, "/", b"")).await.unwrap();
        assert_eq!(*log.lock().unwrap(), ["handler"]);
    }

    async fn halted(_ctx: Context) -> Result<(), Error> {
        Err(Error::msg("halted"))
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let log: CallLog = Arc::default();
        let halt = from_fn(|_next| handler::from_fn(halted));

        let composed = compose(terminal(Arc::clone(&log)), &[halt]);
        let err = composed
            .call(context(Config::default(), Method::GET, "/", b""))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "halted");
        // The wrapped handler never ran.
        assert!(log.lock().unwrap().is_empty());
    }
}
