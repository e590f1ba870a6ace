//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The router holds handlers of *different* concrete types in one flat list,
//! and the middleware chain passes handlers around as values. Rust
//! collections hold one concrete type, so handlers are erased behind an
//! internal trait object and shared via `Arc`, wrapped in [`BoxedHandler`].
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn hello(ctx: Context) -> Result<(), Error> { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                     ← Handler blanket impl
//!        ↓
//! BoxedHandler(Arc::new(FnHandler(hello)))       ← heap-allocated wrapper
//!        ↓
//! handler.call(ctx)  at request time             ← one vtable dispatch
//! ```
//!
//! A [`Context`] is cheap to clone (three `Arc`s), which is what lets
//! middleware hand it to the next handler while keeping its own view of the
//! request and response.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

/// A heap-allocated, type-erased future for one handler invocation.
///
/// `Send + 'static` let tokio move the future across worker threads.
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'static>>;

/// Internal dispatch interface; private so [`BoxedHandler`] is the only
/// way to invoke an erased handler.
trait ErasedHandler: Send + Sync {
    fn call(&self, ctx: Context) -> BoxFuture;
}

/// A type-erased handler, cheaply clonable and shared across concurrent
/// requests.
///
/// Middleware receives and returns this type: wrapping a `BoxedHandler` in
/// another `BoxedHandler` is exactly how the onion composes.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler + 'static>);

impl BoxedHandler {
    /// Invokes the handler. Middleware calls this on its `next`.
    pub fn call(&self, ctx: Context) -> BoxFuture {
        self.0.call(ctx)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(ctx: Context) -> Result<(), Error>
/// ```
///
/// The handler writes its response through the [`Context`] render helpers
/// and returns `Ok(())`, or returns an [`Error`] for the server to turn
/// into a 500.
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `Handler` on their own types.
mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

/// `Fn(Context) -> Fut` covers named `async fn` items, closures returning
/// futures, and any struct that implements `Fn`.
impl<F, Fut> private::Sealed for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

/// Erases `f` into a [`BoxedHandler`].
///
/// Route registration does this for you; middleware authors call it to build
/// the replacement handler they return:
///
/// ```rust,no_run
/// use trellis::{handler, BoxedHandler, Context, StatusCode};
///
/// fn require_token(next: BoxedHandler) -> BoxedHandler {
///     handler::from_fn(move |ctx: Context| {
///         let next = next.clone();
///         async move {
///             if ctx.header("authorization").is_none() {
///                 ctx.status(StatusCode::UNAUTHORIZED);
///                 return ctx.content("missing token");
///             }
///             next.call(ctx).await
///         }
///     })
/// }
/// ```
pub fn from_fn(f: impl Handler) -> BoxedHandler {
    f.into_boxed_handler()
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype wrapper that holds a concrete handler `F` and implements
/// [`ErasedHandler`], bridging the typed world to the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture {
        let fut = (self.0)(ctx);
        Box::pin(fut)
    }
}
