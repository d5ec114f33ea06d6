#![deny(rust_2018_idioms)]

//! A slim HTTP server framework built around a segment-trie dispatch engine.
//!
//! Applications register handlers against URL path patterns with HTTP method
//! filters, optionally behind chains of middleware, and the framework routes
//! each incoming request to the right handler while applying cross-cutting
//! behaviors such as logging, panic recovery, CORS and rate limiting.
//!
//! ```rust
//! use slender::{Context, Server};
//!
//! let server = Server::new();
//! server.get("/users/:id", |c: Context| async move {
//!     let id = c.path_param("id").unwrap_or_default();
//!     c.string(http::StatusCode::OK, &format!("user {}", id))
//! });
//! ```
//!
//! The registered pattern can contain two types of parameters:
//! ```text
//! Syntax    Type
//! :name     named parameter, matches a single segment
//! *name     catch-all parameter, matches the rest of the path
//! ```
//!
//! Named parameters match anything until the next `/` or the path end, and
//! catch-all parameters must always be the final path element. A static
//! segment always wins over a parameter, and a parameter wins over a
//! catch-all, so `/users/new` and `/users/:id` may coexist.
//!
//! Middleware follows the onion model: a middleware receives the request
//! context and a [`Next`] value, runs code on the way in, forwards with
//! `next.run(c).await`, and runs code on the way out. Execution order for a
//! request is server → router → collector (outer to inner) → route → handler,
//! and the response ascends in reverse.
//!
//! Routers are selected per request by virtual host (exact name first, then
//! a single `*.suffix` wildcard level, then the default router), and each
//! request borrows a pooled [`Context`] that is reset on acquisition.

mod binder;
mod compose;
mod context;
mod error;
mod response;
mod router;
mod server;
mod tree;

pub mod middleware;

pub use binder::{Binder, DefaultBinder};
pub use compose::{compose, passthrough, Next};
pub use context::{Context, PathParam, PathParams};
pub use error::{Error, HttpError, RegisterError};
pub use response::ResponseWriter;
pub use router::{
  Collector, Renderer, RouteHandle, RouteInfo, RouteMatch, RouteMatchType, Router, RouterConfig,
};
pub use server::Server;

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// A function that serves one HTTP request through its [`Context`].
///
/// Handlers report their outcome as a `Result`: returning an error hands the
/// request to the error resolver instead of writing a response directly.
pub type HandlerFunc = Arc<dyn Fn(Context) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// A function that processes a request around the rest of the chain.
///
/// A middleware that does not invoke its [`Next`] short-circuits the chain;
/// code after `next.run(c).await` executes while the response ascends.
pub type MiddlewareFunc =
  Arc<dyn Fn(Context, Next) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// A centralized error handler, invoked by the error resolver with the
/// context and the error returned from the chain.
pub type ErrorHandlerFunc = Arc<dyn Fn(&Context, &Error) + Send + Sync>;

/// Type-erases an async function into a [`HandlerFunc`].
///
/// ```rust
/// use slender::{handler_fn, Context};
///
/// let h = handler_fn(|c: Context| async move {
///     c.string(http::StatusCode::OK, "hello")
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFunc
where
  F: Fn(Context) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
  Arc::new(move |c| Box::pin(f(c)))
}

/// Type-erases an async function into a [`MiddlewareFunc`].
///
/// ```rust
/// use slender::{middleware_fn, Context, Next};
///
/// let mw = middleware_fn(|c: Context, next: Next| async move {
///     // request descends ...
///     let result = next.run(c).await;
///     // ... response ascends
///     result
/// });
/// ```
pub fn middleware_fn<F, Fut>(f: F) -> MiddlewareFunc
where
  F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
  Arc::new(move |c, next| Box::pin(f(c, next)))
}

/// Type-erases a plain closure into an [`ErrorHandlerFunc`].
pub fn error_handler_fn<F>(f: F) -> ErrorHandlerFunc
where
  F: Fn(&Context, &Error) + Send + Sync + 'static,
{
  Arc::new(f)
}

/// Wraps a handler in middleware, producing a plain handler.
pub fn tap(h: HandlerFunc, middleware: &[MiddlewareFunc]) -> HandlerFunc {
  match compose(middleware) {
    None => h,
    Some(mw) => Arc::new(move |c| {
      let mw = mw.clone();
      let next = Next::from_handler(h.clone());
      Box::pin(async move { (*mw)(c, next).await })
    }),
  }
}
