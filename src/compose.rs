//! Middleware composition following the onion model: the request descends
//! through the stack in registration order and the response ascends in
//! reverse, each layer deciding whether to forward via its [`Next`].

use crate::{Context, Error, HandlerFunc, MiddlewareFunc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// The continuation handed to a middleware: invoking it runs the rest of the
/// chain (deeper middleware, then the terminal handler).
#[derive(Clone)]
pub struct Next {
  inner: Arc<dyn Fn(Context) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>,
}

impl Next {
  pub(crate) fn new<F>(f: F) -> Next
  where
    F: Fn(Context) -> BoxFuture<'static, Result<(), Error>> + Send + Sync + 'static,
  {
    Next { inner: Arc::new(f) }
  }

  /// A continuation that invokes a terminal handler directly.
  pub fn from_handler(h: HandlerFunc) -> Next {
    Next::new(move |c| (*h)(c))
  }

  /// Runs the rest of the chain.
  pub async fn run(&self, c: Context) -> Result<(), Error> {
    (*self.inner)(c).await
  }
}

/// A middleware that forwards unconditionally. Useful as an explicit
/// placeholder where a middleware slot must be filled.
pub fn passthrough() -> MiddlewareFunc {
  Arc::new(|c, next| Box::pin(async move { next.run(c).await }))
}

/// Merges an ordered middleware list into a single middleware.
///
/// Returns `None` for an empty list (callers treat that as "invoke the
/// terminal directly") and the sole entry for a one-element list. The
/// composed middleware tracks the deepest layer reached per invocation, so a
/// layer that calls its `next` a second time gets
/// [`Error::NextCalledMultipleTimes`] instead of re-running the tail of the
/// chain.
pub fn compose(middleware: &[MiddlewareFunc]) -> Option<MiddlewareFunc> {
  match middleware.len() {
    0 => None,
    1 => Some(middleware[0].clone()),
    _ => {
      let stack: Arc<[MiddlewareFunc]> = middleware.to_vec().into();
      Some(Arc::new(move |c, next| {
        let stack = stack.clone();
        Box::pin(async move {
          let deepest = Arc::new(AtomicI64::new(-1));
          dispatch(stack, 0, deepest, c, next).await
        })
      }))
    }
  }
}

fn dispatch(
  stack: Arc<[MiddlewareFunc]>,
  i: usize,
  deepest: Arc<AtomicI64>,
  c: Context,
  terminal: Next,
) -> BoxFuture<'static, Result<(), Error>> {
  Box::pin(async move {
    if (i as i64) <= deepest.load(Ordering::Acquire) {
      return Err(Error::NextCalledMultipleTimes);
    }
    deepest.store(i as i64, Ordering::Release);
    if i == stack.len() {
      return terminal.run(c).await;
    }
    let mw = stack[i].clone();
    let next = {
      let stack = stack.clone();
      let deepest = deepest.clone();
      let terminal = terminal.clone();
      Next::new(move |c| {
        dispatch(stack.clone(), i + 1, deepest.clone(), c, terminal.clone())
      })
    };
    (*mw)(c, next).await
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{middleware_fn, Context};
  use parking_lot::Mutex;

  fn trace_middleware(trace: Arc<Mutex<Vec<String>>>, id: &'static str) -> MiddlewareFunc {
    middleware_fn(move |c: Context, next: Next| {
      let trace = trace.clone();
      async move {
        trace.lock().push(format!("{}-in", id));
        let result = next.run(c).await;
        trace.lock().push(format!("{}-out", id));
        result
      }
    })
  }

  fn terminal(trace: Arc<Mutex<Vec<String>>>) -> Next {
    Next::new(move |_c| {
      let trace = trace.clone();
      Box::pin(async move {
        trace.lock().push("h".to_owned());
        Ok(())
      })
    })
  }

  #[tokio::test]
  async fn onion_order() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mw = compose(&[
      trace_middleware(trace.clone(), "m1"),
      trace_middleware(trace.clone(), "m2"),
      trace_middleware(trace.clone(), "m3"),
    ])
    .unwrap();

    (*mw)(Context::for_testing(), terminal(trace.clone()))
      .await
      .unwrap();
    assert_eq!(
      *trace.lock(),
      vec!["m1-in", "m2-in", "m3-in", "h", "m3-out", "m2-out", "m1-out"]
    );
  }

  #[tokio::test]
  async fn empty_list_composes_to_none() {
    assert!(compose(&[]).is_none());
  }

  #[tokio::test]
  async fn single_entry_is_returned_as_is() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let only = trace_middleware(trace.clone(), "m");
    let mw = compose(std::slice::from_ref(&only)).unwrap();
    assert!(Arc::ptr_eq(&mw, &only));
  }

  #[tokio::test]
  async fn short_circuit_skips_inner_layers() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let blocker: MiddlewareFunc = middleware_fn(|_c: Context, _next: Next| async move {
      Err(Error::forbidden())
    });
    let mw = compose(&[blocker, trace_middleware(trace.clone(), "inner")]).unwrap();

    let err = (*mw)(Context::for_testing(), terminal(trace.clone()))
      .await
      .unwrap_err();
    assert!(err.is_forbidden());
    assert!(trace.lock().is_empty());
  }

  #[tokio::test]
  async fn double_next_is_detected() {
    let bad: MiddlewareFunc = middleware_fn(|c: Context, next: Next| async move {
      next.run(c.clone()).await?;
      next.run(c).await
    });
    let noop = passthrough();
    let mw = compose(&[bad, noop]).unwrap();

    let err = (*mw)(Context::for_testing(), Next::new(|_c| Box::pin(async { Ok(()) })))
      .await
      .unwrap_err();
    assert!(matches!(err, Error::NextCalledMultipleTimes));
  }

  #[tokio::test]
  async fn composed_chain_is_reusable_across_invocations() {
    let trace = Arc::new(Mutex::new(Vec::new()));
    let mw = compose(&[
      trace_middleware(trace.clone(), "m1"),
      trace_middleware(trace.clone(), "m2"),
    ])
    .unwrap();

    for _ in 0..2 {
      (*mw)(Context::for_testing(), terminal(trace.clone()))
        .await
        .unwrap();
    }
    assert_eq!(trace.lock().len(), 10);
  }
}
