//! Panic recovery middleware: converts panics anywhere in the chain into
//! errors before they reach the HTTP runtime.

use crate::{Context, Error, HttpError, MiddlewareFunc, Next};
use futures::FutureExt;
use http::StatusCode;
use std::any::Any;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Config for the [`recovery`] middleware.
#[derive(Debug, Clone, Default)]
pub struct RecoveryConfig {
  /// Suppress the captured backtrace in the log event.
  pub disable_print_stack: bool,
}

/// Recovers from panics anywhere in the chain and hands control to the
/// centralized error resolver. First in the classic preset.
pub fn recovery() -> MiddlewareFunc {
  recovery_with_config(RecoveryConfig::default())
}

/// [`recovery`] with explicit configuration.
pub fn recovery_with_config(config: RecoveryConfig) -> MiddlewareFunc {
  Arc::new(move |c: Context, next: Next| {
    let disable_print_stack = config.disable_print_stack;
    Box::pin(async move {
      match AssertUnwindSafe(next.run(c)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
          let message = panic_message(payload.as_ref());
          if disable_print_stack {
            tracing::error!(panic = %message, "recovered from panic");
          } else {
            let backtrace = Backtrace::force_capture();
            tracing::error!(panic = %message, %backtrace, "recovered from panic");
          }
          Err(Error::Http(HttpError::with_message(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
          )))
        }
      }
    })
  })
}

/// The panic value, preserved as text.
fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_owned()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_owned()
  }
}
