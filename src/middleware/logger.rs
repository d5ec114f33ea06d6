//! Request logging middleware.

use crate::{Context, MiddlewareFunc, Next};
use std::sync::Arc;
use std::time::Instant;

/// Emits one structured event per request with method, path, status,
/// latency and bytes written. Errors pass through unchanged and are logged
/// with the event.
pub fn logger() -> MiddlewareFunc {
  Arc::new(|c: Context, next: Next| {
    Box::pin(async move {
      let start = Instant::now();
      let method = c.method().to_string();
      let path = c.path();
      let result = next.run(c.clone()).await;
      let latency_ms = start.elapsed().as_millis() as u64;
      let status = c.response_status().map(|s| s.as_u16()).unwrap_or(0);
      let bytes_out = c.response_size();
      match &result {
        Ok(()) => {
          tracing::info!(%method, %path, status, latency_ms, bytes_out, "request");
        }
        Err(err) => {
          tracing::info!(%method, %path, status, latency_ms, bytes_out, error = %err, "request");
        }
      }
      result
    })
  })
}
