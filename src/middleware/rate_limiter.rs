//! Token-bucket rate limiting keyed by request source.

use crate::{Context, Error, MiddlewareFunc, Next};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Decides whether the identified source may proceed. Single-method seam so
/// applications can back it by a shared store.
pub trait RateLimiterStore: Send + Sync + 'static {
  fn allow(&self, identifier: &str) -> Result<bool, Error>;
}

/// Config for [`RateLimiterMemoryStore`].
#[derive(Debug, Clone)]
pub struct RateLimiterMemoryStoreConfig {
  /// Tokens replenished per second.
  pub rate: f64,
  /// Bucket capacity; the largest tolerated burst.
  pub burst: f64,
  /// Visitors idle longer than this are swept.
  pub expires_in: Duration,
}

impl Default for RateLimiterMemoryStoreConfig {
  fn default() -> RateLimiterMemoryStoreConfig {
    RateLimiterMemoryStoreConfig {
      rate: 1.0,
      burst: 1.0,
      expires_in: Duration::from_secs(3 * 60),
    }
  }
}

struct Visitor {
  tokens: f64,
  last_seen: Instant,
}

/// An in-process token-bucket store, one bucket per identifier.
pub struct RateLimiterMemoryStore {
  visitors: Mutex<HashMap<String, Visitor>>,
  last_cleanup: Mutex<Instant>,
  rate: f64,
  burst: f64,
  expires_in: Duration,
}

impl RateLimiterMemoryStore {
  /// A store allowing `rate` requests per second with an equal burst.
  pub fn new(rate: f64) -> RateLimiterMemoryStore {
    RateLimiterMemoryStore::with_config(RateLimiterMemoryStoreConfig {
      rate,
      burst: rate.max(1.0),
      ..RateLimiterMemoryStoreConfig::default()
    })
  }

  pub fn with_config(config: RateLimiterMemoryStoreConfig) -> RateLimiterMemoryStore {
    RateLimiterMemoryStore {
      visitors: Mutex::new(HashMap::new()),
      last_cleanup: Mutex::new(Instant::now()),
      rate: config.rate,
      burst: config.burst,
      expires_in: config.expires_in,
    }
  }

  fn allow_at(&self, identifier: &str, now: Instant) -> bool {
    let mut visitors = self.visitors.lock();
    let visitor = visitors.entry(identifier.to_owned()).or_insert(Visitor {
      tokens: self.burst,
      last_seen: now,
    });
    let elapsed = now.saturating_duration_since(visitor.last_seen).as_secs_f64();
    visitor.tokens = (visitor.tokens + elapsed * self.rate).min(self.burst);
    visitor.last_seen = now;
    if visitor.tokens >= 1.0 {
      visitor.tokens -= 1.0;
      true
    } else {
      false
    }
  }

  fn cleanup_stale_visitors(&self, now: Instant) {
    self
      .visitors
      .lock()
      .retain(|_, v| now.saturating_duration_since(v.last_seen) < self.expires_in);
  }

  #[cfg(test)]
  fn visitor_count(&self) -> usize {
    self.visitors.lock().len()
  }
}

impl RateLimiterStore for RateLimiterMemoryStore {
  fn allow(&self, identifier: &str) -> Result<bool, Error> {
    let now = Instant::now();
    {
      let mut last = self.last_cleanup.lock();
      if now.saturating_duration_since(*last) > self.expires_in {
        *last = now;
        drop(last);
        self.cleanup_stale_visitors(now);
      }
    }
    Ok(self.allow_at(identifier, now))
  }
}

/// Limits request rates per client IP (see `Context::real_ip`). Denials
/// surface as the too-many-requests error; a failing store maps to 403.
pub fn rate_limiter(store: Arc<dyn RateLimiterStore>) -> MiddlewareFunc {
  Arc::new(move |c: Context, next: Next| {
    let store = store.clone();
    Box::pin(async move {
      let identifier = c.real_ip();
      match store.allow(&identifier) {
        Ok(true) => next.run(c).await,
        Ok(false) => Err(Error::too_many_requests()),
        Err(_) => Err(Error::forbidden()),
      }
    })
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn burst_then_denial_then_replenish() {
    let store = RateLimiterMemoryStore::with_config(RateLimiterMemoryStoreConfig {
      rate: 1.0,
      burst: 1.0,
      expires_in: Duration::from_millis(10),
    });
    let t0 = Instant::now();
    assert!(store.allow_at("a", t0));
    assert!(!store.allow_at("a", t0));
    // a second later one token is back
    assert!(store.allow_at("a", t0 + Duration::from_secs(1)));
  }

  #[test]
  fn buckets_are_per_identifier() {
    let store = RateLimiterMemoryStore::new(1.0);
    let t0 = Instant::now();
    assert!(store.allow_at("a", t0));
    assert!(store.allow_at("b", t0));
    assert!(!store.allow_at("a", t0));
  }

  #[test]
  fn stale_visitors_are_swept() {
    let store = RateLimiterMemoryStore::with_config(RateLimiterMemoryStoreConfig {
      rate: 1.0,
      burst: 1.0,
      expires_in: Duration::from_millis(10),
    });
    let t0 = Instant::now();
    store.allow_at("a", t0);
    assert_eq!(store.visitor_count(), 1);
    store.cleanup_stale_visitors(t0 + Duration::from_millis(20));
    assert_eq!(store.visitor_count(), 0);
  }
}
