//! Cross-origin resource sharing middleware.

use crate::{Context, MiddlewareFunc, Next};
use http::{Method, StatusCode};
use std::sync::Arc;

/// Config for the [`cors`] middleware.
#[derive(Debug, Clone)]
pub struct CorsConfig {
  /// Origins that may access the resource. Entries may be exact origins,
  /// `"*"`, or contain a single `*` wildcard
  /// (e.g. `https://*.example.com`).
  pub allow_origins: Vec<String>,
  /// Methods allowed when accessing the resource; answered on preflight.
  pub allow_methods: Vec<String>,
  /// Request headers usable in the actual request; empty echoes the
  /// preflight's requested headers.
  pub allow_headers: Vec<String>,
  /// Whether the response may be exposed when the credentials flag is set.
  pub allow_credentials: bool,
  /// Response headers clients are allowed to read.
  pub expose_headers: Vec<String>,
  /// How long (in seconds) a preflight result may be cached; 0 omits the
  /// header.
  pub max_age: u64,
}

impl Default for CorsConfig {
  fn default() -> CorsConfig {
    CorsConfig {
      allow_origins: vec!["*".to_owned()],
      allow_methods: vec![
        Method::GET.to_string(),
        Method::HEAD.to_string(),
        Method::PUT.to_string(),
        Method::PATCH.to_string(),
        Method::POST.to_string(),
        Method::DELETE.to_string(),
      ],
      allow_headers: Vec::new(),
      allow_credentials: false,
      expose_headers: Vec::new(),
      max_age: 0,
    }
  }
}

/// CORS with the default config: every origin, the standard method set.
pub fn cors() -> MiddlewareFunc {
  cors_with_config(CorsConfig::default())
}

/// [`cors`] with explicit configuration. Preflight OPTIONS requests are
/// answered directly and never reach the router.
pub fn cors_with_config(config: CorsConfig) -> MiddlewareFunc {
  let config = Arc::new(config);
  Arc::new(move |c: Context, next: Next| {
    let config = config.clone();
    Box::pin(async move {
      let origin = c.header("origin").unwrap_or_default();
      let preflight = c.method() == Method::OPTIONS;
      let allow_origin = allowed_origin(&config.allow_origins, &origin);

      // responses depend on the requesting origin
      c.add_header("vary", "Origin");

      if !preflight {
        let Some(allow_origin) = allow_origin else {
          return next.run(c).await;
        };
        c.set_header("access-control-allow-origin", &allow_origin);
        if config.allow_credentials {
          c.set_header("access-control-allow-credentials", "true");
        }
        if !config.expose_headers.is_empty() {
          c.set_header(
            "access-control-expose-headers",
            &config.expose_headers.join(", "),
          );
        }
        return next.run(c).await;
      }

      c.add_header("vary", "Access-Control-Request-Method");
      c.add_header("vary", "Access-Control-Request-Headers");
      let Some(allow_origin) = allow_origin else {
        return c.no_content(StatusCode::NO_CONTENT);
      };
      c.set_header("access-control-allow-origin", &allow_origin);
      c.set_header(
        "access-control-allow-methods",
        &config.allow_methods.join(", "),
      );
      if config.allow_credentials {
        c.set_header("access-control-allow-credentials", "true");
      }
      if !config.allow_headers.is_empty() {
        c.set_header(
          "access-control-allow-headers",
          &config.allow_headers.join(", "),
        );
      } else if let Some(requested) = c.header("access-control-request-headers") {
        c.set_header("access-control-allow-headers", &requested);
      }
      if config.max_age > 0 {
        c.set_header("access-control-max-age", &config.max_age.to_string());
      }
      c.no_content(StatusCode::NO_CONTENT)
    })
  })
}

fn allowed_origin(allowed: &[String], origin: &str) -> Option<String> {
  if origin.is_empty() {
    return None;
  }
  for pattern in allowed {
    if pattern == "*" {
      return Some("*".to_owned());
    }
    if pattern == origin {
      return Some(origin.to_owned());
    }
    // one wildcard per pattern, matching any (non-empty) span
    if let Some((prefix, suffix)) = pattern.split_once('*') {
      if origin.len() > prefix.len() + suffix.len()
        && origin.starts_with(prefix)
        && origin.ends_with(suffix)
      {
        return Some(origin.to_owned());
      }
    }
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn origin_matching() {
    let exact = vec!["https://app.example.com".to_owned()];
    assert_eq!(
      allowed_origin(&exact, "https://app.example.com").as_deref(),
      Some("https://app.example.com")
    );
    assert_eq!(allowed_origin(&exact, "https://evil.example.com"), None);

    let star = vec!["*".to_owned()];
    assert_eq!(allowed_origin(&star, "https://anything").as_deref(), Some("*"));

    let wildcard = vec!["https://*.example.com".to_owned()];
    assert_eq!(
      allowed_origin(&wildcard, "https://foo.example.com").as_deref(),
      Some("https://foo.example.com")
    );
    assert_eq!(allowed_origin(&wildcard, "https://example.org"), None);
    assert_eq!(allowed_origin(&wildcard, ""), None);
  }
}
