//! Static file service: a handler for wildcard-registered directory routes
//! and a middleware that serves files when they exist and forwards
//! otherwise.

use crate::{Context, Error, HandlerFunc, MiddlewareFunc, Next};
use http::{Method, StatusCode};
use percent_encoding::percent_decode_str;
use std::path::PathBuf;
use std::sync::Arc;

/// A handler serving files below `root`, fed by the route's `*` capture.
/// Registered by `static_dir`; directory requests without a trailing slash
/// are redirected so relative links resolve, directories serve their
/// `index.html`, and misses produce the not-found sentinel.
pub fn static_directory(root: &str) -> HandlerFunc {
  // restrict to the working directory rather than the filesystem root
  let root = PathBuf::from(if root.is_empty() { "." } else { root });
  Arc::new(move |c: Context| {
    let root = root.clone();
    Box::pin(async move {
      let captured = c.path_param("*").unwrap_or_default();
      let decoded = match percent_decode_str(&captured).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => captured,
      };
      let name = root.join(sanitize(&decoded));
      let meta = tokio::fs::metadata(&name)
        .await
        .map_err(|_| Error::not_found())?;
      let path = c.path();
      if meta.is_dir() && !path.ends_with('/') {
        return c.redirect(StatusCode::MOVED_PERMANENTLY, &format!("{}/", path));
      }
      c.file(&name.to_string_lossy()).await
    })
  })
}

/// Middleware that serves existing files below `root` for GET and HEAD
/// requests and forwards everything else down the chain.
pub fn static_server(root: &str) -> MiddlewareFunc {
  let root = PathBuf::from(if root.is_empty() { "." } else { root });
  Arc::new(move |c: Context, next: Next| {
    let root = root.clone();
    Box::pin(async move {
      let method = c.method();
      if method != Method::GET && method != Method::HEAD {
        return next.run(c).await;
      }
      let path = c.path();
      let decoded = match percent_decode_str(&path).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path,
      };
      let mut name = root.join(sanitize(&decoded));
      match tokio::fs::metadata(&name).await {
        Ok(meta) if meta.is_dir() => {
          name.push("index.html");
          if tokio::fs::metadata(&name).await.is_err() {
            return next.run(c).await;
          }
        }
        Ok(_) => {}
        Err(_) => return next.run(c).await,
      }
      c.file(&name.to_string_lossy()).await
    })
  })
}

/// Resolves `.` and `..` without ever escaping the root.
fn sanitize(path: &str) -> String {
  let mut parts: Vec<&str> = Vec::new();
  for part in path.split('/') {
    match part {
      "" | "." => {}
      ".." => {
        parts.pop();
      }
      part => parts.push(part),
    }
  }
  parts.join("/")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_never_escapes_root() {
    assert_eq!(sanitize("a/b/c.txt"), "a/b/c.txt");
    assert_eq!(sanitize("../../etc/passwd"), "etc/passwd");
    assert_eq!(sanitize("a/../../b"), "b");
    assert_eq!(sanitize("./a//b/."), "a/b");
    assert_eq!(sanitize(""), "");
  }
}
