//! Request data binding: decoding the request into application types by
//! Content-Type.

use crate::context::Context;
use crate::error::{Error, HttpError};
use futures::future::BoxFuture;
use http::{Method, StatusCode};
use serde_json::{Map, Value};

/// Decodes a request into a JSON value that `Context::bind` deserializes
/// into the caller's type. Single-method seam so applications can swap in
/// their own decoding rules.
pub trait Binder: Send + Sync + 'static {
  fn bind_value<'a>(&'a self, c: &'a Context) -> BoxFuture<'a, Result<Value, Error>>;
}

/// The standard binder: query string for bodyless methods, JSON or
/// urlencoded form otherwise, and the unsupported-media-type error for
/// anything else.
pub struct DefaultBinder;

impl Binder for DefaultBinder {
  fn bind_value<'a>(&'a self, c: &'a Context) -> BoxFuture<'a, Result<Value, Error>> {
    Box::pin(async move {
      let method = c.method();
      if method == Method::GET || method == Method::HEAD || method == Method::DELETE {
        return Ok(pairs_to_value(c.query_params()));
      }
      let content_type = c.header("content-type").unwrap_or_default();
      let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
      match mime.as_str() {
        "application/json" => {
          let body = c.read_body().await?;
          if body.is_empty() {
            return Ok(Value::Object(Map::new()));
          }
          serde_json::from_slice(&body)
            .map_err(|err| Error::Http(HttpError::new(StatusCode::BAD_REQUEST).wrap(err)))
        }
        "application/x-www-form-urlencoded" => Ok(pairs_to_value(c.form_params().await?)),
        "" => Ok(pairs_to_value(c.query_params())),
        _ => Err(Error::unsupported_media_type()),
      }
    })
  }
}

/// Later pairs win on duplicate keys, matching form semantics for scalar
/// targets.
fn pairs_to_value(pairs: Vec<(String, String)>) -> Value {
  let mut map = Map::new();
  for (name, value) in pairs {
    map.insert(name, Value::String(value));
  }
  Value::Object(map)
}

#[cfg(test)]
mod tests {
  use super::*;
  use hyper::Body;
  use serde::Deserialize;

  #[derive(Debug, Deserialize, PartialEq)]
  struct Login {
    user: String,
    pass: String,
  }

  fn context_for(req: http::Request<Body>) -> Context {
    let c = Context::for_testing();
    c.reset(req, None, None, None);
    c
  }

  #[tokio::test]
  async fn binds_json_body() {
    let req = http::Request::builder()
      .method(Method::POST)
      .uri("/login")
      .header("content-type", "application/json")
      .body(Body::from(r#"{"user":"u","pass":"p"}"#))
      .unwrap();
    let c = context_for(req);
    let login: Login = c.bind().await.unwrap();
    assert_eq!(
      login,
      Login {
        user: "u".to_owned(),
        pass: "p".to_owned()
      }
    );
  }

  #[tokio::test]
  async fn binds_urlencoded_form() {
    let req = http::Request::builder()
      .method(Method::POST)
      .uri("/login")
      .header("content-type", "application/x-www-form-urlencoded")
      .body(Body::from("user=u&pass=p%21"))
      .unwrap();
    let c = context_for(req);
    let login: Login = c.bind().await.unwrap();
    assert_eq!(login.pass, "p!");
  }

  #[tokio::test]
  async fn binds_query_for_get() {
    let req = http::Request::builder()
      .method(Method::GET)
      .uri("/login?user=u&pass=p")
      .body(Body::empty())
      .unwrap();
    let c = context_for(req);
    let login: Login = c.bind().await.unwrap();
    assert_eq!(login.user, "u");
  }

  #[tokio::test]
  async fn rejects_unknown_content_type() {
    let req = http::Request::builder()
      .method(Method::POST)
      .uri("/login")
      .header("content-type", "application/msgpack")
      .body(Body::from("xx"))
      .unwrap();
    let c = context_for(req);
    let err = c.bind::<Login>().await.unwrap_err();
    assert!(err.is_unsupported_media_type());
  }

  #[tokio::test]
  async fn malformed_json_maps_to_bad_request() {
    let req = http::Request::builder()
      .method(Method::POST)
      .uri("/login")
      .header("content-type", "application/json")
      .body(Body::from("{nope"))
      .unwrap();
    let c = context_for(req);
    let err = c.bind::<Login>().await.unwrap_err();
    assert!(err.is_bad_request());
  }
}
