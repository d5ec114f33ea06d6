//! The per-request context: request accessors, path/query parameters, the
//! per-request store and response helpers.
//!
//! A `Context` is a cheap clone of an `Arc` handle. Contexts are pooled by
//! the server and reset on every acquisition; user code must not keep one
//! beyond the request it was handed for.

use crate::binder::Binder;
use crate::error::Error;
use crate::response::ResponseWriter;
use crate::router::{Renderer, RouteInfo, RouteMatchType, Router};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_DISPOSITION, LOCATION, SET_COOKIE};
use http::request::Parts;
use http::{Method, Request, StatusCode, Uri};
use hyper::Body;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One captured path parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParam {
  pub name: String,
  pub value: String,
}

/// The ordered parameter captures of the current match.
///
/// The backing storage is reused across requests: the server sizes it to the
/// maximum parameter count over all registered routes, and a reset truncates
/// without deallocating.
#[derive(Debug, Clone, Default)]
pub struct PathParams(Vec<PathParam>);

impl PathParams {
  pub fn with_capacity(n: usize) -> PathParams {
    PathParams(Vec::with_capacity(n))
  }

  /// The value captured under `name`, first capture wins.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|p| p.name == name)
      .map(|p| p.value.as_str())
  }

  pub fn push(&mut self, param: PathParam) {
    self.0.push(param);
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &PathParam> {
    self.0.iter()
  }

  pub(crate) fn clear(&mut self) {
    self.0.clear();
  }
}

#[derive(Default)]
struct MatchState {
  kind: RouteMatchType,
  allow_methods: Vec<String>,
  route: Option<RouteInfo>,
  router: Option<Router>,
}

struct ContextInner {
  parts: Mutex<Parts>,
  body: Mutex<Option<Body>>,
  response: Mutex<ResponseWriter>,
  match_state: Mutex<MatchState>,
  path_params: Mutex<PathParams>,
  current_params: Mutex<Option<PathParams>>,
  query: Mutex<Option<Vec<(String, String)>>>,
  store: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
  binder: Mutex<Option<Arc<dyn Binder>>>,
  renderer: Mutex<Option<Arc<dyn Renderer>>>,
  remote_addr: Mutex<Option<SocketAddr>>,
}

/// The per-request context handed to handlers and middleware.
#[derive(Clone)]
pub struct Context {
  inner: Arc<ContextInner>,
}

impl Context {
  pub(crate) fn new(param_capacity: usize) -> Context {
    let (parts, ()) = Request::new(()).into_parts();
    Context {
      inner: Arc::new(ContextInner {
        parts: Mutex::new(parts),
        body: Mutex::new(None),
        response: Mutex::new(ResponseWriter::new(Method::GET)),
        match_state: Mutex::new(MatchState::default()),
        path_params: Mutex::new(PathParams::with_capacity(param_capacity)),
        current_params: Mutex::new(None),
        query: Mutex::new(None),
        store: RwLock::new(HashMap::new()),
        binder: Mutex::new(None),
        renderer: Mutex::new(None),
        remote_addr: Mutex::new(None),
      }),
    }
  }

  #[cfg(test)]
  pub(crate) fn for_testing() -> Context {
    Context::new(4)
  }

  /// Rebinds the context to a fresh request. Everything observable is
  /// cleared; the path-param storage is truncated, never replaced.
  pub(crate) fn reset(
    &self,
    req: Request<Body>,
    remote_addr: Option<SocketAddr>,
    binder: Option<Arc<dyn Binder>>,
    renderer: Option<Arc<dyn Renderer>>,
  ) {
    let (parts, body) = req.into_parts();
    let method = parts.method.clone();
    *self.inner.parts.lock() = parts;
    *self.inner.body.lock() = Some(body);
    self.inner.response.lock().reset(method);
    *self.inner.match_state.lock() = MatchState::default();
    self.inner.path_params.lock().clear();
    *self.inner.current_params.lock() = None;
    *self.inner.query.lock() = None;
    self.inner.store.write().clear();
    *self.inner.binder.lock() = binder;
    *self.inner.renderer.lock() = renderer;
    *self.inner.remote_addr.lock() = remote_addr;
  }

  pub(crate) fn set_match(
    &self,
    kind: RouteMatchType,
    allow_methods: Vec<String>,
    route: Option<RouteInfo>,
    router: Router,
  ) {
    *self.inner.match_state.lock() = MatchState {
      kind,
      allow_methods,
      route,
      router: Some(router),
    };
  }

  pub(crate) fn matched_router(&self) -> Option<Router> {
    self.inner.match_state.lock().router.clone()
  }

  pub(crate) fn with_params<R>(&self, f: impl FnOnce(&mut PathParams) -> R) -> R {
    f(&mut self.inner.path_params.lock())
  }

  pub(crate) fn take_response(&self) -> http::Response<Body> {
    self.inner.response.lock().take()
  }

  // request side ----------------------------------------------------------

  pub fn method(&self) -> Method {
    self.inner.parts.lock().method.clone()
  }

  pub fn uri(&self) -> Uri {
    self.inner.parts.lock().uri.clone()
  }

  pub fn path(&self) -> String {
    self.inner.parts.lock().uri.path().to_owned()
  }

  /// A request header value, lossily decoded. Multi-valued headers return
  /// the first value.
  pub fn header(&self, name: &str) -> Option<String> {
    let parts = self.inner.parts.lock();
    parts
      .headers
      .get(name)
      .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
  }

  /// The request host, preferring the Host header over the URI authority.
  pub fn host(&self) -> String {
    if let Some(host) = self.header("host") {
      return host;
    }
    let parts = self.inner.parts.lock();
    parts.uri.host().unwrap_or_default().to_owned()
  }

  /// The client address based on `X-Forwarded-For` or `X-Real-IP`, falling
  /// back to the connection's remote address.
  pub fn real_ip(&self) -> String {
    if let Some(forwarded) = self.header("x-forwarded-for") {
      let first = forwarded.split(',').next().unwrap_or("").trim();
      if !first.is_empty() {
        return first
          .trim_start_matches('[')
          .trim_end_matches(']')
          .to_owned();
      }
    }
    if let Some(ip) = self.header("x-real-ip") {
      return ip.trim_start_matches('[').trim_end_matches(']').to_owned();
    }
    let remote_addr = *self.inner.remote_addr.lock();
    remote_addr
      .map(|a| a.ip().to_string())
      .unwrap_or_default()
  }

  /// The request scheme, honoring forwarding headers. Defaults to `http`.
  pub fn scheme(&self) -> String {
    for name in ["x-forwarded-proto", "x-forwarded-protocol"] {
      if let Some(scheme) = self.header(name) {
        if !scheme.is_empty() {
          return scheme;
        }
      }
    }
    if self.header("x-forwarded-ssl").as_deref() == Some("on") {
      return "https".to_owned();
    }
    if let Some(scheme) = self.header("x-url-scheme") {
      return scheme;
    }
    "http".to_owned()
  }

  pub fn is_tls(&self) -> bool {
    self.scheme() == "https"
  }

  pub fn is_websocket(&self) -> bool {
    self
      .header("upgrade")
      .map(|u| u.eq_ignore_ascii_case("websocket"))
      .unwrap_or(false)
  }

  // routing state ---------------------------------------------------------

  /// The routing outcome for this request; `Unknown` inside server-level
  /// middleware, which runs before routing.
  pub fn match_type(&self) -> RouteMatchType {
    self.inner.match_state.lock().kind
  }

  /// Methods the matched leaf accepts; populated on a 405.
  pub fn allow_methods(&self) -> Vec<String> {
    self.inner.match_state.lock().allow_methods.clone()
  }

  /// The matched route, if routing found one.
  pub fn route(&self) -> Option<RouteInfo> {
    self.inner.match_state.lock().route.clone()
  }

  /// A path parameter captured by the router.
  pub fn path_param(&self, name: &str) -> Option<String> {
    if let Some(params) = self.inner.current_params.lock().as_ref() {
      return params.get(name).map(str::to_owned);
    }
    self
      .inner
      .path_params
      .lock()
      .get(name)
      .map(str::to_owned)
  }

  /// A snapshot of the captured path parameters.
  pub fn path_params(&self) -> PathParams {
    if let Some(params) = self.inner.current_params.lock().as_ref() {
      return params.clone();
    }
    self.inner.path_params.lock().clone()
  }

  /// Overrides the path parameters for the rest of this request. The
  /// router-owned storage is left untouched.
  pub fn set_path_params(&self, params: PathParams) {
    *self.inner.current_params.lock() = Some(params);
  }

  // query and form --------------------------------------------------------

  pub fn query_string(&self) -> String {
    self
      .inner
      .parts
      .lock()
      .uri
      .query()
      .unwrap_or_default()
      .to_owned()
  }

  /// The first query value under `name`. Parsed once per request and
  /// cached.
  pub fn query_param(&self, name: &str) -> Option<String> {
    self.ensure_query_cache();
    let cache = self.inner.query.lock();
    cache
      .as_ref()
      .and_then(|pairs| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone()))
  }

  /// All query pairs in request order.
  pub fn query_params(&self) -> Vec<(String, String)> {
    self.ensure_query_cache();
    self.inner.query.lock().clone().unwrap_or_default()
  }

  fn ensure_query_cache(&self) {
    let mut cache = self.inner.query.lock();
    if cache.is_none() {
      let parts = self.inner.parts.lock();
      let query = parts.uri.query().unwrap_or_default();
      let pairs = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
      drop(parts);
      *cache = Some(pairs);
    }
  }

  /// Consumes and parses an urlencoded request body.
  pub async fn form_params(&self) -> Result<Vec<(String, String)>, Error> {
    let body = self.read_body().await?;
    Ok(
      url::form_urlencoded::parse(&body)
        .into_owned()
        .collect(),
    )
  }

  /// The first form field under `name`.
  pub async fn form_value(&self, name: &str) -> Result<Option<String>, Error> {
    Ok(
      self
        .form_params()
        .await?
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v),
    )
  }

  /// Consumes the request body. Fails with [`Error::BodyConsumed`] on a
  /// second read.
  pub async fn read_body(&self) -> Result<Bytes, Error> {
    let body = self.inner.body.lock().take().ok_or(Error::BodyConsumed)?;
    hyper::body::to_bytes(body).await.map_err(Error::internal)
  }

  /// Decodes the request into `T` using the registered binder, dispatching
  /// on Content-Type.
  pub async fn bind<T: DeserializeOwned>(&self) -> Result<T, Error> {
    let binder = self.inner.binder.lock().clone();
    let binder = match binder {
      Some(binder) => binder,
      None => Arc::new(crate::binder::DefaultBinder),
    };
    let value = binder.bind_value(self).await?;
    serde_json::from_value(value)
      .map_err(|err| Error::Http(crate::HttpError::new(StatusCode::BAD_REQUEST).wrap(err)))
  }

  // cookies ---------------------------------------------------------------

  /// The named cookie sent with the request.
  pub fn cookie(&self, name: &str) -> Option<String> {
    self.cookies().into_iter().find(|(k, _)| k == name).map(|(_, v)| v)
  }

  /// All cookies sent with the request.
  pub fn cookies(&self) -> Vec<(String, String)> {
    let Some(header) = self.header("cookie") else {
      return Vec::new();
    };
    header
      .split(';')
      .filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        Some((name.to_owned(), value.to_owned()))
      })
      .collect()
  }

  /// Adds a `Set-Cookie` header to the response.
  pub fn set_cookie(&self, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
      self.inner.response.lock().add_header(SET_COOKIE, value);
    }
  }

  // per-request store -----------------------------------------------------

  /// Saves a value in the per-request store.
  pub fn set(&self, key: &str, value: impl Any + Send + Sync) {
    self.inner.store.write().insert(key.to_owned(), Arc::new(value));
  }

  /// Retrieves a typed value from the per-request store.
  pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
    let store = self.inner.store.read();
    let value = store.get(key)?.clone();
    drop(store);
    value.downcast::<T>().ok()
  }

  // response side ---------------------------------------------------------

  /// Whether a response status has been committed.
  pub fn written(&self) -> bool {
    self.inner.response.lock().written()
  }

  pub fn response_status(&self) -> Option<StatusCode> {
    self.inner.response.lock().status()
  }

  pub fn response_size(&self) -> usize {
    self.inner.response.lock().size()
  }

  /// Sets a response header, replacing previous values. Invalid names or
  /// values are ignored.
  pub fn set_header(&self, name: &str, value: &str) {
    let (Ok(name), Ok(value)) = (
      name.parse::<HeaderName>(),
      HeaderValue::from_str(value),
    ) else {
      return;
    };
    self.inner.response.lock().set_header(name, value);
  }

  /// Appends a response header value, keeping previous ones.
  pub fn add_header(&self, name: &str, value: &str) {
    let (Ok(name), Ok(value)) = (
      name.parse::<HeaderName>(),
      HeaderValue::from_str(value),
    ) else {
      return;
    };
    self.inner.response.lock().add_header(name, value);
  }

  /// Runs a closure with the raw response writer.
  pub fn with_response<R>(&self, f: impl FnOnce(&mut ResponseWriter) -> R) -> R {
    f(&mut self.inner.response.lock())
  }

  /// Sends a plain-text response.
  pub fn string(&self, code: StatusCode, s: &str) -> Result<(), Error> {
    self.blob(code, "text/plain; charset=utf-8", s.as_bytes())
  }

  /// Sends an HTML response.
  pub fn html(&self, code: StatusCode, html: &str) -> Result<(), Error> {
    self.blob(code, "text/html; charset=utf-8", html.as_bytes())
  }

  /// Sends a JSON response.
  pub fn json<T: Serialize>(&self, code: StatusCode, value: &T) -> Result<(), Error> {
    let data = serde_json::to_vec(value).map_err(Error::internal)?;
    self.blob(code, "application/json; charset=utf-8", &data)
  }

  /// Sends an indented JSON response.
  pub fn json_pretty<T: Serialize>(&self, code: StatusCode, value: &T) -> Result<(), Error> {
    let data = serde_json::to_vec_pretty(value).map_err(Error::internal)?;
    self.blob(code, "application/json; charset=utf-8", &data)
  }

  /// Sends raw bytes with the given content type. The Content-Type is
  /// committed exactly once, before the first body write.
  pub fn blob(&self, code: StatusCode, content_type: &str, data: &[u8]) -> Result<(), Error> {
    let mut response = self.inner.response.lock();
    response.content_type_once(content_type);
    response.write_status(code);
    response.write(data);
    Ok(())
  }

  /// Renders a template registered with the server's renderer.
  pub fn render(&self, code: StatusCode, name: &str, data: &serde_json::Value) -> Result<(), Error> {
    let renderer = self.inner.renderer.lock().clone();
    let Some(renderer) = renderer else {
      return Err(Error::RendererNotRegistered);
    };
    let html = renderer.render(self, name, data)?;
    self.html(code, &html)
  }

  /// Sends a response with no body.
  pub fn no_content(&self, code: StatusCode) -> Result<(), Error> {
    self.inner.response.lock().write_status(code);
    Ok(())
  }

  /// Redirects to `location`. The status code must be in `300..=308`.
  pub fn redirect(&self, code: StatusCode, location: &str) -> Result<(), Error> {
    if !(300..=308).contains(&code.as_u16()) {
      return Err(Error::InvalidRedirectCode);
    }
    let value = HeaderValue::from_str(location)
      .map_err(|err| Error::Http(crate::HttpError::new(StatusCode::BAD_REQUEST).wrap(err)))?;
    let mut response = self.inner.response.lock();
    response.set_header(LOCATION, value);
    response.write_status(code);
    Ok(())
  }

  /// Sends the content of a file. Directories fall back to their
  /// `index.html`; misses produce the not-found sentinel.
  pub async fn file(&self, path: &str) -> Result<(), Error> {
    let mut path = PathBuf::from(path);
    let meta = tokio::fs::metadata(&path).await.map_err(|_| Error::not_found())?;
    if meta.is_dir() {
      path = path.join("index.html");
    }
    let data = tokio::fs::read(&path).await.map_err(|_| Error::not_found())?;
    self.blob(StatusCode::OK, content_type_of(&path), &data)
  }

  /// Sends a file as a download attachment.
  pub async fn attachment(&self, path: &str, name: &str) -> Result<(), Error> {
    self.content_disposition(path, name, "attachment").await
  }

  /// Sends a file to be displayed inline.
  pub async fn inline(&self, path: &str, name: &str) -> Result<(), Error> {
    self.content_disposition(path, name, "inline").await
  }

  async fn content_disposition(&self, path: &str, name: &str, kind: &str) -> Result<(), Error> {
    let value = format!("{}; filename={:?}", kind, name);
    if let Ok(value) = HeaderValue::from_str(&value) {
      self.inner.response.lock().set_header(CONTENT_DISPOSITION, value);
    }
    self.file(path).await
  }
}

/// Content type by file extension; the fallback is a byte stream.
fn content_type_of(path: &Path) -> &'static str {
  let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
  match ext {
    "html" | "htm" => "text/html; charset=utf-8",
    "css" => "text/css; charset=utf-8",
    "js" => "text/javascript; charset=utf-8",
    "json" => "application/json; charset=utf-8",
    "txt" => "text/plain; charset=utf-8",
    "xml" => "application/xml",
    "svg" => "image/svg+xml",
    "png" => "image/png",
    "jpg" | "jpeg" => "image/jpeg",
    "gif" => "image/gif",
    "ico" => "image/x-icon",
    "webp" => "image/webp",
    "pdf" => "application/pdf",
    "wasm" => "application/wasm",
    "woff" => "font/woff",
    "woff2" => "font/woff2",
    _ => "application/octet-stream",
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
      .method(method)
      .uri(uri)
      .header("host", "example.com")
      .body(Body::empty())
      .unwrap()
  }

  #[test]
  fn reset_clears_observable_state() {
    let c = Context::for_testing();
    c.reset(request(Method::GET, "/a?x=1"), None, None, None);
    c.set("key", 7_u32);
    c.with_params(|p| {
      p.push(PathParam {
        name: "id".to_owned(),
        value: "9".to_owned(),
      })
    });
    let _ = c.string(StatusCode::OK, "hello");

    c.reset(request(Method::POST, "/b"), None, None, None);
    assert_eq!(c.method(), Method::POST);
    assert_eq!(c.match_type(), RouteMatchType::Unknown);
    assert!(c.route().is_none());
    assert!(c.path_params().is_empty());
    assert!(c.get::<u32>("key").is_none());
    assert!(!c.written());
    assert_eq!(c.query_params(), Vec::new());
  }

  #[test]
  fn query_params_are_cached_and_decoded() {
    let c = Context::for_testing();
    c.reset(
      request(Method::GET, "/search?q=hello%20world&lang=en&q=again"),
      None,
      None,
      None,
    );
    assert_eq!(c.query_param("q"), Some("hello world".to_owned()));
    assert_eq!(c.query_param("lang"), Some("en".to_owned()));
    assert_eq!(c.query_param("missing"), None);
    assert_eq!(c.query_params().len(), 3);
    assert_eq!(c.query_string(), "q=hello%20world&lang=en&q=again");
  }

  #[test]
  fn store_round_trips_typed_values() {
    let c = Context::for_testing();
    c.reset(request(Method::GET, "/"), None, None, None);
    c.set("number", 42_i64);
    c.set("text", "hello".to_owned());
    assert_eq!(*c.get::<i64>("number").unwrap(), 42);
    assert_eq!(*c.get::<String>("text").unwrap(), "hello");
    // a wrong type does not panic
    assert!(c.get::<u8>("number").is_none());
  }

  #[test]
  fn path_param_override_leaves_router_storage() {
    let c = Context::for_testing();
    c.reset(request(Method::GET, "/"), None, None, None);
    c.with_params(|p| {
      p.push(PathParam {
        name: "id".to_owned(),
        value: "router".to_owned(),
      })
    });
    c.set_path_params({
      let mut p = PathParams::default();
      p.push(PathParam {
        name: "id".to_owned(),
        value: "override".to_owned(),
      });
      p
    });
    assert_eq!(c.path_param("id"), Some("override".to_owned()));
    c.with_params(|p| assert_eq!(p.get("id"), Some("router")));
  }

  #[test]
  fn redirect_validates_status_code() {
    let c = Context::for_testing();
    c.reset(request(Method::GET, "/"), None, None, None);
    assert!(matches!(
      c.redirect(StatusCode::OK, "/elsewhere"),
      Err(Error::InvalidRedirectCode)
    ));
    c.redirect(StatusCode::MOVED_PERMANENTLY, "/elsewhere").unwrap();
    let response = c.take_response();
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers().get(LOCATION).unwrap(), "/elsewhere");
  }

  #[test]
  fn content_type_is_committed_once() {
    let c = Context::for_testing();
    c.reset(request(Method::GET, "/"), None, None, None);
    c.set_header("content-type", "application/custom");
    c.string(StatusCode::OK, "body").unwrap();
    let response = c.take_response();
    assert_eq!(
      response.headers().get("content-type").unwrap(),
      "application/custom"
    );
  }

  #[test]
  fn cookies_parse_from_request_header() {
    let c = Context::for_testing();
    let req = Request::builder()
      .method(Method::GET)
      .uri("/")
      .header("cookie", "session=abc123; theme=dark")
      .body(Body::empty())
      .unwrap();
    c.reset(req, None, None, None);
    assert_eq!(c.cookie("session"), Some("abc123".to_owned()));
    assert_eq!(c.cookie("theme"), Some("dark".to_owned()));
    assert_eq!(c.cookie("missing"), None);
  }

  #[test]
  fn real_ip_prefers_forwarded_for() {
    let c = Context::for_testing();
    let req = Request::builder()
      .method(Method::GET)
      .uri("/")
      .header("x-forwarded-for", "203.0.113.5, 70.41.3.18")
      .header("x-real-ip", "198.51.100.1")
      .body(Body::empty())
      .unwrap();
    c.reset(req, None, None, None);
    assert_eq!(c.real_ip(), "203.0.113.5");
  }

  #[tokio::test]
  async fn body_reads_once() {
    let c = Context::for_testing();
    let req = Request::builder()
      .method(Method::POST)
      .uri("/")
      .body(Body::from("payload"))
      .unwrap();
    c.reset(req, None, None, None);
    assert_eq!(&c.read_body().await.unwrap()[..], b"payload");
    assert!(matches!(c.read_body().await, Err(Error::BodyConsumed)));
  }
}
