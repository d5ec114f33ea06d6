//! The server: virtual-host dispatch, the context pool and the HTTP entry
//! point that funnels chain errors into the error resolver.

use crate::binder::{Binder, DefaultBinder};
use crate::compose::{compose, Next};
use crate::context::Context;
use crate::error::Error;
use crate::router::{Renderer, RouteHandle, Router, RouterConfig};
use crate::{ErrorHandlerFunc, HandlerFunc, MiddlewareFunc};
use http::{Request, Response, StatusCode};
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Body;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

struct ServerCore {
  /// The default router; requests whose host matches no virtual host land
  /// here.
  router: Router,
  /// Virtual-host table: `exact.host` or `*.suffix` to router. Checked
  /// before the default router.
  routers: RwLock<HashMap<String, Router>>,
  middleware: RwLock<Vec<MiddlewareFunc>>,
  error_handler: RwLock<Option<ErrorHandlerFunc>>,
  binder: RwLock<Arc<dyn Binder>>,
  renderer: RwLock<Option<Arc<dyn Renderer>>>,
  pool: Mutex<Vec<Context>>,
  router_config: RouterConfig,
}

/// The HTTP server. Cheap to clone; all registration takes `&self`.
///
/// ```rust
/// use slender::{Context, Server};
///
/// let server = Server::new();
/// server.get("/", |c: Context| async move {
///     c.string(http::StatusCode::OK, "hello")
/// });
/// ```
#[derive(Clone)]
pub struct Server {
  core: Arc<ServerCore>,
}

impl Default for Server {
  fn default() -> Server {
    Server::new()
  }
}

impl Server {
  pub fn new() -> Server {
    Server::with_config(RouterConfig::default())
  }

  /// Creates a server whose routers (default and per-host) use `config`.
  pub fn with_config(config: RouterConfig) -> Server {
    Server {
      core: Arc::new(ServerCore {
        router: Router::new(config.clone()),
        routers: RwLock::new(HashMap::new()),
        middleware: RwLock::new(Vec::new()),
        error_handler: RwLock::new(None),
        binder: RwLock::new(Arc::new(DefaultBinder)),
        renderer: RwLock::new(None),
        pool: Mutex::new(Vec::new()),
        router_config: config,
      }),
    }
  }

  /// The classic preset: request logging, panic recovery and static file
  /// service from `./public`.
  pub fn classic() -> Server {
    let server = Server::new();
    server.use_middleware(crate::middleware::logger());
    server.use_middleware(crate::middleware::recovery());
    server.use_middleware(crate::middleware::static_server("public"));
    server
  }

  /// The default router.
  pub fn router(&self) -> Router {
    self.core.router.clone()
  }

  /// Returns the router serving `name`, creating it on first use. `name` is
  /// an exact host or a single-level `*.suffix` pattern.
  pub fn host(&self, name: &str) -> Router {
    let mut routers = self.core.routers.write();
    routers
      .entry(name.to_ascii_lowercase())
      .or_insert_with(|| Router::new(self.core.router_config.clone()))
      .clone()
  }

  /// Appends server-level middleware, the outermost layer of every chain.
  pub fn use_middleware(&self, mw: MiddlewareFunc) {
    self.core.middleware.write().push(mw);
  }

  /// Replaces the server-wide default error handler.
  pub fn use_error_handler(&self, h: ErrorHandlerFunc) {
    *self.core.error_handler.write() = Some(h);
  }

  /// Replaces the request binder used by `Context::bind`.
  pub fn set_binder(&self, binder: Arc<dyn Binder>) {
    *self.core.binder.write() = binder;
  }

  /// Registers a template renderer enabling `Context::render`.
  pub fn set_renderer(&self, renderer: Arc<dyn Renderer>) {
    *self.core.renderer.write() = Some(renderer);
  }

  /// Registers a route on the default router for multiple methods. Panics
  /// on a registration error.
  pub fn some(&self, methods: &[&str], pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.core.router.some(methods, pattern, h)
  }

  /// Registers a route on the default router matching every method. Panics
  /// on a registration error.
  pub fn any(&self, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.core.router.any(pattern, h)
  }

  /// Registers a route on the default router for one method. Panics on a
  /// registration error.
  pub fn handle(&self, method: &str, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.core.router.handle(method, pattern, h)
  }

  /// Groups routes on the default router.
  pub fn group(&self, f: impl FnOnce(&crate::Collector)) {
    self.core.router.group(f)
  }

  /// Groups routes on the default router under a prefix.
  pub fn route(&self, prefix: &str, f: impl FnOnce(&crate::Collector)) {
    self.core.router.route(prefix, f)
  }

  /// Serves files below `root` for requests under `prefix`.
  pub fn static_dir(&self, prefix: &str, root: &str) -> RouteHandle {
    self.core.router.static_dir(prefix, root)
  }

  /// Serves one file for the exact pattern.
  pub fn file(&self, pattern: &str, path: &str) -> RouteHandle {
    self.core.router.file(pattern, path)
  }

  /// Removes endpoints from the default router.
  pub fn remove(&self, methods: &[&str], pattern: &str) -> bool {
    self.core.router.remove(methods, pattern)
  }

  /// Routes registered on the default router.
  pub fn routes(&self) -> Vec<crate::RouteInfo> {
    self.core.router.routes()
  }

  /// Generates a URL from a route name on the default router.
  pub fn reverse(&self, name: &str, params: &[&dyn Display]) -> String {
    self.core.router.reverse(name, params)
  }

  /// Generates a URL from the handler a route was registered with.
  pub fn uri<F, Fut>(&self, h: &F, params: &[&dyn Display]) -> String
  where
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
  {
    self.core.router.uri(h, params)
  }

  /// Serves one request through the full chain and returns the response.
  /// This is the hyper service body; tests drive it directly.
  pub async fn dispatch(&self, req: Request<Body>) -> Response<Body> {
    self.dispatch_from(req, None).await
  }

  async fn dispatch_from(
    &self,
    req: Request<Body>,
    remote_addr: Option<SocketAddr>,
  ) -> Response<Body> {
    let c = self.acquire_context();
    c.reset(
      req,
      remote_addr,
      Some(self.core.binder.read().clone()),
      self.core.renderer.read().clone(),
    );

    let middleware = self.core.middleware.read().clone();
    let core = self.core.clone();
    let terminal = Next::new(move |c: Context| {
      let core = core.clone();
      Box::pin(async move { route_and_run(core, c).await })
    });
    let result = match compose(&middleware) {
      None => terminal.run(c.clone()).await,
      Some(mw) => (*mw)(c.clone(), terminal).await,
    };

    if let Err(err) = result {
      self.resolve_error(&c, &err);
    }

    let response = c.take_response();
    self.release_context(c);
    response
  }

  /// Binds and serves until the task is cancelled or hyper fails.
  pub async fn serve(&self, addr: SocketAddr) -> Result<(), hyper::Error> {
    let server = self.clone();
    let make = make_service_fn(move |conn: &AddrStream| {
      let server = server.clone();
      let remote_addr = conn.remote_addr();
      async move {
        Ok::<_, Infallible>(service_fn(move |req| {
          let server = server.clone();
          async move { Ok::<_, Infallible>(server.dispatch_from(req, Some(remote_addr)).await) }
        }))
      }
    });
    tracing::info!(%addr, "listening");
    hyper::Server::bind(&addr).serve(make).await
  }

  /// Walks the error-handling chain: the matched route's collectors child
  /// to root, the matched router, then the server-wide handler. A response
  /// that is already written downgrades the error to a log line.
  fn resolve_error(&self, c: &Context, err: &Error) {
    if c.written() {
      tracing::error!(error = %err, "error after response was written");
      return;
    }
    if let (Some(router), Some(route)) = (c.matched_router(), c.route()) {
      if let Some(h) = router.resolve_error_handler(Some(&route)) {
        (*h)(c, err);
        return;
      }
    }
    let handler = self.core.error_handler.read().clone();
    match handler {
      Some(h) => (*h)(c, err),
      None => default_error_handler(c, err),
    }
  }

  fn acquire_context(&self) -> Context {
    if let Some(c) = self.core.pool.lock().pop() {
      return c;
    }
    Context::new(self.max_path_params())
  }

  fn release_context(&self, c: Context) {
    self.core.pool.lock().push(c);
  }

  /// The largest parameter count across every registered route; newly
  /// pooled contexts size their scratch to this bound.
  fn max_path_params(&self) -> usize {
    let mut max = self.core.router.max_params();
    for router in self.core.routers.read().values() {
      max = max.max(router.max_params());
    }
    max
  }
}

macro_rules! server_shortcuts {
  ($(($fn:ident, $method:ident),)+) => {
    impl Server {
      $(
        #[doc = concat!("Registers a new ", stringify!($method), " route on the default router. Panics on a registration error.")]
        pub fn $fn<F, Fut>(&self, pattern: &str, f: F) -> RouteHandle
        where
          F: Fn(Context) -> Fut + Send + Sync + 'static,
          Fut: Future<Output = Result<(), Error>> + Send + 'static,
        {
          self.core.router.$fn(pattern, f)
        }
      )+
    }
  };
}

server_shortcuts! {
  (get, GET),
  (post, POST),
  (put, PUT),
  (delete, DELETE),
  (patch, PATCH),
  (head, HEAD),
  (options, OPTIONS),
  (trace, TRACE),
  (connect, CONNECT),
}

async fn route_and_run(core: Arc<ServerCore>, c: Context) -> Result<(), Error> {
  let host = forwarded_host(&c);
  let router = core.find_router(&host);
  let method = c.method();
  let uri = c.uri();
  let matched = c.with_params(|params| router.match_request(&method, &uri, params));
  c.set_match(
    matched.kind,
    matched.allow_methods,
    matched.route,
    router.clone(),
  );
  match compose(&router.middleware_snapshot()) {
    None => (*matched.handler)(c).await,
    Some(mw) => (*mw)(c, Next::from_handler(matched.handler.clone())).await,
  }
}

/// Host resolution order: `X-Forwarded-Host`, the `host=` token of a
/// `Forwarded` header, then the request's own host.
fn forwarded_host(c: &Context) -> String {
  if let Some(host) = c.header("x-forwarded-host") {
    if !host.is_empty() {
      return host;
    }
  }
  if let Some(forwarded) = c.header("forwarded") {
    for pair in forwarded.split(';') {
      if let Some((token, value)) = pair.split_once('=') {
        if token.trim().eq_ignore_ascii_case("host") {
          return value.trim().trim_matches('"').to_owned();
        }
      }
    }
  }
  c.host()
}

impl ServerCore {
  fn find_router(&self, host: &str) -> Router {
    let routers = self.routers.read();
    if routers.is_empty() {
      return self.router.clone();
    }
    let mut host = host.to_ascii_lowercase();
    if let Some((name, port)) = host.rsplit_once(':') {
      if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        host.truncate(name.len());
      }
    }
    if host.contains('.') && host != "." {
      if let Some(router) = routers.get(&host) {
        return router.clone();
      }
      // a wildcard request host never matches another wildcard, and a
      // bare two-component domain has no subdomain to generalize
      if !host.starts_with("*.") {
        let first = host.find('.');
        let last = host.rfind('.');
        if let (Some(first), Some(last)) = (first, last) {
          if first != last {
            let wildcard = format!("*{}", &host[first..]);
            if let Some(router) = routers.get(&wildcard) {
              return router.clone();
            }
          }
        }
      }
    }
    self.router.clone()
  }
}

/// The fallback error renderer: 404 and other HTTP-typed errors render
/// their status text, 405 additionally sets the `Allow` header from the
/// context, and anything else is a 500 carrying the error message. Text
/// bodies end with a newline.
pub(crate) fn default_error_handler(c: &Context, err: &Error) {
  if c.written() {
    tracing::error!(error = %err, "error after response was written");
    return;
  }
  if err.is_method_not_allowed() {
    let allow = c.allow_methods().join(", ");
    if !allow.is_empty() {
      c.set_header("allow", &allow);
    }
    let _ = c.string(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
    return;
  }
  match err {
    Error::Http(he) => {
      let status = he.status();
      let text = status.canonical_reason().unwrap_or("error");
      let _ = c.string(status, &format!("{}\n", text));
    }
    other => {
      let _ = c.string(StatusCode::INTERNAL_SERVER_ERROR, &format!("{}\n", other));
    }
  }
}
