//! The router: a route registry over the segment trie, hierarchical route
//! collectors, request matching and per-request chain assembly.

use crate::compose::compose;
use crate::context::{Context, PathParam, PathParams};
use crate::error::RegisterError;
use crate::tree::{split, Endpoint, Node, ANY_LABEL, PARAM_LABEL, PATH_SEPARATOR};
use crate::{tap, Error, ErrorHandlerFunc, HandlerFunc, MiddlewareFunc};
use http::{Method, Uri};
use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use std::any::type_name;
use std::borrow::Cow;
use std::fmt::{self, Display, Write as _};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Process-wide route id source; ids are unique across routers.
static NEXT_ROUTE_ID: AtomicU32 = AtomicU32::new(0);

fn next_route_id() -> u32 {
  NEXT_ROUTE_ID.fetch_add(1, Ordering::Relaxed) + 1
}

/// Configuration for a [`Router`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
  /// Re-registering a `(method, pattern)` combination replaces the existing
  /// endpoint instead of failing.
  pub allow_overwriting_route: bool,
  /// Percent-decode extracted path parameter values. Decoding failures leave
  /// the raw value in place and never fail the match.
  pub unescape_path_param_values: bool,
  /// Match against the raw (escaped) request path instead of the decoded
  /// one.
  pub use_escaped_path_for_routing: bool,
  /// Ignore the trailing-slash attribute when matching, so `/x` and `/x/`
  /// are interchangeable.
  pub routing_trailing_slash: bool,
}

/// Describes possible states a request can be in, in perspective of routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouteMatchType {
  /// State before routing is done; the initial state of a fresh context.
  #[default]
  Unknown,
  /// No route matched the request path.
  NotFound,
  /// A route matched the path but not the request method.
  MethodNotAllowed,
  /// An exact path + method match.
  Found,
}

/// The result of [`Router::match_request`]. Carries the handler chain to run
/// and, on a hit, the matched route's description.
pub struct RouteMatch {
  pub kind: RouteMatchType,
  /// Methods the matched leaf can serve; populated for 405 responses.
  pub allow_methods: Vec<String>,
  pub handler: HandlerFunc,
  pub route: Option<RouteInfo>,
}

/// Information about a matched route.
#[derive(Clone)]
pub struct RouteInfo {
  inner: Arc<RouteInfoInner>,
}

struct RouteInfoInner {
  id: u32,
  name: String,
  pattern: String,
  methods: Vec<String>,
  params: Vec<String>,
  collector: usize,
}

impl RouteInfo {
  pub fn id(&self) -> u32 {
    self.inner.id
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn pattern(&self) -> &str {
    &self.inner.pattern
  }

  pub fn methods(&self) -> &[String] {
    &self.inner.methods
  }

  /// Parameter names in pattern order.
  pub fn params(&self) -> &[String] {
    &self.inner.params
  }

  pub(crate) fn collector(&self) -> usize {
    self.inner.collector
  }

  /// Substitutes the provided values for the pattern's placeholders.
  pub fn reverse(&self, params: &[&dyn Display]) -> String {
    reverse_pattern(&self.inner.pattern, params)
  }
}

impl fmt::Display for RouteInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.inner.name.is_empty() {
      f.write_str(&self.inner.pattern)
    } else {
      write!(f, "{} ({})", self.inner.name, self.inner.pattern)
    }
  }
}

fn reverse_pattern(pattern: &str, params: &[&dyn Display]) -> String {
  let (segments, trailing_slash) = split(pattern);
  let mut out = String::new();
  let mut n = 0;
  for segment in &segments {
    match segment.as_bytes()[1] {
      PARAM_LABEL | ANY_LABEL if n < params.len() => {
        out.push(PATH_SEPARATOR as char);
        let _ = write!(out, "{}", params[n]);
        n += 1;
      }
      _ => out.push_str(segment),
    }
  }
  if out.is_empty() || trailing_slash {
    out.push(PATH_SEPARATOR as char);
  }
  out
}

/// A template-rendering seam; register one on the server to enable
/// `Context::render`.
pub trait Renderer: Send + Sync + 'static {
  fn render(&self, c: &Context, name: &str, data: &serde_json::Value) -> Result<String, Error>;
}

struct Route {
  id: u32,
  name: String,
  pattern: String,
  methods: Vec<String>,
  params: Vec<String>,
  handler: HandlerFunc,
  middleware: Vec<MiddlewareFunc>,
  collector: usize,
}

impl Route {
  fn info(&self) -> RouteInfo {
    RouteInfo {
      inner: Arc::new(RouteInfoInner {
        id: self.id,
        name: self.name.clone(),
        pattern: self.pattern.clone(),
        methods: self.methods.clone(),
        params: self.params.clone(),
        collector: self.collector,
      }),
    }
  }
}

struct CollectorData {
  prefix: String,
  parent: Option<usize>,
  middleware: Vec<MiddlewareFunc>,
  error_handler: Option<ErrorHandlerFunc>,
}

struct RouterInner {
  tree: Node,
  routes: Vec<Route>,
  middleware: Vec<MiddlewareFunc>,
  error_handler: Option<ErrorHandlerFunc>,
  collectors: Vec<CollectorData>,
  max_params: usize,
  config: RouterConfig,
}

/// A cheaply clonable handle on one routing table.
///
/// Registration takes `&self`; mutation happens behind a reader-writer lock,
/// matching the "registration completes before serving" discipline — match
/// traffic only takes the read side.
#[derive(Clone)]
pub struct Router {
  inner: Arc<RwLock<RouterInner>>,
}

impl Default for Router {
  fn default() -> Router {
    Router::new(RouterConfig::default())
  }
}

const ROOT_COLLECTOR: usize = 0;

impl Router {
  pub fn new(config: RouterConfig) -> Router {
    Router {
      inner: Arc::new(RwLock::new(RouterInner {
        tree: Node::default(),
        routes: Vec::new(),
        middleware: Vec::new(),
        error_handler: None,
        collectors: vec![CollectorData {
          prefix: String::new(),
          parent: None,
          middleware: Vec::new(),
          error_handler: None,
        }],
        max_params: 0,
        config,
      })),
    }
  }

  /// Appends router-level middleware, run between the server chain and the
  /// collector chain.
  pub fn use_middleware(&self, mw: MiddlewareFunc) {
    self.inner.write().middleware.push(mw);
  }

  /// Sets the router-level error handler. A repeated call replaces the
  /// previous handler.
  pub fn use_error_handler(&self, h: ErrorHandlerFunc) {
    self.inner.write().error_handler = Some(h);
  }

  /// Registers a route for the given methods. `"*"` matches any method.
  pub fn add(
    &self,
    methods: &[&str],
    pattern: &str,
    h: HandlerFunc,
  ) -> Result<RouteHandle, RegisterError> {
    self.register(ROOT_COLLECTOR, methods, pattern, h, String::new())
  }

  /// Registers a route for multiple methods. Panics on a registration error.
  pub fn some(&self, methods: &[&str], pattern: &str, h: HandlerFunc) -> RouteHandle {
    match self.add(methods, pattern, h) {
      Ok(route) => route,
      Err(err) => panic!("{}", err),
    }
  }

  /// Registers a route matching every method. Panics on a registration
  /// error.
  pub fn any(&self, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.some(&["*"], pattern, h)
  }

  /// Registers a route for one method with a type-erased handler. Panics on
  /// a registration error.
  pub fn handle(&self, method: &str, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.some(&[method], pattern, h)
  }

  /// Groups routes without a shared prefix; see [`Collector`].
  pub fn group(&self, f: impl FnOnce(&Collector)) {
    self.route("", f)
  }

  /// Groups routes under a shared prefix; see [`Collector`].
  pub fn route(&self, prefix: &str, f: impl FnOnce(&Collector)) {
    let sub = self.new_collector(prefix, ROOT_COLLECTOR);
    f(&sub)
  }

  /// Serves files below `root` for requests under `prefix`.
  pub fn static_dir(&self, prefix: &str, root: &str) -> RouteHandle {
    Collector {
      router: self.clone(),
      id: ROOT_COLLECTOR,
    }
    .static_dir(prefix, root)
  }

  /// Serves one file for the exact pattern.
  pub fn file(&self, pattern: &str, path: &str) -> RouteHandle {
    Collector {
      router: self.clone(),
      id: ROOT_COLLECTOR,
    }
    .file(pattern, path)
  }

  /// Removes the endpoints registered for `methods` at `pattern`; an empty
  /// method list removes every endpoint there. Returns whether anything was
  /// removed.
  pub fn remove(&self, methods: &[&str], pattern: &str) -> bool {
    let mut inner = self.inner.write();
    let (segments, trailing_slash) = split(pattern);
    let methods: Vec<String> = methods.iter().map(|m| (*m).to_owned()).collect();
    let tolerant = inner.config.routing_trailing_slash;
    let (ids, ok) = inner
      .tree
      .remove(&methods, trailing_slash, tolerant, &segments, 0);
    if ok {
      inner.routes.retain(|r| !ids.contains(&r.id));
    }
    ok
  }

  /// Snapshot of the registered routes.
  pub fn routes(&self) -> Vec<RouteInfo> {
    self.inner.read().routes.iter().map(Route::info).collect()
  }

  /// Generates a URL by substituting `params` into the named route's
  /// pattern. Returns an empty string for an unknown name.
  pub fn reverse(&self, name: &str, params: &[&dyn Display]) -> String {
    let inner = self.inner.read();
    match inner.routes.iter().find(|r| r.name == name) {
      Some(route) => reverse_pattern(&route.pattern, params),
      None => String::new(),
    }
  }

  /// Generates a URL from the handler a route was registered with.
  pub fn uri<F, Fut>(&self, _h: &F, params: &[&dyn Display]) -> String
  where
    F: Fn(Context) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
  {
    self.reverse(type_name::<F>(), params)
  }

  /// Matches a request against the tree, filling `path_params` with the
  /// extracted values on a hit. Never fails: misses produce a terminal
  /// handler that returns the matching sentinel error.
  pub fn match_request(
    &self,
    method: &Method,
    uri: &Uri,
    path_params: &mut PathParams,
  ) -> RouteMatch {
    self.inner.read().match_request(method, uri, path_params)
  }

  /// First error handler on the walk from the route's collector to the
  /// root, then the router's own.
  pub(crate) fn resolve_error_handler(&self, route: Option<&RouteInfo>) -> Option<ErrorHandlerFunc> {
    let inner = self.inner.read();
    if let Some(route) = route {
      let mut cur = Some(route.collector());
      while let Some(id) = cur {
        let collector = &inner.collectors[id];
        if let Some(h) = &collector.error_handler {
          return Some(h.clone());
        }
        cur = collector.parent;
      }
    }
    inner.error_handler.clone()
  }

  pub(crate) fn middleware_snapshot(&self) -> Vec<MiddlewareFunc> {
    self.inner.read().middleware.clone()
  }

  /// Whether two handles point at the same routing table.
  pub(crate) fn ptr_eq(&self, other: &Router) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }

  pub(crate) fn max_params(&self) -> usize {
    self.inner.read().max_params
  }

  fn new_collector(&self, prefix: &str, parent: usize) -> Collector {
    let mut inner = self.inner.write();
    inner.collectors.push(CollectorData {
      prefix: prefix.to_owned(),
      parent: Some(parent),
      middleware: Vec::new(),
      error_handler: None,
    });
    let id = inner.collectors.len() - 1;
    drop(inner);
    Collector {
      router: self.clone(),
      id,
    }
  }

  fn register(
    &self,
    collector: usize,
    methods: &[&str],
    pattern: &str,
    handler: HandlerFunc,
    name: String,
  ) -> Result<RouteHandle, RegisterError> {
    let mut inner = self.inner.write();

    // walk to the root, joining prefixes so the deepest prefix sits closest
    // to the pattern
    let mut full = pattern.to_owned();
    let mut cur = Some(collector);
    while let Some(id) = cur {
      let data = &inner.collectors[id];
      full = format!("{}{}", data.prefix, full);
      cur = data.parent;
    }

    let (segments, trailing_slash) = split(&full);
    for segment in segments.iter().take(segments.len().saturating_sub(1)) {
      if segment.as_bytes()[1] == ANY_LABEL {
        return Err(RegisterError::WildcardNotTerminal { pattern: full });
      }
    }

    let allow_overwrite = inner.config.allow_overwriting_route;
    let mut params = Vec::new();
    let canonical = segments.concat();

    // duplicate checks happen before the tree is touched, so a failed
    // registration leaves no half-inserted leaf behind
    if !allow_overwrite {
      if let Some(tail) = inner.tree.find_pattern(&segments) {
        if let Some(leaf) = &tail.leaf {
          for method in methods {
            if leaf.endpoints.iter().any(|e| e.method == *method) {
              return Err(RegisterError::Duplicate {
                method: (*method).to_owned(),
                pattern: canonical,
              });
            }
          }
        }
      }
    }

    let (tail, _) = inner.tree.insert(&segments, &mut params);
    let id = next_route_id();
    let mut removed = Vec::new();
    let Some(leaf) = tail.leaf.as_mut() else {
      unreachable!("insert always produces a leaf");
    };
    for method in methods {
      match leaf.endpoint_mut(method) {
        Some(endpoint) => {
          removed.push(endpoint.route_id);
          endpoint.trailing_slash = trailing_slash;
          endpoint.route_id = id;
        }
        None => leaf.endpoints.push(Endpoint {
          method: (*method).to_owned(),
          pattern: canonical.clone(),
          trailing_slash,
          route_id: id,
        }),
      }
    }
    leaf.endpoints.sort_by(|a, b| a.method.cmp(&b.method));
    let params_count = leaf.params_count;

    inner.routes.retain(|r| !removed.contains(&r.id));
    inner.routes.push(Route {
      id,
      name,
      pattern: canonical,
      methods: methods.iter().map(|m| (*m).to_owned()).collect(),
      params,
      handler,
      middleware: Vec::new(),
      collector,
    });
    if inner.max_params < params_count {
      inner.max_params = params_count;
    }

    Ok(RouteHandle {
      router: self.clone(),
      id,
    })
  }
}

macro_rules! method_shortcuts {
  ($(($fn:ident, $method:ident),)+) => {
    $(
      #[doc = concat!("Registers a new ", stringify!($method), " route for the pattern. Panics on a registration error.")]
      pub fn $fn<F, Fut>(&self, pattern: &str, f: F) -> RouteHandle
      where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
      {
        let name = type_name::<F>().to_owned();
        let h = crate::handler_fn(f);
        match self.register_named(Method::$method.as_str(), pattern, h, name) {
          Ok(route) => route,
          Err(err) => panic!("{}", err),
        }
      }
    )+
  };
}

impl Router {
  method_shortcuts! {
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

  fn register_named(
    &self,
    method: &str,
    pattern: &str,
    h: HandlerFunc,
    name: String,
  ) -> Result<RouteHandle, RegisterError> {
    self.register(ROOT_COLLECTOR, &[method], pattern, h, name)
  }
}

/// A route-grouping scope: routes registered through a collector share its
/// path prefix, middleware stack and error-handler override. Collectors
/// nest; the outermost runs first on the request path.
///
/// ```rust
/// use slender::{Context, Router};
///
/// let router = Router::default();
/// router.route("/api", |api| {
///     api.get("/users/:id", |c: Context| async move {
///         c.string(http::StatusCode::OK, "user")
///     });
/// });
/// ```
pub struct Collector {
  router: Router,
  id: usize,
}

impl Collector {
  method_shortcuts! {
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

  fn register_named(
    &self,
    method: &str,
    pattern: &str,
    h: HandlerFunc,
    name: String,
  ) -> Result<RouteHandle, RegisterError> {
    self.router.register(self.id, &[method], pattern, h, name)
  }

  /// The collector's own prefix (not including parent prefixes).
  pub fn prefix(&self) -> String {
    self.router.inner.read().collectors[self.id].prefix.clone()
  }

  /// Appends middleware applied to every route registered through this
  /// collector or its children.
  pub fn use_middleware(&self, mw: MiddlewareFunc) {
    self.router.inner.write().collectors[self.id]
      .middleware
      .push(mw);
  }

  /// Sets the error handler for routes registered through this collector.
  pub fn use_error_handler(&self, h: ErrorHandlerFunc) {
    self.router.inner.write().collectors[self.id].error_handler = Some(h);
  }

  /// Creates a child collector without an extra prefix.
  pub fn group(&self, f: impl FnOnce(&Collector)) {
    self.route("", f)
  }

  /// Creates a child collector with an extra prefix.
  pub fn route(&self, prefix: &str, f: impl FnOnce(&Collector)) {
    let sub = self.router.new_collector(prefix, self.id);
    f(&sub)
  }

  /// Registers a route for multiple methods. Panics on a registration
  /// error.
  pub fn some(&self, methods: &[&str], pattern: &str, h: HandlerFunc) -> RouteHandle {
    match self.router.register(self.id, methods, pattern, h, String::new()) {
      Ok(route) => route,
      Err(err) => panic!("{}", err),
    }
  }

  /// Registers a route matching every method. Panics on a registration
  /// error.
  pub fn any(&self, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.some(&["*"], pattern, h)
  }

  /// Registers a route for one method with a type-erased handler. Panics on
  /// a registration error.
  pub fn handle(&self, method: &str, pattern: &str, h: HandlerFunc) -> RouteHandle {
    self.some(&[method], pattern, h)
  }

  /// Serves files below `root` for requests under `prefix`.
  pub fn static_dir(&self, prefix: &str, root: &str) -> RouteHandle {
    let pattern = format!("{}/*", prefix.trim_end_matches('/'));
    self.handle(
      Method::GET.as_str(),
      &pattern,
      crate::middleware::static_directory(root),
    )
  }

  /// Serves one file for the exact pattern.
  pub fn file(&self, pattern: &str, path: &str) -> RouteHandle {
    let path = path.to_owned();
    self.handle(
      Method::GET.as_str(),
      pattern,
      crate::handler_fn(move |c: Context| {
        let path = path.clone();
        async move { c.file(&path).await }
      }),
    )
  }
}

/// A registered route. Handles stay valid after registration and allow
/// naming the route and attaching route-scoped middleware.
#[derive(Clone)]
pub struct RouteHandle {
  router: Router,
  id: u32,
}

impl std::fmt::Debug for RouteHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RouteHandle").field("id", &self.id).finish()
  }
}

impl RouteHandle {
  pub fn id(&self) -> u32 {
    self.id
  }

  /// Names the route for [`Router::reverse`] lookups.
  pub fn set_name(&self, name: &str) -> &RouteHandle {
    let mut inner = self.router.inner.write();
    if let Some(route) = inner.routes.iter_mut().find(|r| r.id == self.id) {
      route.name = name.to_owned();
    }
    self
  }

  /// Appends route-scoped middleware, the innermost layer of the chain.
  pub fn use_middleware(&self, mw: MiddlewareFunc) -> &RouteHandle {
    let mut inner = self.router.inner.write();
    if let Some(route) = inner.routes.iter_mut().find(|r| r.id == self.id) {
      route.middleware.push(mw);
    }
    self
  }

  pub fn info(&self) -> Option<RouteInfo> {
    let inner = self.router.inner.read();
    inner.routes.iter().find(|r| r.id == self.id).map(Route::info)
  }
}

/// The terminal handler for unmatched paths.
pub(crate) fn not_found_handler() -> HandlerFunc {
  Arc::new(|_c| Box::pin(async { Err(Error::not_found()) }))
}

/// The terminal handler for matched paths with no matching method.
pub(crate) fn method_not_allowed_handler() -> HandlerFunc {
  Arc::new(|_c| Box::pin(async { Err(Error::method_not_allowed()) }))
}

impl RouterInner {
  fn match_request(
    &self,
    method: &Method,
    uri: &Uri,
    path_params: &mut PathParams,
  ) -> RouteMatch {
    path_params.clear();
    let raw_path = uri.path();
    let path: Cow<'_, str> = if self.config.use_escaped_path_for_routing {
      Cow::Borrowed(raw_path)
    } else {
      percent_decode_str(raw_path).decode_utf8_lossy()
    };
    let (segments, trailing_slash) = split(&path);

    let Some(tail) = self.tree.find(&segments, 0) else {
      return RouteMatch {
        kind: RouteMatchType::NotFound,
        allow_methods: Vec::new(),
        handler: not_found_handler(),
        route: None,
      };
    };
    let Some(leaf) = tail.leaf.as_ref() else {
      return RouteMatch {
        kind: RouteMatchType::NotFound,
        allow_methods: Vec::new(),
        handler: not_found_handler(),
        route: None,
      };
    };

    let (allow_methods, endpoint) = leaf.select(method.as_str());
    let endpoint = match endpoint {
      Some(e) if e.trailing_slash == trailing_slash || self.config.routing_trailing_slash => e,
      _ => {
        return RouteMatch {
          kind: RouteMatchType::MethodNotAllowed,
          allow_methods,
          handler: method_not_allowed_handler(),
          route: None,
        }
      }
    };

    let Some(route) = self.routes.iter().find(|r| r.id == endpoint.route_id) else {
      // the registry and the tree disagree; treat as unroutable
      debug_assert!(false, "endpoint {} has no registered route", endpoint.route_id);
      return RouteMatch {
        kind: RouteMatchType::NotFound,
        allow_methods: Vec::new(),
        handler: not_found_handler(),
        route: None,
      };
    };

    extract_params(
      &route.pattern,
      &segments,
      trailing_slash,
      self.config.unescape_path_param_values,
      path_params,
    );
    debug_assert_eq!(path_params.len(), leaf.params_count);

    RouteMatch {
      kind: RouteMatchType::Found,
      allow_methods,
      handler: self.compose_chain(route),
      route: Some(route.info()),
    }
  }

  /// Builds the handler for a hit: collector middleware from the root down,
  /// then route middleware, then the handler itself.
  fn compose_chain(&self, route: &Route) -> HandlerFunc {
    let mut stack = Vec::new();
    let mut cur = Some(route.collector);
    while let Some(id) = cur {
      let collector = &self.collectors[id];
      if let Some(mw) = compose(&collector.middleware) {
        stack.push(mw);
      }
      cur = collector.parent;
    }
    // collected child-to-root; the root must be outermost
    stack.reverse();
    let terminal = tap(route.handler.clone(), &route.middleware);
    tap(terminal, &stack)
  }
}

/// Walks the pattern and the request segments in lockstep, extracting
/// parameter values. A `:` value is its segment minus the leading `/`; a `*`
/// value is the concatenation of the remaining segments, keeping a trailing
/// `/` iff the request had one.
fn extract_params(
  pattern: &str,
  segments: &[String],
  trailing_slash: bool,
  unescape: bool,
  params: &mut PathParams,
) {
  let bytes = pattern.as_bytes();
  let len = bytes.len();
  let mut value_index = 0;
  let mut i = 0;
  while i < len {
    if bytes[i] == PARAM_LABEL || bytes[i] == ANY_LABEL {
      let label = bytes[i];
      let mut j = i;
      while j < len && bytes[j] != PATH_SEPARATOR {
        j += 1;
      }
      let mut name = pattern[i + 1..j].to_owned();
      let mut value;
      if label == ANY_LABEL {
        if name.is_empty() {
          name.push(ANY_LABEL as char);
        }
        let tail = segments[value_index..].concat();
        value = tail[1..].to_owned();
        if trailing_slash {
          value.push(PATH_SEPARATOR as char);
        }
        i = len;
      } else {
        value = segments[value_index][1..].to_owned();
        // skip the separator that ends this placeholder
        i = j + 1;
      }
      if unescape {
        if let Ok(decoded) = percent_decode_str(&value).decode_utf8() {
          value = decoded.into_owned();
        }
      }
      params.push(PathParam { name, value });
      value_index += 1;
    } else {
      if bytes[i] == PATH_SEPARATOR && i > 0 {
        value_index += 1;
      }
      i += 1;
    }
  }
}
