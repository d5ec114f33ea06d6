//! The route tree: a trie over path segments.
//!
//! Patterns and request paths are split into `/`-prefixed segments; every
//! node of the tree owns the children for one segment position. A node has
//! at most one parameter child (`:name`) and at most one catch-all child
//! (`*name`) besides its static children, and lookups try static children
//! first, the parameter child second and the catch-all last, so the most
//! specific registration always wins.

pub(crate) const PATH_SEPARATOR: u8 = b'/';
pub(crate) const PARAM_LABEL: u8 = b':';
pub(crate) const ANY_LABEL: u8 = b'*';

/// Splits a pattern or request path into its canonical segments.
///
/// Every returned segment keeps its leading `/` to make pattern
/// concatenation trivial, consecutive separators collapse, and inputs
/// without a leading `/` are rooted first. The second return value reports
/// whether the input ended with a `/`; the root path yields `(vec![], true)`.
pub(crate) fn split(s: &str) -> (Vec<String>, bool) {
  let mut s = s;
  let rooted;
  if s.is_empty() {
    s = "/";
  } else if s.as_bytes()[0] != PATH_SEPARATOR {
    rooted = format!("/{}", s);
    return split_rooted(&rooted);
  }
  split_rooted(s)
}

fn split_rooted(s: &str) -> (Vec<String>, bool) {
  let bytes = s.as_bytes();
  let mut segments = Vec::new();
  let mut start: Option<usize> = None;
  for (i, &b) in bytes.iter().enumerate() {
    if b != PATH_SEPARATOR {
      continue;
    }
    match start {
      None => start = Some(i),
      Some(at) => {
        if at + 1 < i {
          segments.push(s[at..i].to_owned());
        }
        start = Some(i);
      }
    }
  }
  match start {
    Some(at) if at + 1 == bytes.len() => (segments, true),
    Some(at) if at < bytes.len() - 1 => {
      segments.push(s[at..].to_owned());
      (segments, false)
    }
    _ => (segments, false),
  }
}

/// One service endpoint at a leaf: the `(method, route)` binding.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
  pub method: String,
  pub pattern: String,
  pub trailing_slash: bool,
  pub route_id: u32,
}

/// The terminal record of a pattern; exists iff at least one route ends at
/// this node.
#[derive(Debug)]
pub(crate) struct Leaf {
  /// Endpoints kept sorted by method name so allow-lists compose
  /// deterministically.
  pub endpoints: Vec<Endpoint>,
  /// How many path parameters a match at this leaf captures.
  pub params_count: usize,
}

impl Leaf {
  /// Finds the endpoint registered for exactly this method.
  pub fn endpoint_mut(&mut self, method: &str) -> Option<&mut Endpoint> {
    self.endpoints.iter_mut().find(|e| e.method == method)
  }

  /// Returns the allow-list of this leaf together with the endpoint that
  /// serves `method`. An endpoint registered with the `"*"` method serves
  /// any method an exact endpoint does not.
  pub fn select(&self, method: &str) -> (Vec<String>, Option<&Endpoint>) {
    let mut exact = None;
    let mut any = None;
    let mut methods = Vec::with_capacity(self.endpoints.len());
    for e in &self.endpoints {
      if e.method == method {
        exact = Some(e);
      } else if e.method == "*" {
        any = Some(e);
      }
      methods.push(e.method.clone());
    }
    (methods, exact.or(any))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeType {
  Static,
  Param,
  Any,
}

/// A node of the segment trie.
#[derive(Debug)]
pub(crate) struct Node {
  typ: NodeType,
  /// The literal segment, meaningful for static nodes only.
  segment: String,
  pub leaf: Option<Leaf>,
  /// Live leaves at or below this node. When it drops to zero the node has
  /// nothing left to serve and is unlinked by its parent.
  leaf_count: usize,
  static_children: Vec<Node>,
  param_child: Option<Box<Node>>,
  any_child: Option<Box<Node>>,
}

impl Default for Node {
  fn default() -> Node {
    Node::new(NodeType::Static, String::new())
  }
}

impl Node {
  fn new(typ: NodeType, segment: String) -> Node {
    Node {
      typ,
      segment,
      leaf: None,
      leaf_count: 0,
      static_children: Vec::new(),
      param_child: None,
      any_child: None,
    }
  }

  /// Inserts a pattern, creating intermediate nodes as needed.
  ///
  /// Parameter names are appended to `params` in pattern order. The first
  /// return value is the node that will serve the pattern's endpoints, the
  /// second reports whether a new leaf was created (so the caller knows the
  /// parameter capacity bound may have grown).
  pub fn insert(&mut self, segments: &[String], params: &mut Vec<String>) -> (&mut Node, bool) {
    let created = !matches!(self.find_pattern(segments), Some(tail) if tail.leaf.is_some());
    let tail = self.insert_at(segments, params, 0, created);
    (tail, created)
  }

  /// Walks pattern segments by their exact child kind, without mutating.
  /// Unlike [`Node::find`] this does not treat the request-path priority
  /// order; it answers "where would this pattern's leaf live".
  pub fn find_pattern(&self, segments: &[String]) -> Option<&Node> {
    let mut node = self;
    for segment in segments {
      node = match segment.as_bytes()[1] {
        PARAM_LABEL => node.param_child.as_deref()?,
        ANY_LABEL => node.any_child.as_deref()?,
        _ => node
          .static_children
          .iter()
          .find(|n| n.segment == *segment)?,
      };
    }
    Some(node)
  }

  fn insert_at(
    &mut self,
    segments: &[String],
    params: &mut Vec<String>,
    depth: usize,
    created: bool,
  ) -> &mut Node {
    if created {
      self.leaf_count += 1;
    }
    if depth == segments.len() {
      if self.leaf.is_none() {
        self.leaf = Some(Leaf {
          endpoints: Vec::new(),
          params_count: params.len(),
        });
      }
      return self;
    }
    let segment = &segments[depth];
    let child = match segment.as_bytes()[1] {
      PARAM_LABEL => {
        params.push(segment[2..].to_owned());
        self
          .param_child
          .get_or_insert_with(|| Box::new(Node::new(NodeType::Param, String::new())))
          .as_mut()
      }
      ANY_LABEL => {
        let name = if segment.len() > 2 { &segment[2..] } else { "*" };
        params.push(name.to_owned());
        self
          .any_child
          .get_or_insert_with(|| Box::new(Node::new(NodeType::Any, String::new())))
          .as_mut()
      }
      _ => {
        let at = match self.static_children.iter().position(|n| n.segment == *segment) {
          Some(at) => at,
          None => {
            self
              .static_children
              .push(Node::new(NodeType::Static, segment.clone()));
            self.static_children.len() - 1
          }
        };
        &mut self.static_children[at]
      }
    };
    child.insert_at(segments, params, depth + 1, created)
  }

  /// Finds the node serving the given request segments, or `None`.
  ///
  /// Priority at every position: static child, then parameter child, then
  /// the catch-all. Static and parameter candidates recurse with full
  /// backtracking; the catch-all consumes the remaining segments and
  /// terminates the walk.
  pub fn find(&self, segments: &[String], depth: usize) -> Option<&Node> {
    if depth == segments.len() {
      return match self.leaf {
        Some(_) => Some(self),
        None => None,
      };
    }
    let segment = &segments[depth];
    for child in &self.static_children {
      if child.segment == *segment {
        if let Some(found) = child.find(segments, depth + 1) {
          return Some(found);
        }
      }
    }
    if let Some(param) = self.param_child.as_deref() {
      if let Some(found) = param.find(segments, depth + 1) {
        return Some(found);
      }
    }
    self.any_child.as_deref().filter(|n| n.leaf.is_some())
  }

  /// Removes endpoints below this node.
  ///
  /// An empty `methods` list removes every endpoint at the target leaf;
  /// otherwise an endpoint is removed when its method matches and its
  /// trailing-slash attribute agrees with `trailing_slash` (ignored when
  /// `tolerant`). Returns the route ids of removed endpoints. Subtrees whose
  /// leaf count reaches zero are unlinked on the way back up.
  pub fn remove(
    &mut self,
    methods: &[String],
    trailing_slash: bool,
    tolerant: bool,
    segments: &[String],
    depth: usize,
  ) -> (Vec<u32>, bool) {
    let (routes, ok, _) = self.remove_at(methods, trailing_slash, tolerant, segments, depth);
    (routes, ok)
  }

  /// The third return value reports whether the target leaf itself went
  /// away; only then do the ancestors decrement their live-leaf counts.
  fn remove_at(
    &mut self,
    methods: &[String],
    trailing_slash: bool,
    tolerant: bool,
    segments: &[String],
    depth: usize,
  ) -> (Vec<u32>, bool, bool) {
    if depth == segments.len() {
      return self.remove_endpoints(methods, trailing_slash, tolerant);
    }
    let segment = &segments[depth];
    match segment.as_bytes()[1] {
      PARAM_LABEL => {
        let Some(child) = self.param_child.as_deref_mut() else {
          return (Vec::new(), false, false);
        };
        let (routes, ok, leaf_removed) =
          child.remove_at(methods, trailing_slash, tolerant, segments, depth + 1);
        if leaf_removed {
          if child.leaf_count == 0 {
            self.param_child = None;
          }
          self.unlink_one();
        }
        (routes, ok, leaf_removed)
      }
      ANY_LABEL => {
        let Some(child) = self.any_child.as_deref_mut() else {
          return (Vec::new(), false, false);
        };
        let (routes, ok, leaf_removed) =
          child.remove_at(methods, trailing_slash, tolerant, segments, depth + 1);
        if leaf_removed {
          if child.leaf_count == 0 {
            self.any_child = None;
          }
          self.unlink_one();
        }
        (routes, ok, leaf_removed)
      }
      _ => {
        let Some(at) = self.static_children.iter().position(|n| n.segment == *segment) else {
          return (Vec::new(), false, false);
        };
        let (routes, ok, leaf_removed) = self.static_children[at].remove_at(
          methods,
          trailing_slash,
          tolerant,
          segments,
          depth + 1,
        );
        if leaf_removed {
          if self.static_children[at].leaf_count == 0 {
            self.static_children.remove(at);
          }
          self.unlink_one();
        }
        (routes, ok, leaf_removed)
      }
    }
  }

  fn remove_endpoints(
    &mut self,
    methods: &[String],
    trailing_slash: bool,
    tolerant: bool,
  ) -> (Vec<u32>, bool, bool) {
    // Only a leaf provides endpoint service.
    let Some(leaf) = self.leaf.as_mut() else {
      return (Vec::new(), false, false);
    };
    let mut routes = Vec::new();
    if methods.is_empty() {
      routes.extend(leaf.endpoints.iter().map(|e| e.route_id));
      self.leaf = None;
      self.unlink_one();
      return (routes, true, true);
    }
    for method in methods {
      let found = leaf
        .endpoints
        .iter()
        .position(|e| e.method == *method && (tolerant || e.trailing_slash == trailing_slash));
      if let Some(at) = found {
        routes.push(leaf.endpoints.remove(at).route_id);
      }
    }
    let ok = !routes.is_empty();
    let leaf_removed = leaf.endpoints.is_empty();
    if leaf_removed {
      self.leaf = None;
      self.unlink_one();
    }
    (routes, ok, leaf_removed)
  }

  fn unlink_one(&mut self) {
    self.leaf_count = self.leaf_count.saturating_sub(1);
    if self.leaf_count == 0 {
      self.static_children.clear();
      self.param_child = None;
      self.any_child = None;
    }
  }

  #[cfg(test)]
  pub fn leaf_count(&self) -> usize {
    self.leaf_count
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seg(s: &str) -> (Vec<String>, bool) {
    split(s)
  }

  fn insert(tree: &mut Node, pattern: &str, method: &str, route_id: u32) {
    let (segments, trailing_slash) = split(pattern);
    let mut params = Vec::new();
    let (tail, _) = tree.insert(&segments, &mut params);
    let leaf = tail.leaf.as_mut().unwrap();
    leaf.endpoints.push(Endpoint {
      method: method.to_owned(),
      pattern: segments.concat(),
      trailing_slash,
      route_id,
    });
    leaf.endpoints.sort_by(|a, b| a.method.cmp(&b.method));
  }

  fn find_route(tree: &Node, path: &str, method: &str) -> Option<u32> {
    let (segments, _) = split(path);
    let tail = tree.find(&segments, 0)?;
    let (_, ep) = tail.leaf.as_ref().unwrap().select(method);
    ep.map(|e| e.route_id)
  }

  #[test]
  fn split_collapses_and_roots() {
    assert_eq!(seg("/"), (vec![], true));
    assert_eq!(seg(""), (vec![], true));
    assert_eq!(seg("/a/b"), (vec!["/a".to_owned(), "/b".to_owned()], false));
    assert_eq!(seg("/a/b/"), (vec!["/a".to_owned(), "/b".to_owned()], true));
    assert_eq!(seg("a/b"), (vec!["/a".to_owned(), "/b".to_owned()], false));
    assert_eq!(
      seg("//a///b//"),
      (vec!["/a".to_owned(), "/b".to_owned()], true)
    );
  }

  #[test]
  fn split_join_round_trip() {
    for path in ["/a", "/a/b/c", "/users/:id", "/files/*rest"] {
      let (segments, trailing) = split(path);
      assert_eq!(segments.concat(), *path);
      assert!(!trailing);
    }
  }

  #[test]
  fn segments_keep_leading_separator() {
    let (segments, _) = split("/cmd/:tool/*rest");
    for s in &segments {
      assert_eq!(s.as_bytes()[0], PATH_SEPARATOR);
      assert!(s.len() >= 2);
    }
  }

  #[test]
  fn insert_collects_params_in_order() {
    let mut tree = Node::default();
    let (segments, _) = split("/a/:x/b/:y/*rest");
    let mut params = Vec::new();
    let (tail, created) = tree.insert(&segments, &mut params);
    assert!(created);
    assert_eq!(params, vec!["x", "y", "rest"]);
    assert_eq!(tail.leaf.as_ref().unwrap().params_count, 3);
  }

  #[test]
  fn unnamed_catch_all_defaults_to_star() {
    let mut tree = Node::default();
    let (segments, _) = split("/files/*");
    let mut params = Vec::new();
    tree.insert(&segments, &mut params);
    assert_eq!(params, vec!["*"]);
  }

  #[test]
  fn insert_is_idempotent_per_leaf() {
    let mut tree = Node::default();
    let (segments, _) = split("/users/:id");
    let mut params = Vec::new();
    let (_, created) = tree.insert(&segments, &mut params);
    assert!(created);
    let mut params = Vec::new();
    let (_, created) = tree.insert(&segments, &mut params);
    assert!(!created);
    assert_eq!(tree.leaf_count(), 1);
  }

  #[test]
  fn static_beats_param_beats_any() {
    let mut tree = Node::default();
    insert(&mut tree, "/a/b", "GET", 1);
    insert(&mut tree, "/a/:x", "GET", 2);
    insert(&mut tree, "/a/*y", "GET", 3);

    assert_eq!(find_route(&tree, "/a/b", "GET"), Some(1));
    assert_eq!(find_route(&tree, "/a/foo", "GET"), Some(2));
    assert_eq!(find_route(&tree, "/a/foo/bar", "GET"), Some(3));
  }

  #[test]
  fn static_backtracks_into_param() {
    // /a/b exists but has no deeper child; /a/:x/c does.
    let mut tree = Node::default();
    insert(&mut tree, "/a/b", "GET", 1);
    insert(&mut tree, "/a/:x/c", "GET", 2);

    assert_eq!(find_route(&tree, "/a/b/c", "GET"), Some(2));
  }

  #[test]
  fn root_matches_only_root() {
    let mut tree = Node::default();
    insert(&mut tree, "/", "GET", 1);
    assert_eq!(find_route(&tree, "/", "GET"), Some(1));
    assert_eq!(find_route(&tree, "/x", "GET"), None);
  }

  #[test]
  fn any_child_requires_at_least_one_segment() {
    let mut tree = Node::default();
    insert(&mut tree, "/files/*rest", "GET", 1);
    assert_eq!(find_route(&tree, "/files/a", "GET"), Some(1));
    assert_eq!(find_route(&tree, "/files/a/b/c.txt", "GET"), Some(1));
    assert_eq!(find_route(&tree, "/files", "GET"), None);
  }

  #[test]
  fn select_prefers_exact_method_over_star() {
    let mut tree = Node::default();
    insert(&mut tree, "/api", "*", 1);
    insert(&mut tree, "/api", "GET", 2);

    assert_eq!(find_route(&tree, "/api", "GET"), Some(2));
    assert_eq!(find_route(&tree, "/api", "DELETE"), Some(1));
  }

  #[test]
  fn allow_list_is_sorted_stably() {
    let mut tree = Node::default();
    insert(&mut tree, "/m", "POST", 1);
    insert(&mut tree, "/m", "GET", 2);
    insert(&mut tree, "/m", "DELETE", 3);

    let (segments, _) = split("/m");
    let tail = tree.find(&segments, 0).unwrap();
    let (methods, _) = tail.leaf.as_ref().unwrap().select("PUT");
    assert_eq!(methods, vec!["DELETE", "GET", "POST"]);
  }

  #[test]
  fn remove_by_method_keeps_other_endpoints() {
    let mut tree = Node::default();
    insert(&mut tree, "/m", "GET", 1);
    insert(&mut tree, "/m", "POST", 2);

    let (segments, trailing) = split("/m");
    let (routes, ok) = tree.remove(&["GET".to_owned()], trailing, false, &segments, 0);
    assert!(ok);
    assert_eq!(routes, vec![1]);
    assert_eq!(find_route(&tree, "/m", "GET"), None);
    assert_eq!(find_route(&tree, "/m", "POST"), Some(2));
  }

  #[test]
  fn remove_all_methods_prunes_chain() {
    let mut tree = Node::default();
    insert(&mut tree, "/a/b/c", "GET", 1);

    let (segments, trailing) = split("/a/b/c");
    let (routes, ok) = tree.remove(&[], trailing, false, &segments, 0);
    assert!(ok);
    assert_eq!(routes, vec![1]);
    assert_eq!(tree.leaf_count(), 0);
    assert_eq!(find_route(&tree, "/a/b/c", "GET"), None);
  }

  #[test]
  fn remove_keeps_sibling_bearing_ancestors() {
    let mut tree = Node::default();
    insert(&mut tree, "/a/b", "GET", 1);
    insert(&mut tree, "/a/c", "GET", 2);

    let (segments, trailing) = split("/a/b");
    let (_, ok) = tree.remove(&["GET".to_owned()], trailing, false, &segments, 0);
    assert!(ok);
    assert_eq!(find_route(&tree, "/a/b", "GET"), None);
    assert_eq!(find_route(&tree, "/a/c", "GET"), Some(2));
    assert_eq!(tree.leaf_count(), 1);
  }

  #[test]
  fn remove_respects_trailing_slash_unless_tolerant() {
    let mut tree = Node::default();
    insert(&mut tree, "/x/", "GET", 1);

    // strict: the slash-less form does not name the registered endpoint
    let (segments, trailing) = split("/x");
    let (_, ok) = tree.remove(&["GET".to_owned()], trailing, false, &segments, 0);
    assert!(!ok);

    // tolerant: the trailing-slash attribute is ignored
    let (_, ok) = tree.remove(&["GET".to_owned()], trailing, true, &segments, 0);
    assert!(ok);
  }

  #[test]
  fn remove_param_route_prunes_param_child() {
    let mut tree = Node::default();
    insert(&mut tree, "/u/:id", "GET", 1);

    let (segments, trailing) = split("/u/:id");
    let (routes, ok) = tree.remove(&["GET".to_owned()], trailing, false, &segments, 0);
    assert!(ok);
    assert_eq!(routes, vec![1]);
    assert_eq!(find_route(&tree, "/u/42", "GET"), None);
  }
}
