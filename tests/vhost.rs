//! Virtual-host dispatch: exact name beats wildcard beats default, and
//! forwarded-host headers take precedence over the request host.

use http::{Method, Request, StatusCode};
use hyper::Body;
use slender::{Context, Server};

fn make_server() -> Server {
  let server = Server::new();
  server.get("/", |c: Context| async move { c.string(StatusCode::OK, "default") });
  server
    .host("app.example.com")
    .get("/", |c: Context| async move { c.string(StatusCode::OK, "exact") });
  server
    .host("*.example.com")
    .get("/", |c: Context| async move { c.string(StatusCode::OK, "wildcard") });
  server
}

async fn body(server: &Server, req: Request<Body>) -> String {
  let response = server.dispatch(req).await;
  let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
  String::from_utf8_lossy(&bytes).into_owned()
}

fn request_for_host(host: &str) -> Request<Body> {
  Request::builder()
    .method(Method::GET)
    .uri("/")
    .header("host", host)
    .body(Body::empty())
    .unwrap()
}

#[tokio::test]
async fn exact_beats_wildcard_beats_default() {
  let server = make_server();
  assert_eq!(body(&server, request_for_host("app.example.com")).await, "exact");
  assert_eq!(
    body(&server, request_for_host("foo.example.com")).await,
    "wildcard"
  );
  assert_eq!(body(&server, request_for_host("localhost")).await, "default");
}

#[tokio::test]
async fn non_domain_hosts_take_the_default() {
  let server = make_server();
  for host in ["localhost", "intranet", "example.com"] {
    assert_eq!(body(&server, request_for_host(host)).await, "default", "{}", host);
  }
}

#[tokio::test]
async fn ports_are_ignored_for_host_lookup() {
  let server = make_server();
  assert_eq!(
    body(&server, request_for_host("app.example.com:8080")).await,
    "exact"
  );
}

#[tokio::test]
async fn x_forwarded_host_wins() {
  let server = make_server();
  let req = Request::builder()
    .method(Method::GET)
    .uri("/")
    .header("host", "ignored.invalid")
    .header("x-forwarded-host", "app.example.com")
    .body(Body::empty())
    .unwrap();
  assert_eq!(body(&server, req).await, "exact");
}

#[tokio::test]
async fn forwarded_header_host_token_is_second() {
  let server = make_server();
  let req = Request::builder()
    .method(Method::GET)
    .uri("/")
    .header("host", "ignored.invalid")
    .header("forwarded", "for=1.1.1.1; host=foo.example.com")
    .body(Body::empty())
    .unwrap();
  assert_eq!(body(&server, req).await, "wildcard");
}

#[tokio::test]
async fn host_routers_are_isolated() {
  let server = make_server();
  server
    .host("app.example.com")
    .get("/only-here", |c: Context| async move {
      c.string(StatusCode::OK, "special")
    });

  let req = Request::builder()
    .method(Method::GET)
    .uri("/only-here")
    .header("host", "app.example.com")
    .body(Body::empty())
    .unwrap();
  let response = server.dispatch(req).await;
  assert_eq!(response.status(), StatusCode::OK);

  let req = Request::builder()
    .method(Method::GET)
    .uri("/only-here")
    .header("host", "localhost")
    .body(Body::empty())
    .unwrap();
  let response = server.dispatch(req).await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
