//! The buffered response writer bound to one request.
//!
//! Handlers write status, headers and body through the writer; the HTTP
//! entry point converts the buffer into the wire response once the chain
//! returns. Recording happens here so middleware on the response path can
//! observe status, byte count and whether anything was written at all.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use hyper::Body;

/// Records the response as it is produced: status code (`None` until the
/// first write), bytes written and a written flag. Body bytes of HEAD
/// requests are dropped and excluded from the counter.
#[derive(Debug)]
pub struct ResponseWriter {
  method: Method,
  headers: HeaderMap,
  body: BytesMut,
  status: Option<StatusCode>,
  size: usize,
}

impl ResponseWriter {
  pub fn new(method: Method) -> ResponseWriter {
    ResponseWriter {
      method,
      headers: HeaderMap::new(),
      body: BytesMut::new(),
      status: None,
      size: 0,
    }
  }

  /// Rebinds the writer to a new request, keeping buffer allocations.
  pub(crate) fn reset(&mut self, method: Method) {
    self.method = method;
    self.headers.clear();
    self.body.clear();
    self.status = None;
    self.size = 0;
  }

  /// Commits the status code. A second call is a no-op, as is a call after
  /// the first body write.
  pub fn write_status(&mut self, status: StatusCode) {
    if self.status.is_none() {
      self.status = Some(status);
    }
  }

  /// Appends body bytes, committing status 200 first if none was set.
  pub fn write(&mut self, data: &[u8]) {
    if self.status.is_none() {
      self.status = Some(StatusCode::OK);
    }
    if self.method == Method::HEAD {
      return;
    }
    self.body.extend_from_slice(data);
    self.size += data.len();
  }

  /// Whether a status has been committed.
  pub fn written(&self) -> bool {
    self.status.is_some()
  }

  /// The committed status code, if any.
  pub fn status(&self) -> Option<StatusCode> {
    self.status
  }

  /// Body bytes written so far, excluding dropped HEAD bodies.
  pub fn size(&self) -> usize {
    self.size
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn headers_mut(&mut self) -> &mut HeaderMap {
    &mut self.headers
  }

  /// Sets a header, replacing previous values.
  pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
    self.headers.insert(name, value);
  }

  /// Appends a header value, keeping previous ones.
  pub fn add_header(&mut self, name: HeaderName, value: HeaderValue) {
    self.headers.append(name, value);
  }

  /// Sets the Content-Type unless one is already present. Render helpers
  /// call this before their first write so the type is committed exactly
  /// once.
  pub fn content_type_once(&mut self, value: &str) {
    if !self.headers.contains_key(CONTENT_TYPE) {
      if let Ok(value) = HeaderValue::from_str(value) {
        self.headers.insert(CONTENT_TYPE, value);
      }
    }
  }

  /// Drains the buffer into the wire response. An untouched writer yields
  /// an empty 200.
  pub(crate) fn take(&mut self) -> http::Response<Body> {
    let status = self.status.take().unwrap_or(StatusCode::OK);
    let body: Bytes = self.body.split().freeze();
    let mut response = http::Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = std::mem::take(&mut self.headers);
    self.size = 0;
    response
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_and_size_accounting() {
    let mut rw = ResponseWriter::new(Method::GET);
    assert!(!rw.written());
    assert_eq!(rw.status(), None);
    assert_eq!(rw.size(), 0);

    // a body write without an explicit status commits 200
    rw.write(b"hello");
    assert!(rw.written());
    assert_eq!(rw.status(), Some(StatusCode::OK));
    assert_eq!(rw.size(), 5);

    // a later write_status is a no-op
    rw.write_status(StatusCode::ACCEPTED);
    assert_eq!(rw.status(), Some(StatusCode::OK));
  }

  #[test]
  fn second_write_status_is_ignored() {
    let mut rw = ResponseWriter::new(Method::GET);
    rw.write_status(StatusCode::CREATED);
    rw.write_status(StatusCode::ACCEPTED);
    assert_eq!(rw.status(), Some(StatusCode::CREATED));
  }

  #[test]
  fn head_body_is_dropped_from_counter() {
    let mut rw = ResponseWriter::new(Method::HEAD);
    rw.write_status(StatusCode::NO_CONTENT);
    rw.write(&[b'a'; 10]);
    assert_eq!(rw.size(), 0);

    let response = rw.take();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
  }

  #[test]
  fn content_type_commits_once() {
    let mut rw = ResponseWriter::new(Method::GET);
    rw.content_type_once("application/json");
    rw.content_type_once("text/plain");
    assert_eq!(
      rw.headers().get(CONTENT_TYPE).unwrap(),
      "application/json"
    );
  }

  #[test]
  fn untouched_writer_takes_to_empty_ok() {
    let mut rw = ResponseWriter::new(Method::GET);
    let response = rw.take();
    assert_eq!(response.status(), StatusCode::OK);
  }

  #[test]
  fn reset_clears_state_between_requests() {
    let mut rw = ResponseWriter::new(Method::GET);
    rw.write(b"first");
    let _ = rw.take();

    rw.reset(Method::GET);
    assert!(!rw.written());
    assert_eq!(rw.size(), 0);
    rw.write(b"second");
    let response = rw.take();
    assert_eq!(response.status(), StatusCode::OK);
  }
}
