use http::StatusCode;
use std::error::Error as StdError;
use std::fmt;

/// An error that occurred while handling a request, carrying the HTTP status
/// code it should be rendered with.
///
/// The framework ships a sentinel constructor per common status; handlers
/// return these to signal a response outcome without writing directly:
///
/// ```rust
/// use slender::{Context, Error};
///
/// async fn show(c: Context) -> Result<(), Error> {
///     Err(Error::not_found())
/// }
/// ```
#[derive(Debug)]
pub struct HttpError {
  status: StatusCode,
  message: String,
  source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HttpError {
  /// Creates an `HttpError` with the default message for the status code.
  pub fn new(status: StatusCode) -> HttpError {
    let message = status
      .canonical_reason()
      .map(str::to_owned)
      .unwrap_or_else(|| status.as_str().to_owned());
    HttpError {
      status,
      message,
      source: None,
    }
  }

  /// Creates an `HttpError` with a custom message.
  pub fn with_message(status: StatusCode, message: impl Into<String>) -> HttpError {
    HttpError {
      status,
      message: message.into(),
      source: None,
    }
  }

  /// Attaches the underlying error this one was mapped from.
  pub fn wrap(mut self, source: impl StdError + Send + Sync + 'static) -> HttpError {
    self.source = Some(Box::new(source));
    self
  }

  pub fn status(&self) -> StatusCode {
    self.status
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl fmt::Display for HttpError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.source {
      None => write!(f, "code={}, message={}", self.status.as_u16(), self.message),
      Some(source) => write!(
        f,
        "code={}, message={}, internal={}",
        self.status.as_u16(),
        self.message,
        source
      ),
    }
  }
}

impl StdError for HttpError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
  }
}

/// The error type returned by handlers, middleware and framework internals.
#[derive(Debug)]
pub enum Error {
  /// A typed HTTP error; rendered as its status text by the default error
  /// handler.
  Http(HttpError),
  /// A middleware invoked its `next` more than once.
  NextCalledMultipleTimes,
  /// `Context::render` was called without a registered renderer.
  RendererNotRegistered,
  /// A redirect was attempted with a status code outside `300..=308`.
  InvalidRedirectCode,
  /// The request body was already consumed by an earlier read.
  BodyConsumed,
  /// Any other failure surfaced from a handler or middleware.
  Internal(Box<dyn StdError + Send + Sync>),
}

macro_rules! sentinels {
  ($(($fn:ident, $is:ident, $status:ident),)+) => {
    $(
      #[doc = concat!("The `", stringify!($status), "` sentinel error.")]
      pub fn $fn() -> Error {
        Error::Http(HttpError::new(StatusCode::$status))
      }

      #[doc = concat!("Whether this is the `", stringify!($status), "` sentinel.")]
      pub fn $is(&self) -> bool {
        matches!(self, Error::Http(he) if he.status == StatusCode::$status)
      }
    )+
  };
}

impl Error {
  sentinels! {
    (not_found, is_not_found, NOT_FOUND),
    (method_not_allowed, is_method_not_allowed, METHOD_NOT_ALLOWED),
    (bad_request, is_bad_request, BAD_REQUEST),
    (unauthorized, is_unauthorized, UNAUTHORIZED),
    (forbidden, is_forbidden, FORBIDDEN),
    (request_timeout, is_request_timeout, REQUEST_TIMEOUT),
    (payload_too_large, is_payload_too_large, PAYLOAD_TOO_LARGE),
    (unsupported_media_type, is_unsupported_media_type, UNSUPPORTED_MEDIA_TYPE),
    (too_many_requests, is_too_many_requests, TOO_MANY_REQUESTS),
    (internal_server_error, is_internal_server_error, INTERNAL_SERVER_ERROR),
    (bad_gateway, is_bad_gateway, BAD_GATEWAY),
    (service_unavailable, is_service_unavailable, SERVICE_UNAVAILABLE),
  }

  /// Wraps an arbitrary error into `Error::Internal`.
  pub fn internal(err: impl StdError + Send + Sync + 'static) -> Error {
    Error::Internal(Box::new(err))
  }

  /// The HTTP status carried by this error, if it is a typed HTTP error.
  pub fn status(&self) -> Option<StatusCode> {
    match self {
      Error::Http(he) => Some(he.status),
      _ => None,
    }
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Http(he) => fmt::Display::fmt(he, f),
      Error::NextCalledMultipleTimes => write!(f, "next() called multiple times"),
      Error::RendererNotRegistered => write!(f, "renderer not registered"),
      Error::InvalidRedirectCode => write!(f, "invalid redirect status code"),
      Error::BodyConsumed => write!(f, "request body already consumed"),
      Error::Internal(err) => fmt::Display::fmt(err, f),
    }
  }
}

impl StdError for Error {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    match self {
      Error::Http(he) => he.source(),
      Error::Internal(err) => Some(err.as_ref()),
      _ => None,
    }
  }
}

impl From<HttpError> for Error {
  fn from(he: HttpError) -> Error {
    Error::Http(he)
  }
}

/// Represents errors that can occur when registering a new route.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterError {
  /// A route for the same method and pattern already exists and overwriting
  /// is not allowed.
  Duplicate {
    /// The method whose endpoint already exists.
    method: String,
    /// The canonical pattern of the existing endpoint.
    pattern: String,
  },
  /// A catch-all segment appeared before the end of the pattern.
  WildcardNotTerminal {
    /// The offending pattern.
    pattern: String,
  },
}

impl fmt::Display for RegisterError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RegisterError::Duplicate { method, pattern } => {
        write!(
          f,
          "adding duplicate route ({} {}) is not allowed",
          method, pattern
        )
      }
      RegisterError::WildcardNotTerminal { pattern } => {
        write!(
          f,
          "catch-all segments are only allowed at the end of a pattern: {}",
          pattern
        )
      }
    }
  }
}

impl StdError for RegisterError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sentinel_identity() {
    assert!(Error::not_found().is_not_found());
    assert!(!Error::not_found().is_method_not_allowed());
    assert!(Error::method_not_allowed().is_method_not_allowed());
    assert_eq!(
      Error::too_many_requests().status(),
      Some(StatusCode::TOO_MANY_REQUESTS)
    );
    assert_eq!(Error::NextCalledMultipleTimes.status(), None);
  }

  #[test]
  fn default_message_is_status_text() {
    let he = HttpError::new(StatusCode::NOT_FOUND);
    assert_eq!(he.message(), "Not Found");
    assert_eq!(he.to_string(), "code=404, message=Not Found");
  }

  #[test]
  fn wrapped_source_is_exposed() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
    let he = HttpError::new(StatusCode::INTERNAL_SERVER_ERROR).wrap(io);
    assert!(he.source().is_some());
    assert!(he.to_string().contains("disk on fire"));
  }
}
