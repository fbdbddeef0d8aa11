//! Error types.
//!
//! Three families, three audiences:
//!
//! | Type | Raised by | Ends up as |
//! |---|---|---|
//! | [`HttpError`] | handlers and middleware | a JSON error response |
//! | [`ConfigError`] | route registration, config loading | a startup failure |
//! | [`ServerError`] | the transport (bind, address parsing) | `Server::serve` result |
//!
//! [`Error`] is what handlers and middleware actually return. Anything that
//! implements [`std::error::Error`] converts into it with `?`. An `HttpError`
//! keeps its kind through that conversion; everything else is an
//! *unrecognized* failure and is reported as `500 INTERNAL_SERVER_ERROR`.

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::response::Response;

// ── ErrorKind ─────────────────────────────────────────────────────────────────

/// The closed set of failure categories.
///
/// Every kind has exactly one status and one code. Callers choose the message
/// and detail, never the mapping.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Authorization,
    NotFound,
    Timeout,
    Conflict,
    PayloadTooLarge,
    RateLimited,
    Internal,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::Validation         => StatusCode::BAD_REQUEST,
            Self::Authentication     => StatusCode::UNAUTHORIZED,
            Self::Authorization      => StatusCode::FORBIDDEN,
            Self::NotFound           => StatusCode::NOT_FOUND,
            Self::Timeout            => StatusCode::REQUEST_TIMEOUT,
            Self::Conflict           => StatusCode::CONFLICT,
            Self::PayloadTooLarge    => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited        => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal           => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway         => StatusCode::BAD_GATEWAY,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::GatewayTimeout     => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Machine-readable code sent in the `code` field of the error body.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation         => "VALIDATION_ERROR",
            Self::Authentication     => "AUTHENTICATION_ERROR",
            Self::Authorization      => "AUTHORIZATION_ERROR",
            Self::NotFound           => "NOT_FOUND",
            Self::Timeout            => "REQUEST_TIMEOUT",
            Self::Conflict           => "CONFLICT",
            Self::PayloadTooLarge    => "PAYLOAD_TOO_LARGE",
            Self::RateLimited        => "RATE_LIMIT_EXCEEDED",
            Self::Internal           => "INTERNAL_SERVER_ERROR",
            Self::BadGateway         => "BAD_GATEWAY",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::GatewayTimeout     => "GATEWAY_TIMEOUT",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::Validation         => "Validation failed",
            Self::Authentication     => "Authentication required",
            Self::Authorization      => "Insufficient permissions",
            Self::NotFound           => "Resource not found",
            Self::Timeout            => "Request timed out",
            Self::Conflict           => "Resource conflict",
            Self::PayloadTooLarge    => "Payload too large",
            Self::RateLimited        => "Too many requests",
            Self::Internal           => "Internal server error",
            Self::BadGateway         => "Bad gateway",
            Self::ServiceUnavailable => "Service unavailable",
            Self::GatewayTimeout     => "Gateway timeout",
        }
    }
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// A typed failure that resolves to an HTTP status, a code and a message.
///
/// ```rust
/// use gantry::{ErrorKind, HttpError};
/// use serde_json::json;
///
/// let err = HttpError::validation("email is required")
///     .with_detail(json!({ "field": "email" }));
///
/// assert_eq!(err.kind(), ErrorKind::Validation);
/// assert_eq!(err.status().as_u16(), 400);
/// ```
#[derive(Clone, Debug, thiserror::Error)]
#[error("{code}: {message}", code = .kind.code())]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
    detail: Option<Value>,
    retry_after: Option<Duration>,
}

impl HttpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), detail: None, retry_after: None }
    }

    /// An error of `kind` with its stock message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind, kind.default_message())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authorization, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PayloadTooLarge, message)
    }

    /// `429` carrying the time left until the client's window resets.
    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self { retry_after: Some(retry_after), ..Self::new(ErrorKind::RateLimited, message) }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadGateway, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }

    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GatewayTimeout, message)
    }

    /// Attach structured detail. Only sent to clients in development mode.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn kind(&self) -> ErrorKind { self.kind }
    pub fn status(&self) -> StatusCode { self.kind.status() }
    pub fn code(&self) -> &'static str { self.kind.code() }
    pub fn message(&self) -> &str { &self.message }
    pub fn detail(&self) -> Option<&Value> { self.detail.as_ref() }
    pub fn retry_after(&self) -> Option<Duration> { self.retry_after }

    /// Renders the error as a JSON response.
    ///
    /// `{code, message}` always; `retryAfter` (whole seconds, rounded up) and
    /// a matching `retry-after` header for rate limiting; `detail` only when
    /// `expose_detail` is set.
    pub(crate) fn to_response(&self, expose_detail: bool) -> Response {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Body<'a> {
            code: &'static str,
            message: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            retry_after: Option<u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            detail: Option<&'a Value>,
        }

        let retry_after = self.retry_after.map(ceil_secs);
        let body = Body {
            code: self.code(),
            message: &self.message,
            retry_after,
            detail: self.detail.as_ref().filter(|_| expose_detail),
        };

        // Serialising a struct of strings and numbers cannot fail; the
        // fallback keeps the contract even if that ever changes.
        let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| {
            format!(r#"{{"code":"{}","message":"{}"}}"#, self.code(), self.kind.default_message())
                .into_bytes()
        });

        let mut builder = Response::builder().status(self.status());
        if let Some(secs) = retry_after {
            builder = builder.header("retry-after", &secs.to_string());
        }
        builder.json(bytes)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 { secs + 1 } else { secs }
}

// ── Error ─────────────────────────────────────────────────────────────────────

/// The error type of handlers and middleware.
///
/// Deliberately *not* an implementation of [`std::error::Error`]: that is what
/// allows the blanket `From<E: std::error::Error>` conversion, so `?` works on
/// any error type inside a handler.
///
/// ```rust
/// use gantry::{Error, HttpError, Request, Response};
///
/// async fn load(req: Request) -> Result<Response, Error> {
///     let id: u64 = req.param("id").unwrap_or("").parse()   // ParseIntError → 500
///         .map_err(|_| HttpError::validation("id must be numeric"))?; // → 400
///     Ok(Response::text(format!("user {id}")))
/// }
/// ```
pub struct Error {
    repr: Repr,
}

enum Repr {
    Http(HttpError),
    Unrecognized(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl Error {
    /// An unrecognized failure carrying only a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self { repr: Repr::Unrecognized(message.to_string().into()) }
    }

    /// The typed error, if this is one.
    pub fn as_http(&self) -> Option<&HttpError> {
        match &self.repr {
            Repr::Http(e) => Some(e),
            Repr::Unrecognized(_) => None,
        }
    }

    /// Resolves to the typed error the translator renders.
    ///
    /// Unrecognized failures become `internal`; their description travels as
    /// `detail`, which is only exposed in development mode.
    pub fn into_http(self) -> HttpError {
        match self.repr {
            Repr::Http(e) => e,
            Repr::Unrecognized(e) => HttpError::from_kind(ErrorKind::Internal)
                .with_detail(Value::String(e.to_string())),
        }
    }
}

impl<E> From<E> for Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(e: E) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = Box::new(e);
        match boxed.downcast::<HttpError>() {
            Ok(http) => Self { repr: Repr::Http(*http) },
            Err(other) => Self { repr: Repr::Unrecognized(other) },
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Http(e) => fmt::Debug::fmt(e, f),
            Repr::Unrecognized(e) => f.debug_tuple("Unrecognized").field(e).finish(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Http(e) => fmt::Display::fmt(e, f),
            Repr::Unrecognized(e) => write!(f, "unrecognized failure: {e}"),
        }
    }
}

// ── ConfigError ───────────────────────────────────────────────────────────────

/// Raised while assembling an application: bad routes, bad configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("route `{method} {pattern}` conflicts with an existing route")]
    DuplicateRoute { method: http::Method, pattern: String },

    #[error("invalid mount prefix `{0}`")]
    InvalidPrefix(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

// ── ServerError ───────────────────────────────────────────────────────────────

/// Infrastructure failures: binding to a port, parsing the listen address.
///
/// Application-level failures never surface here; they are translated into
/// responses by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`: {source}")]
    Addr { addr: String, source: std::net::AddrParseError },
}
