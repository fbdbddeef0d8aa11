//! Per-request state threaded through the middleware chain.
//!
//! A [`Context`] is created by the dispatcher for exactly one request and is
//! never shared. It holds the inbound [`Request`], a mutable response draft,
//! and a `finished` flag.
//!
//! Once the draft is finished, it is frozen: every further mutation is logged
//! and dropped. That is how "exactly one response per request" holds even
//! when a misbehaving middleware writes twice.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Extensions, HeaderMap, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::body;
use crate::error::{Error, HttpError};
use crate::request::Request;
use crate::response::{header_pair, Response};

/// The mutable, per-request state handed to every middleware.
#[derive(Debug)]
pub struct Context {
    request: Request,
    /// Percent-decoded path segments; `None` where decoding failed.
    segments: Vec<Option<String>>,
    draft: Response,
    finished: bool,
    extensions: Extensions,
}

impl Context {
    pub(crate) fn new(request: Request) -> Self {
        let segments = crate::router::decode_path(&request.path);
        Self {
            request,
            segments,
            draft: Response::status(StatusCode::OK),
            finished: false,
            extensions: Extensions::new(),
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request { &self.request }
    pub fn method(&self) -> &Method { self.request.method() }
    pub fn path(&self) -> &str { self.request.path() }
    pub fn headers(&self) -> &HeaderMap { self.request.headers() }
    pub fn header(&self, name: &str) -> Option<&str> { self.request.header(name) }
    pub fn query(&self) -> &HashMap<String, String> { self.request.query() }
    pub fn query_param(&self, key: &str) -> Option<&str> { self.request.query_param(key) }
    pub fn params(&self) -> &HashMap<String, String> { self.request.params() }
    pub fn param(&self, key: &str) -> Option<&str> { self.request.param(key) }
    pub fn raw_body(&self) -> &Bytes { self.request.body() }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.request.remote_addr() }

    pub(crate) fn segments(&self) -> &[Option<String>] { &self.segments }

    pub(crate) fn set_params(&mut self, params: HashMap<String, String>) {
        self.request.params = params;
    }

    /// The parsed body, parsing it now if the dispatcher did not do so
    /// eagerly. A malformed body is a `400 VALIDATION_ERROR`.
    pub fn body(&mut self) -> Result<Option<&Value>, Error> {
        if self.request.parsed.is_none() {
            self.request.parsed = body::parse(&self.request.headers, &self.request.body)?;
        }
        Ok(self.request.parsed.as_ref())
    }

    /// Typed per-request storage for passing data between middleware and
    /// handlers (authenticated user, request id, ...).
    pub fn extensions(&self) -> &Extensions { &self.extensions }
    pub fn extensions_mut(&mut self) -> &mut Extensions { &mut self.extensions }

    // ── Response draft ────────────────────────────────────────────────────────

    pub fn status(&self) -> StatusCode { self.draft.status }
    pub fn response_headers(&self) -> &HeaderMap { &self.draft.headers }

    /// Whether a response has been written. Terminal, never reset.
    pub fn is_finished(&self) -> bool { self.finished }

    pub fn set_status(&mut self, status: StatusCode) {
        if self.guard("set_status") {
            self.draft.status = status;
        }
    }

    /// Sets (replaces) a response header. Invalid names or values are logged
    /// and ignored.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if !self.guard("set_header") {
            return;
        }
        if let Some((name, value)) = header_pair(name, value) {
            self.draft.headers.insert(name, value);
        }
    }

    /// Serialises `value` as the JSON body and finishes the response with the
    /// current draft status.
    pub fn respond_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        if !self.guard("respond_json") {
            return Ok(());
        }
        let bytes = serde_json::to_vec(value).map_err(|e| {
            HttpError::internal("failed to serialise response body")
                .with_detail(Value::String(e.to_string()))
        })?;
        self.write_body(HeaderValue::from_static("application/json"), Bytes::from(bytes));
        Ok(())
    }

    /// Finishes the response with raw bytes and the given content type.
    pub fn respond_raw(&mut self, body: impl Into<Bytes>, content_type: &str) {
        if !self.guard("respond_raw") {
            return;
        }
        match HeaderValue::from_str(content_type) {
            Ok(ct) => self.write_body(ct, body.into()),
            Err(_) => {
                warn!(content_type, "invalid content type; sending application/octet-stream");
                self.write_body(HeaderValue::from_static("application/octet-stream"), body.into());
            }
        }
    }

    /// Finishes the response with a complete [`Response`]. Headers already set
    /// on the draft are kept unless the response sets the same name.
    pub fn respond(&mut self, response: Response) {
        if !self.guard("respond") {
            return;
        }
        let Response { status, headers, body } = response;
        let mut last = None;
        for (name, value) in headers {
            // `HeaderMap::into_iter` yields the name only on the first value
            // of each run; later values reuse it.
            if let Some(name) = name {
                self.draft.headers.remove(&name);
                last = Some(name);
            }
            if let Some(name) = &last {
                self.draft.headers.append(name.clone(), value);
            }
        }
        self.draft.status = status;
        self.draft.body = body;
        self.finished = true;
    }

    fn write_body(&mut self, content_type: HeaderValue, body: Bytes) {
        self.draft.headers.insert(CONTENT_TYPE, content_type);
        self.draft.body = body;
        self.finished = true;
    }

    /// `true` if the draft may still be mutated; logs the dropped write otherwise.
    fn guard(&self, op: &'static str) -> bool {
        if self.finished {
            warn!(
                op,
                method = %self.request.method,
                path = %self.request.path,
                "response already finished; write dropped",
            );
        }
        !self.finished
    }

    /// Consumes the context, yielding the response to send.
    pub(crate) fn into_response(self) -> Response {
        self.draft
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::fixture;

    fn ctx() -> Context {
        Context::new(fixture(Method::GET, "/users/42"))
    }

    #[test]
    fn respond_json_finishes_with_draft_status() {
        let mut ctx = ctx();
        ctx.set_status(StatusCode::CREATED);
        ctx.respond_json(&serde_json::json!({ "id": 42 })).unwrap();

        assert!(ctx.is_finished());
        let res = ctx.into_response();
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.headers[CONTENT_TYPE], "application/json");
        assert_eq!(res.body, r#"{"id":42}"#);
    }

    #[test]
    fn writes_after_finish_are_dropped() {
        let mut ctx = ctx();
        ctx.respond_raw("first", "text/plain");
        ctx.set_status(StatusCode::IM_A_TEAPOT);
        ctx.set_header("x-late", "1");
        ctx.respond(Response::text("second"));

        let res = ctx.into_response();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, "first");
        assert!(res.headers.get("x-late").is_none());
    }

    #[test]
    fn respond_keeps_draft_headers() {
        let mut ctx = ctx();
        ctx.set_header("x-request-id", "abc");
        ctx.set_header("content-type", "text/html");
        ctx.respond(Response::json(b"{}".to_vec()));

        let res = ctx.into_response();
        assert_eq!(res.headers["x-request-id"], "abc");
        assert_eq!(res.headers[CONTENT_TYPE], "application/json");
    }

    #[test]
    fn lazy_body_parse_reports_validation_error() {
        let mut req = fixture(Method::POST, "/users");
        req.headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        req.body = Bytes::from_static(b"{oops");
        let mut ctx = Context::new(req);

        let err = ctx.body().unwrap_err();
        assert_eq!(err.into_http().status(), StatusCode::BAD_REQUEST);
    }
}
