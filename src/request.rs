//! Incoming HTTP request type.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, HttpError};

/// The inbound side of a request, as seen by route handlers.
///
/// Handlers receive their own copy; middleware reach the same data through
/// [`Context`](crate::Context).
#[derive(Clone, Debug)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: HashMap<String, String>,
    pub(crate) body: Bytes,
    pub(crate) parsed: Option<Value>,
    pub(crate) params: HashMap<String, String>,
    pub(crate) remote_addr: Option<SocketAddr>,
}

impl Request {
    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn query(&self) -> &HashMap<String, String> { &self.query }
    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// Peer address reported by the transport, if any.
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// Case-insensitive header lookup. Values that are not visible ASCII read
    /// as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/:id`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns a query-string value. For repeated keys the last one wins.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// The body as parsed by the dispatcher (JSON, or a form as an object of
    /// strings). `None` for empty bodies, other content types, or when eager
    /// parsing is disabled and nothing parsed it yet.
    pub fn body_value(&self) -> Option<&Value> {
        self.parsed.as_ref()
    }

    /// Deserialises the body into `T`.
    ///
    /// Uses the already-parsed body when there is one, otherwise parses the
    /// raw bytes as JSON. Any mismatch is a `400 VALIDATION_ERROR`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let result = match &self.parsed {
            Some(value) => T::deserialize(value),
            None => serde_json::from_slice(&self.body),
        };
        result.map_err(|e| {
            HttpError::validation("Request body does not match the expected shape")
                .with_detail(Value::String(e.to_string()))
                .into()
        })
    }
}

#[cfg(test)]
pub(crate) fn fixture(method: Method, path: &str) -> Request {
    Request {
        method,
        path: path.to_owned(),
        headers: HeaderMap::new(),
        query: HashMap::new(),
        body: Bytes::new(),
        parsed: None,
        params: HashMap::new(),
        remote_addr: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct NewUser { name: String }

    #[test]
    fn json_prefers_parsed_body() {
        let mut req = fixture(Method::POST, "/users");
        req.parsed = Some(serde_json::json!({ "name": "alice" }));
        assert_eq!(req.json::<NewUser>().unwrap(), NewUser { name: "alice".into() });
    }

    #[test]
    fn json_falls_back_to_raw_bytes() {
        let mut req = fixture(Method::POST, "/users");
        req.body = Bytes::from_static(br#"{"name":"bob"}"#);
        assert_eq!(req.json::<NewUser>().unwrap(), NewUser { name: "bob".into() });
    }

    #[test]
    fn json_mismatch_is_validation_error() {
        let mut req = fixture(Method::POST, "/users");
        req.body = Bytes::from_static(br#"{"nom":"bob"}"#);
        let err = req.json::<NewUser>().unwrap_err();
        assert_eq!(err.as_http().map(HttpError::kind), Some(ErrorKind::Validation));
    }
}
