//! Request body buffering and parsing.
//!
//! Size limits are enforced twice: up front from `Content-Length`, and while
//! streaming through [`Limited`], so a lying or chunked client can never make
//! the server buffer more than the limit.

use std::collections::HashMap;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::Body;
use serde_json::{Map, Value};

use crate::error::HttpError;

/// Buffers `body`, failing with `413` as soon as it exceeds `limit` bytes.
pub(crate) async fn read<B>(headers: &HeaderMap, body: B, limit: usize) -> Result<Bytes, HttpError>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(too_large(limit));
    }

    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(too_large(limit)),
        Err(e) => Err(HttpError::validation("Failed to read request body")
            .with_detail(Value::String(e.to_string()))),
    }
}

fn too_large(limit: usize) -> HttpError {
    HttpError::payload_too_large(format!("Request body exceeds the {limit} byte limit"))
}

/// Parses `body` according to its declared content type.
///
/// JSON (`application/json` or any `+json` type) parses to a [`Value`];
/// `application/x-www-form-urlencoded` parses to an object of strings.
/// Empty bodies and other content types yield `Ok(None)`.
pub(crate) fn parse(headers: &HeaderMap, body: &[u8]) -> Result<Option<Value>, HttpError> {
    if body.is_empty() {
        return Ok(None);
    }
    let Some(mime) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<mime::Mime>().ok())
    else {
        return Ok(None);
    };

    let is_json = mime.subtype() == mime::JSON || mime.suffix() == Some(mime::JSON);
    if mime.type_() == mime::APPLICATION && is_json {
        return serde_json::from_slice(body).map(Some).map_err(|e| {
            HttpError::validation("Malformed JSON body").with_detail(Value::String(e.to_string()))
        });
    }

    if mime.essence_str() == mime::APPLICATION_WWW_FORM_URLENCODED.essence_str() {
        let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).map_err(|e| {
            HttpError::validation("Malformed form body").with_detail(Value::String(e.to_string()))
        })?;
        let object: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return Ok(Some(Value::Object(object)));
    }

    Ok(None)
}

/// Parses a raw query string. Repeated keys keep the last value.
pub(crate) fn query(raw: Option<&str>) -> Result<HashMap<String, String>, HttpError> {
    let Some(raw) = raw.filter(|q| !q.is_empty()) else {
        return Ok(HashMap::new());
    };
    serde_urlencoded::from_str::<Vec<(String, String)>>(raw)
        .map(|pairs| pairs.into_iter().collect())
        .map_err(|e| {
            HttpError::validation("Malformed query string").with_detail(Value::String(e.to_string()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use http::HeaderValue;
    use http_body_util::Full;

    fn with_type(ct: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        headers
    }

    #[tokio::test]
    async fn reads_body_within_limit() {
        let bytes = read(&HeaderMap::new(), Full::new(Bytes::from_static(b"hello")), 5).await.unwrap();
        assert_eq!(bytes, "hello");
    }

    #[tokio::test]
    async fn streaming_body_over_limit_is_413() {
        let err = read(&HeaderMap::new(), Full::new(Bytes::from_static(b"hello!")), 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[tokio::test]
    async fn declared_length_over_limit_is_rejected_up_front() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("1000"));
        let err = read(&headers, Full::new(Bytes::new()), 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PayloadTooLarge);
    }

    #[test]
    fn parses_json_and_vendor_json() {
        let value = parse(&with_type("application/json; charset=utf-8"), br#"{"a":1}"#).unwrap();
        assert_eq!(value, Some(serde_json::json!({ "a": 1 })));

        let value = parse(&with_type("application/vnd.api+json"), b"[1,2]").unwrap();
        assert_eq!(value, Some(serde_json::json!([1, 2])));
    }

    #[test]
    fn malformed_json_is_validation_error() {
        let err = parse(&with_type("application/json"), b"{not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn parses_form_into_object() {
        let value = parse(&with_type("application/x-www-form-urlencoded"), b"name=al%20ice&age=3").unwrap();
        assert_eq!(value, Some(serde_json::json!({ "name": "al ice", "age": "3" })));
    }

    #[test]
    fn other_types_stay_raw() {
        assert_eq!(parse(&with_type("text/plain"), b"{not json").unwrap(), None);
        assert_eq!(parse(&HeaderMap::new(), b"{not json").unwrap(), None);
    }

    #[test]
    fn query_last_value_wins() {
        let q = query(Some("a=1&b=x%2Fy&a=2")).unwrap();
        assert_eq!(q["a"], "2");
        assert_eq!(q["b"], "x/y");
        assert!(query(None).unwrap().is_empty());
    }
}
