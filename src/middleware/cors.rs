//! Cross-origin resource sharing.
//!
//! Requests without an `Origin` header are not cross-origin and pass through
//! untouched. For an allowed origin the `access-control-*` headers are set on
//! the draft before the rest of the chain runs, so they survive whatever the
//! handler writes. Disallowed origins get no CORS headers; the browser does
//! the blocking.
//!
//! A preflight (`OPTIONS` with `access-control-request-method`) from an
//! allowed origin is answered here with `204` and never reaches the router.

use std::time::Duration;

use futures::future::BoxFuture;
use http::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Context, Middleware, Next};
use crate::error::Error;
use crate::response::Response;

const DEFAULT_METHODS: &str = "GET, HEAD, POST, PUT, PATCH, DELETE, OPTIONS";
const DEFAULT_HEADERS: &str = "content-type, authorization";

/// Which origins may read responses. Configured as `"*"` or a list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "OriginSetting", into = "OriginSetting")]
pub enum AllowOrigin {
    #[default]
    Any,
    List(Vec<String>),
}

impl AllowOrigin {
    fn header_for(&self, origin: &str) -> Option<String> {
        match self {
            AllowOrigin::Any     => Some("*".to_owned()),
            AllowOrigin::List(l) => l.iter().any(|o| o == origin).then(|| origin.to_owned()),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OriginSetting {
    One(String),
    Many(Vec<String>),
}

impl TryFrom<OriginSetting> for AllowOrigin {
    type Error = String;

    fn try_from(setting: OriginSetting) -> Result<Self, Self::Error> {
        match setting {
            OriginSetting::One(s) if s == "*" => Ok(AllowOrigin::Any),
            OriginSetting::One(s)             => Err(format!("expected \"*\" or a list of origins, got {s:?}")),
            OriginSetting::Many(list)         => Ok(AllowOrigin::List(list)),
        }
    }
}

impl From<AllowOrigin> for OriginSetting {
    fn from(origin: AllowOrigin) -> Self {
        match origin {
            AllowOrigin::Any        => OriginSetting::One("*".to_owned()),
            AllowOrigin::List(list) => OriginSetting::Many(list),
        }
    }
}

/// CORS middleware.
#[derive(Clone, Debug)]
pub struct Cors {
    origin: AllowOrigin,
    methods: String,
    headers: Option<String>,
    max_age: Option<Duration>,
}

impl Cors {
    pub fn new(origin: AllowOrigin) -> Self {
        Self { origin, methods: DEFAULT_METHODS.to_owned(), headers: None, max_age: None }
    }

    /// Any origin, default methods, request headers echoed on preflight.
    pub fn permissive() -> Self {
        Self::new(AllowOrigin::Any)
    }

    pub fn allow_methods(mut self, methods: &[Method]) -> Self {
        self.methods = methods.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
        self
    }

    /// Fixed `access-control-allow-headers`. Without it a preflight echoes
    /// `access-control-request-headers`.
    pub fn allow_headers(mut self, headers: &[&str]) -> Self {
        self.headers = Some(headers.join(", "));
        self
    }

    pub fn max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    fn preflight(&self, ctx: &Context, allow_origin: &str) -> Response {
        let allow_headers = self
            .headers
            .as_deref()
            .or_else(|| ctx.header("access-control-request-headers"))
            .unwrap_or(DEFAULT_HEADERS);

        let mut builder = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .header("access-control-allow-origin", allow_origin)
            .header("access-control-allow-methods", &self.methods)
            .header("access-control-allow-headers", allow_headers);
        if let Some(max_age) = self.max_age {
            builder = builder.header("access-control-max-age", &max_age.as_secs().to_string());
        }
        if self.origin != AllowOrigin::Any {
            builder = builder.header("vary", "origin");
        }
        builder.no_body()
    }
}

impl Middleware for Cors {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        let Some(origin) = ctx.header("origin") else {
            return next.run(ctx);
        };
        let Some(allow_origin) = self.origin.header_for(origin) else {
            debug!(origin, path = ctx.path(), "origin not allowed");
            return next.run(ctx);
        };

        let is_preflight = *ctx.method() == Method::OPTIONS
            && ctx.headers().contains_key("access-control-request-method");
        if is_preflight {
            let response = self.preflight(ctx, &allow_origin);
            ctx.respond(response);
            return Box::pin(async { Ok(()) });
        }

        ctx.set_header("access-control-allow-origin", &allow_origin);
        if self.origin != AllowOrigin::Any {
            ctx.set_header("vary", "origin");
        }
        next.run(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_echoes_only_listed_origins() {
        let origin = AllowOrigin::List(vec!["https://app.example".into()]);
        assert_eq!(origin.header_for("https://app.example").as_deref(), Some("https://app.example"));
        assert_eq!(origin.header_for("https://evil.example"), None);
        assert_eq!(AllowOrigin::Any.header_for("https://x").as_deref(), Some("*"));
    }

    #[test]
    fn origin_config_accepts_star_or_list() {
        let any: AllowOrigin = serde_json::from_str(r#""*""#).unwrap();
        assert_eq!(any, AllowOrigin::Any);

        let list: AllowOrigin = serde_json::from_str(r#"["https://a", "https://b"]"#).unwrap();
        assert_eq!(list, AllowOrigin::List(vec!["https://a".into(), "https://b".into()]));

        assert!(serde_json::from_str::<AllowOrigin>(r#""https://a""#).is_err());
    }
}
