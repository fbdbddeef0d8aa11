//! Segment-based request router.
//!
//! One ordered route list per HTTP method. Patterns are compiled once into
//! segment specs (literal, parameter, trailing wildcard) and matched by direct
//! segment comparison: no regex, no backtracking, worst case
//! O(routes × segments) for attacker-controlled paths.
//!
//! # Pattern syntax
//!
//! | Segment | Matches | Binds |
//! |---|---|---|
//! | `users` | exactly `users` (after percent-decoding) | nothing |
//! | `:id` or `{id}` | any single non-empty segment | `id` |
//! | `*rest`, `{*rest}` or `*` (last only) | one or more remaining segments | `rest` (or `*`) |
//!
//! # Precedence
//!
//! When several patterns match the same path, the most specific wins:
//! segments are compared left to right, literal beats parameter beats
//! wildcard, and registration order breaks whatever ties remain. So
//! `/users/stats` beats `/users/:id` no matter which was registered first.

use std::borrow::Cow;
use std::collections::HashMap;

use http::Method;

use crate::error::{ConfigError, HttpError};
use crate::handler::{Handler, SharedEndpoint};
use crate::middleware::{Chain, Layer};
use crate::request::Request;
use crate::response::Response;

// ── Segments ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard(String),
}

impl Segment {
    /// Specificity rank: lower wins.
    fn rank(&self) -> u8 {
        match self {
            Self::Literal(_)  => 0,
            Self::Param(_)    => 1,
            Self::Wildcard(_) => 2,
        }
    }

    /// Two segments with the same shape accept exactly the same inputs.
    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Param(_), Self::Param(_)) | (Self::Wildcard(_), Self::Wildcard(_)) => true,
            _ => false,
        }
    }
}

fn compile(pattern: &str) -> Result<Vec<Segment>, &'static str> {
    let Some(rest) = pattern.strip_prefix('/') else {
        return Err("pattern must start with `/`");
    };
    // `/` alone is the root route: zero segments.
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<&str> = rest.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    for (i, part) in raw.iter().enumerate() {
        let segment = compile_segment(part)?;
        if matches!(segment, Segment::Wildcard(_)) && i + 1 != raw.len() {
            return Err("wildcard must be the last segment");
        }
        segments.push(segment);
    }

    // Every parameter and wildcard needs its own name, or one binding would
    // silently overwrite another.
    let mut names: Vec<&str> = segments
        .iter()
        .filter_map(|s| match s {
            Segment::Param(n) | Segment::Wildcard(n) => Some(n.as_str()),
            Segment::Literal(_) => None,
        })
        .collect();
    let count = names.len();
    names.sort_unstable();
    names.dedup();
    if names.len() != count {
        return Err("parameter name used twice");
    }

    Ok(segments)
}

fn compile_segment(part: &str) -> Result<Segment, &'static str> {
    if let Some(name) = part.strip_prefix(':') {
        return param_name(name).map(Segment::Param);
    }
    if let Some(name) = part.strip_prefix('*') {
        return wildcard_name(name).map(Segment::Wildcard);
    }
    if let Some(inner) = part.strip_prefix('{') {
        let Some(inner) = inner.strip_suffix('}') else {
            return Err("unterminated `{` in parameter");
        };
        return match inner.strip_prefix('*') {
            Some(name) => wildcard_name(name).map(Segment::Wildcard),
            None => param_name(inner).map(Segment::Param),
        };
    }
    if part.contains(['{', '}']) {
        return Err("unexpected brace in literal segment");
    }
    // Literals are compared against decoded request segments, so they are
    // stored decoded too.
    decode_segment(part)
        .map(Segment::Literal)
        .ok_or("malformed percent-escape in literal segment")
}

fn param_name(name: &str) -> Result<String, &'static str> {
    if name.is_empty() {
        return Err("empty parameter name");
    }
    if name.contains([':', '*', '{', '}']) {
        return Err("invalid character in parameter name");
    }
    Ok(name.to_owned())
}

fn wildcard_name(name: &str) -> Result<String, &'static str> {
    if name.is_empty() {
        return Ok("*".to_owned());
    }
    param_name(name)
}

// ── Percent-decoding ──────────────────────────────────────────────────────────

/// Strictly percent-decodes one path segment.
///
/// Returns `None` for a malformed escape (`%`, `%4`, `%zz`) or if the decoded
/// bytes are not UTF-8. Lenient decoders pass such input through unchanged;
/// here it must not match anything.
pub(crate) fn decode_segment(raw: &str) -> Option<String> {
    if !raw.contains('%') {
        return Some(raw.to_owned());
    }
    if !escapes_are_well_formed(raw) {
        return None;
    }
    urlencoding::decode(raw).ok().map(Cow::into_owned)
}

/// Every `%` is followed by two hex digits.
fn escapes_are_well_formed(raw: &str) -> bool {
    let mut bytes = raw.bytes();
    while let Some(b) = bytes.next() {
        if b != b'%' {
            continue;
        }
        let hi = bytes.next().is_some_and(|h| h.is_ascii_hexdigit());
        let lo = bytes.next().is_some_and(|l| l.is_ascii_hexdigit());
        if !(hi && lo) {
            return false;
        }
    }
    true
}

/// Splits a request path into decoded segments. `/` is zero segments.
pub(crate) fn decode_path(path: &str) -> Vec<Option<String>> {
    let rest = path.strip_prefix('/').unwrap_or(path);
    if rest.is_empty() {
        return Vec::new();
    }
    rest.split('/').map(decode_segment).collect()
}

// ── Route ─────────────────────────────────────────────────────────────────────

pub(crate) struct Route {
    pattern: String,
    segments: Vec<Segment>,
    rank: Vec<u8>,
    pub(crate) handler: SharedEndpoint,
    pub(crate) layers: Vec<Layer>,
}

impl Route {
    pub(crate) fn pattern(&self) -> &str { &self.pattern }

    fn same_shape(&self, segments: &[Segment]) -> bool {
        self.segments.len() == segments.len()
            && self.segments.iter().zip(segments).all(|(a, b)| a.same_shape(b))
    }

    /// Matches decoded path segments, returning the bound parameters.
    fn matches(&self, path: &[Option<String>]) -> Option<HashMap<String, String>> {
        let wildcard = match self.segments.last() {
            Some(Segment::Wildcard(name)) => Some(name),
            _ => None,
        };
        let fixed = self.segments.len() - usize::from(wildcard.is_some());

        // Without a wildcard the lengths must agree exactly; with one, at
        // least one segment must be left over for it.
        let len_ok = if wildcard.is_some() { path.len() > fixed } else { path.len() == fixed };
        if !len_ok {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, segment) in self.segments[..fixed].iter().zip(path) {
            // An undecodable segment rules this candidate out, nothing more.
            let segment = segment.as_deref()?;
            match expected {
                Segment::Literal(lit) if lit == segment => {}
                Segment::Param(name) if !segment.is_empty() => {
                    params.insert(name.clone(), segment.to_owned());
                }
                _ => return None,
            }
        }

        // The wildcard takes the decoded remainder, rejoined with `/`.
        if let Some(name) = wildcard {
            let rest = path[fixed..]
                .iter()
                .map(Option::as_deref)
                .collect::<Option<Vec<&str>>>()?
                .join("/");
            if rest.is_empty() {
                return None;
            }
            params.insert(name.clone(), rest);
        }

        Some(params)
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Build it once at startup and hand it to [`App::new`](crate::App::new); from
/// then on it is read-only, shared by every in-flight request without locks.
/// The builder methods return `self` so registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, Vec<Route>>,
    fallback: SharedEndpoint,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new(), fallback: not_found.into_endpoint() }
    }

    /// Registers a handler for a method + pattern pair.
    ///
    /// Fails if the pattern is malformed, or if a route with the same shape
    /// (same literals, parameters and wildcard in the same places, whatever
    /// their names) already exists for `method`.
    pub fn try_on(
        &mut self,
        method: Method,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<&mut Self, ConfigError> {
        self.try_on_with(method, pattern, Chain::new(), handler)
    }

    /// Like [`try_on`](Self::try_on), with middleware that runs only for this
    /// route, after the application-wide chain.
    pub fn try_on_with(
        &mut self,
        method: Method,
        pattern: &str,
        chain: Chain,
        handler: impl Handler,
    ) -> Result<&mut Self, ConfigError> {
        let segments = compile(pattern).map_err(|reason| ConfigError::InvalidPattern {
            pattern: pattern.to_owned(),
            reason,
        })?;

        // Parameter names do not count: `/users/:id` and `/users/{name}`
        // accept the same paths and are the same route.
        let routes = self.routes.entry(method.clone()).or_default();
        if routes.iter().any(|r| r.same_shape(&segments)) {
            return Err(ConfigError::DuplicateRoute { method, pattern: pattern.to_owned() });
        }

        let rank: Vec<u8> = segments.iter().map(Segment::rank).collect();
        // Insert after every route of equal or higher precedence so that
        // registration order breaks ties.
        let at = routes.partition_point(|r| r.rank <= rank);
        routes.insert(at, Route {
            pattern: pattern.to_owned(),
            segments,
            rank,
            handler: handler.into_endpoint(),
            layers: chain.into_layers(),
        });
        Ok(self)
    }

    /// Registers a handler for a method + pattern pair. Returns `self` for chaining.
    ///
    /// ```rust
    /// # use gantry::{Method, Request, Response, Router};
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// # async fn delete_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::DELETE, "/users/:id", delete_user)
    ///     .on(Method::GET,    "/users/{id}", get_user)
    ///     .on(Method::POST,   "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate route. Use [`try_on`](Self::try_on)
    /// to handle the error instead.
    pub fn on(self, method: Method, pattern: &str, handler: impl Handler) -> Self {
        self.on_with(method, pattern, Chain::new(), handler)
    }

    /// Builder form of [`try_on_with`](Self::try_on_with).
    ///
    /// # Panics
    ///
    /// Panics on an invalid or duplicate route.
    pub fn on_with(mut self, method: Method, pattern: &str, chain: Chain, handler: impl Handler) -> Self {
        if let Err(e) = self.try_on_with(method, pattern, chain, handler) {
            panic!("{e}");
        }
        self
    }

    pub fn get(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, pattern, handler)
    }

    pub fn put(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, pattern, handler)
    }

    pub fn patch(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, pattern, handler)
    }

    /// Replaces the handler used when no route matches. The default raises
    /// `404 NOT_FOUND`.
    pub fn fallback(mut self, handler: impl Handler) -> Self {
        self.fallback = handler.into_endpoint();
        self
    }

    pub(crate) fn fallback_handler(&self) -> &SharedEndpoint {
        &self.fallback
    }

    /// Resolves decoded path segments to a route and its parameters.
    ///
    /// `HEAD` falls back to the `GET` routes when no `HEAD` route matches.
    pub(crate) fn lookup(
        &self,
        method: &Method,
        segments: &[Option<String>],
    ) -> Option<(&Route, HashMap<String, String>)> {
        let found = self.find(method, segments);
        if found.is_none() && *method == Method::HEAD {
            return self.find(&Method::GET, segments);
        }
        found
    }

    fn find(&self, method: &Method, segments: &[Option<String>]) -> Option<(&Route, HashMap<String, String>)> {
        // Routes are kept in precedence order, so the first match wins.
        self.routes
            .get(method)?
            .iter()
            .find_map(|route| route.matches(segments).map(|params| (route, params)))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

async fn not_found(req: Request) -> Result<Response, HttpError> {
    Err(HttpError::not_found(format!("Route {} {} not found", req.method(), req.path())))
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (method, routes) in &self.routes {
            map.entry(method, &routes.iter().map(Route::pattern).collect::<Vec<_>>());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_req: Request) -> &'static str { "ok" }

    fn resolve<'r>(router: &'r Router, method: Method, path: &str) -> Option<(&'r str, HashMap<String, String>)> {
        let segments = decode_path(path);
        router.lookup(&method, &segments).map(|(r, p)| (r.pattern(), p))
    }

    #[test]
    fn literal_beats_param_in_either_order() {
        let first = Router::new().get("/users/:id", ok).get("/users/stats", ok);
        let second = Router::new().get("/users/stats", ok).get("/users/:id", ok);

        for router in [&first, &second] {
            let (pattern, params) = resolve(router, Method::GET, "/users/stats").unwrap();
            assert_eq!(pattern, "/users/stats");
            assert!(params.is_empty());

            let (pattern, params) = resolve(router, Method::GET, "/users/42").unwrap();
            assert_eq!(pattern, "/users/:id");
            assert_eq!(params["id"], "42");
        }
    }

    #[test]
    fn precedence_is_leftmost_first() {
        let router = Router::new().get("/:org/repos/:name", ok).get("/acme/:section/:name", ok);
        let (pattern, _) = resolve(&router, Method::GET, "/acme/repos/gantry").unwrap();
        assert_eq!(pattern, "/acme/:section/:name");
    }

    #[test]
    fn param_beats_wildcard() {
        let router = Router::new().get("/files/*path", ok).get("/files/:name", ok);

        let (pattern, params) = resolve(&router, Method::GET, "/files/a.txt").unwrap();
        assert_eq!(pattern, "/files/:name");
        assert_eq!(params["name"], "a.txt");

        let (pattern, params) = resolve(&router, Method::GET, "/files/docs/a%20b.txt").unwrap();
        assert_eq!(pattern, "/files/*path");
        assert_eq!(params["path"], "docs/a b.txt");
    }

    #[test]
    fn wildcard_needs_at_least_one_segment() {
        let router = Router::new().get("/static/{*rest}", ok);
        assert!(resolve(&router, Method::GET, "/static").is_none());
        assert!(resolve(&router, Method::GET, "/static/").is_none());
        assert!(resolve(&router, Method::GET, "/static/css/app.css").is_some());
    }

    #[test]
    fn params_are_decoded_and_non_empty() {
        let router = Router::new().get("/users/{id}", ok);
        let (_, params) = resolve(&router, Method::GET, "/users/j%C3%B8rn").unwrap();
        assert_eq!(params["id"], "jørn");
        assert!(resolve(&router, Method::GET, "/users/").is_none());
        assert!(resolve(&router, Method::GET, "/users/1/2").is_none());
    }

    #[test]
    fn malformed_escape_is_no_match() {
        let router = Router::new().get("/users/:id", ok).get("/files/*path", ok);
        assert!(resolve(&router, Method::GET, "/users/%zz").is_none());
        assert!(resolve(&router, Method::GET, "/users/%4").is_none());
        assert!(resolve(&router, Method::GET, "/files/ok/%E0%A4").is_none());
    }

    #[test]
    fn root_and_method_separation() {
        let router = Router::new().get("/", ok).post("/users", ok);
        assert_eq!(resolve(&router, Method::GET, "/").unwrap().0, "/");
        assert!(resolve(&router, Method::GET, "/users").is_none());
        assert!(resolve(&router, Method::POST, "/users").is_some());
    }

    #[test]
    fn head_falls_back_to_get() {
        let router = Router::new().get("/ping", ok);
        assert_eq!(resolve(&router, Method::HEAD, "/ping").unwrap().0, "/ping");
    }

    #[test]
    fn rejects_malformed_patterns() {
        let mut router = Router::new();
        for bad in ["users", "/users/{id", "/users/:", "/{}", "/a/*rest/b", "/a/:x/:x", "/a{b", "/bad%zz"] {
            let err = router.try_on(Method::GET, bad, ok).err();
            assert!(matches!(err, Some(ConfigError::InvalidPattern { .. })), "{bad} should be rejected");
        }
    }

    #[test]
    fn rejects_duplicates_by_shape() {
        let mut router = Router::new();
        router.try_on(Method::GET, "/users/:id", ok).unwrap();

        let err = router.try_on(Method::GET, "/users/{name}", ok).err();
        assert!(matches!(err, Some(ConfigError::DuplicateRoute { .. })));

        // Same pattern on another method is fine.
        router.try_on(Method::PUT, "/users/:id", ok).unwrap();
    }

    #[test]
    fn decode_segment_is_strict() {
        assert_eq!(decode_segment("a%2Fb").as_deref(), Some("a/b"));
        assert_eq!(decode_segment("plain+text").as_deref(), Some("plain+text"));
        assert_eq!(decode_segment("%"), None);
        assert_eq!(decode_segment("%g1"), None);
        assert_eq!(decode_segment("%ff"), None);
        assert_eq!(decode_segment("%4"), None);
        assert_eq!(decode_segment("caf%C3%A9").as_deref(), Some("café"));
        assert_eq!(decode_segment("100%25").as_deref(), Some("100%"));
    }
}
