mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use gantry::middleware::cors::{AllowOrigin, Cors};
use gantry::middleware::rate_limit::{FixedWindow, RateLimit};
use gantry::middleware::trace::Trace;
use gantry::{App, Config, Method, Request, Router, StatusCode};
use serde_json::json;

fn cors_app(log: &Log) -> App {
    let origins = AllowOrigin::List(vec!["https://app.example".into()]);
    App::new(Router::new().get("/data", recording_handler(log)))
        .layer(Cors::new(origins).max_age(Duration::from_secs(600)))
}

// ── CORS ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cors_preflight_short_circuits() {
    let log = log();
    let app = cors_app(&log);

    let req = http::Request::builder()
        .method(Method::OPTIONS)
        .uri("/data")
        .header("origin", "https://app.example")
        .header("access-control-request-method", "GET")
        .header("access-control-request-headers", "x-token")
        .body(empty())
        .unwrap();
    let res = send(&app, req).await;

    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
    assert_eq!(res.header("access-control-allow-headers"), Some("x-token"));
    assert_eq!(res.header("access-control-max-age"), Some("600"));
    assert!(res.header("access-control-allow-methods").is_some_and(|m| m.contains("GET")));
    assert!(entries(&log).is_empty());
}

#[tokio::test]
async fn cors_headers_decorate_allowed_origins_only() {
    let log = log();
    let app = cors_app(&log);

    let allowed = http::Request::builder()
        .uri("/data")
        .header("origin", "https://app.example")
        .body(empty())
        .unwrap();
    let res = send(&app, allowed).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("access-control-allow-origin"), Some("https://app.example"));
    assert_eq!(res.header("vary"), Some("origin"));

    let denied = http::Request::builder()
        .uri("/data")
        .header("origin", "https://evil.example")
        .body(empty())
        .unwrap();
    let res = send(&app, denied).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("access-control-allow-origin"), None);

    let same_origin = send(&app, request(Method::GET, "/data")).await;
    assert_eq!(same_origin.header("access-control-allow-origin"), None);
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rate_limit_rejects_past_max_until_the_window_ends() {
    let limiter = Arc::new(FixedWindow::new(2, Duration::from_millis(1000)).unwrap());
    let app = App::new(Router::new().get("/", |_req: Request| async { "ok" }))
        .rate_limit(RateLimit::new(limiter));
    let client = peer("10.0.0.1:40000");

    let first = send_from(&app, request(Method::GET, "/"), client).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("x-ratelimit-limit"), Some("2"));
    assert_eq!(first.header("x-ratelimit-remaining"), Some("1"));

    let second = send_from(&app, request(Method::GET, "/"), client).await;
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(second.header("x-ratelimit-remaining"), Some("0"));

    let third = send_from(&app, request(Method::GET, "/"), client).await;
    assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(third.header("retry-after"), Some("1"));
    let body = third.json();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["retryAfter"].as_u64().is_some_and(|s| s > 0));

    let other = send_from(&app, request(Method::GET, "/"), peer("10.0.0.2:40000")).await;
    assert_eq!(other.status, StatusCode::OK);

    tokio::time::advance(Duration::from_millis(1000)).await;
    let after = send_from(&app, request(Method::GET, "/"), client).await;
    assert_eq!(after.status, StatusCode::OK);
}

#[tokio::test]
async fn custom_keys_can_skip_metering() {
    let limiter = Arc::new(FixedWindow::new(1, Duration::from_secs(60)).unwrap());
    let keyed = RateLimit::keyed_by(limiter, |ctx| ctx.header("x-api-key").map(str::to_owned));
    let app = App::new(Router::new().get("/", |_req: Request| async { "ok" })).rate_limit(keyed);

    let with_key = || {
        http::Request::builder()
            .uri("/")
            .header("x-api-key", "k1")
            .body(empty())
            .unwrap()
    };

    assert_eq!(send(&app, with_key()).await.status, StatusCode::OK);
    assert_eq!(send(&app, with_key()).await.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(send(&app, request(Method::GET, "/")).await.status, StatusCode::OK);
    assert_eq!(send(&app, request(Method::GET, "/")).await.status, StatusCode::OK);
}

// ── Trace ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn trace_passes_results_through() {
    let app = App::new(Router::new().get("/", |_req: Request| async { "ok" })).layer(Trace::new());

    assert_eq!(send(&app, request(Method::GET, "/")).await.status, StatusCode::OK);
    assert_eq!(send(&app, request(Method::GET, "/missing")).await.status, StatusCode::NOT_FOUND);
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn app_from_config_wires_the_security_stack() {
    let config = Config::from_json(
        r#"{
            "devMode": true,
            "security": {
                "cors": { "origin": ["https://app.example"] },
                "rateLimit": { "max": 1, "window": 60000 }
            }
        }"#,
    )
    .unwrap();
    let app = App::from_config(Router::new().get("/", |_req: Request| async { "ok" }), &config).unwrap();
    let client = peer("192.0.2.7:1234");

    let req = || {
        http::Request::builder()
            .uri("/")
            .header("origin", "https://app.example")
            .body(empty())
            .unwrap()
    };

    let first = send_from(&app, req(), client).await;
    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.header("access-control-allow-origin"), Some("https://app.example"));

    let second = send_from(&app, req(), client).await;
    assert_eq!(second.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(second.header("access-control-allow-origin"), Some("https://app.example"));
    assert_eq!(second.json()["code"], json!("RATE_LIMIT_EXCEEDED"));
}

#[tokio::test]
async fn config_body_limit_applies() {
    let config = Config::from_json(r#"{ "bodyLimit": 8 }"#).unwrap();
    let app = App::from_config(Router::new().post("/", |_req: Request| async { "ok" }), &config).unwrap();

    let res = send(&app, json_request(Method::POST, "/", r#"{"much":"too long"}"#)).await;

    assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
}
