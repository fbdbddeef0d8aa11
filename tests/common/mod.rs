#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::future::BoxFuture;
use gantry::middleware::{Context, Middleware, Next};
use gantry::{App, Error, Method};
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::Value;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn empty() -> Full<Bytes> {
    Full::new(Bytes::new())
}

pub fn request(method: Method, uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(empty())
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: &str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_owned())))
        .unwrap()
}

pub fn peer(addr: &str) -> Option<SocketAddr> {
    Some(addr.parse().unwrap())
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.to_str().unwrap())
    }
}

pub async fn send(app: &App, req: http::Request<Full<Bytes>>) -> Reply {
    send_from(app, req, None).await
}

pub async fn send_from(app: &App, req: http::Request<Full<Bytes>>, remote: Option<SocketAddr>) -> Reply {
    let res = app.dispatch(req, remote).await;
    let (parts, body) = res.into_parts();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: body.collect().await.unwrap().to_bytes(),
    }
}

/// Records `<name>-pre` and `<name>-post` around the rest of the chain.
pub struct Record {
    pub name: &'static str,
    pub log: Log,
}

impl Record {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self { name, log: Arc::clone(log) }
    }
}

impl Middleware for Record {
    fn handle<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!("{}-pre", self.name));
            let result = next.run(ctx).await;
            self.log.lock().unwrap().push(format!("{}-post", self.name));
            result
        })
    }
}

/// A handler that records `handler` and answers `ok`.
pub fn recording_handler(log: &Log) -> impl gantry::Handler {
    let log = Arc::clone(log);
    move |_req: gantry::Request| {
        log.lock().unwrap().push("handler".to_owned());
        async { "ok" }
    }
}
