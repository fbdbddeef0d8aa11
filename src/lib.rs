//! # gantry
//!
//! An embeddable HTTP dispatch kernel: a router, an onion-model middleware
//! chain, a typed error taxonomy and a per-request context, on hyper and
//! tokio.
//!
//! ## The contract
//!
//! Every request gets exactly one response. Handlers and middleware return
//! `Result<_, Error>`; failures propagate with `?` to a single translator that
//! renders them as JSON:
//!
//! ```json
//! { "code": "NOT_FOUND", "message": "Route GET /nope not found" }
//! ```
//!
//! Anything that is not an [`HttpError`] (an I/O error, a panic, a chain that
//! forgot to respond) becomes `500 INTERNAL_SERVER_ERROR`. Its detail is only
//! shown in development mode.
//!
//! What ships with the kernel:
//!
//! - Segment routing with literal > parameter > wildcard precedence
//! - Middleware in registration order in, reverse order out, scoped by prefix
//! - Body size limits, eager or lazy JSON/form parsing, per-request deadlines
//! - Fixed-window rate limiting, CORS, request tracing, metrics, health probes
//! - Graceful shutdown on SIGTERM / Ctrl-C
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gantry::{App, Config, HttpError, Json, Request, Router, Server};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct NewUser { name: String }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json(r#"{ "port": 3000 }"#)?;
//!
//!     let router = Router::new()
//!         .get("/users/:id", get_user)
//!         .post("/users", create_user);
//!
//!     let app = App::from_config(router, &config)?;
//!     Server::port(config.port).serve(app).await?;
//!     Ok(())
//! }
//!
//! async fn get_user(req: Request) -> Result<String, HttpError> {
//!     let id = req.param("id").unwrap_or_default();
//!     if id == "0" {
//!         return Err(HttpError::not_found(format!("User {id} not found")));
//!     }
//!     Ok(format!("user {id}"))
//! }
//!
//! async fn create_user(req: Request) -> Result<Json<serde_json::Value>, gantry::Error> {
//!     let user: NewUser = req.json()?;
//!     Ok(Json(serde_json::json!({ "name": user.name })))
//! }
//! ```

mod body;
mod config;
mod context;
mod dispatcher;
mod error;
mod handler;
mod metrics;
mod request;
mod response;
mod router;
mod server;

pub mod health;
pub mod middleware;

pub use config::{Config, CorsConfig, RateLimitConfig, SecurityConfig};
pub use context::Context;
pub use dispatcher::App;
pub use error::{ConfigError, Error, ErrorKind, HttpError, ServerError};
pub use handler::Handler;
pub use metrics::{InFlight, Metrics, MetricsSnapshot};
pub use request::Request;
pub use response::{ContentType, Json, Reply, Response, ResponseBuilder};
pub use router::Router;
pub use server::Server;

pub use http::{Method, StatusCode};
