//! Minimal gantry example: CRUD-style JSON endpoints, middleware, health
//! checks and metrics.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users/42
//!   curl http://localhost:3000/users/0            # 404 NOT_FOUND
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' -d '{oops'   # 400 VALIDATION_ERROR
//!   curl -X DELETE http://localhost:3000/admin/users/42 # 401 without a token
//!   curl http://localhost:3000/metrics

use std::sync::Arc;

use gantry::middleware::{self, Chain};
use gantry::{
    health, App, Config, Error, HttpError, Json, Metrics, Request, Response, Router, Server, StatusCode,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct User {
    id: String,
    name: String,
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_json(
        r#"{
            "port": 3000,
            "devMode": true,
            "security": { "rateLimit": { "max": 60, "window": 60000 } }
        }"#,
    )?;

    let require_token = Chain::new().layer(middleware::from_fn(|ctx, next| {
        Box::pin(async move {
            let denied = match ctx.header("authorization") {
                Some("Bearer letmein") => None,
                Some(_) => Some(HttpError::authorization("Token does not grant access")),
                None    => Some(HttpError::authentication("Missing bearer token")),
            };
            match denied {
                None      => next.run(ctx).await,
                Some(err) => Err(err.into()),
            }
        })
    }));

    let metrics = Arc::new(Metrics::new());
    let router = Router::new()
        .get("/users/:id",                  get_user)
        .post("/users",                     create_user)
        .on_with(gantry::Method::DELETE, "/admin/users/:id", require_token, delete_user)
        .get("/healthz",                    health::liveness)
        .get("/readyz",                     health::readiness)
        .get("/metrics",                    health::metrics(Arc::clone(&metrics)));

    let app = App::from_config(router, &config)?
        .with_metrics(metrics)
        .layer(middleware::from_fn(|ctx, next| {
            Box::pin(async move {
                ctx.set_header("x-powered-by", "gantry");
                next.run(ctx).await
            })
        }));

    Server::port(config.port).serve(app).await?;
    Ok(())
}

// GET /users/:id
async fn get_user(req: Request) -> Result<Json<User>, HttpError> {
    let id = req.param("id").unwrap_or_default();
    if id == "0" {
        return Err(HttpError::not_found(format!("User {id} not found")));
    }
    Ok(Json(User { id: id.to_owned(), name: "alice".into() }))
}

// POST /users
async fn create_user(req: Request) -> Result<Response, Error> {
    let new: NewUser = req.json()?;
    let body = serde_json::to_vec(&User { id: "99".into(), name: new.name })?;
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(body))
}

// DELETE /admin/users/:id
async fn delete_user(_req: Request) -> StatusCode {
    StatusCode::NO_CONTENT
}
