//! Built-in routes served by the binary

use anyhow::{bail, Result};
use pconn_routing::RouteConfigError;
use pconn_session::Server;
use pconn_wire::{Request, Response};
use std::time::Duration;

/// Register the demo routes
pub fn register(server: &mut Server) -> Result<(), RouteConfigError> {
    server
        .register("hello", hello, ["GET"])?
        .register("echo/:message", echo, ["GET", "POST"])?
        .register("entity/:id/data", entity_data, ["GET"])?
        .register("sleep/:millis", sleep, ["GET"])?;
    Ok(())
}

async fn hello(_request: Request) -> Result<Response> {
    Ok(Response::ok("hello world"))
}

/// POST echoes the payload, GET echoes the path segment
async fn echo(request: Request) -> Result<Response> {
    let body = if request.method.eq_ignore_ascii_case("POST") && !request.payload.is_empty() {
        request.payload.clone()
    } else {
        request.param("message").unwrap_or_default().to_string()
    };
    Ok(Response::ok(body).with_header("Content-Type", "text/plain"))
}

async fn entity_data(request: Request) -> Result<Response> {
    let id = request.param("id").unwrap_or_default();
    let body = serde_json::json!({
        "id": id,
        "user": request.session.user,
        "app": request.namespace.app,
        "query": request.query,
    });
    Ok(Response::ok(body.to_string()).with_header("Content-Type", "application/json"))
}

/// Waits before answering; exercises out-of-order completion
async fn sleep(request: Request) -> Result<Response> {
    let millis: u64 = match request.param("millis").map(str::parse) {
        Some(Ok(millis)) => millis,
        _ => bail!("invalid sleep duration"),
    };
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Ok(Response::ok(format!("slept {}ms", millis)))
}
