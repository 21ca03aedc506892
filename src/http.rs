//! Liveness endpoint for deploy probes.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::info;

async fn uptime() -> &'static str {
    "OK"
}

/// Access log for the HTTP surface. The uptime probe itself is skipped
/// so periodic health checks do not flood the audit log.
async fn access_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    if path != "/api/uptime" {
        info!(
            %method,
            path,
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "http request"
        );
    }
    response
}

pub fn uptime_routes() -> Router {
    Router::new()
        .route("/api/uptime", get(uptime))
        .layer(middleware::from_fn(access_log))
}
