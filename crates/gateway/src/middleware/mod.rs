//! Request metrics middleware

use axum::{extract::Request, middleware::Next, response::Response};
use sdsforge_common::metrics::RequestMetrics;
use tracing::debug;

/// Count and time every request by method, path and status
pub async fn track_metrics(request: Request, next: Next) -> Response {
    let metrics = RequestMetrics::start(request.method().as_str(), request.uri().path());

    let response = next.run(request).await;

    let status = response.status().as_u16();
    debug!(status, "Request finished");
    metrics.finish(status);
    response
}
