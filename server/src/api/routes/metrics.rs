//! Prometheus metrics endpoint

use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::core::metrics;

/// Render all registered metrics in Prometheus textual format.
pub async fn metrics() -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        metrics::render(),
    )
}
