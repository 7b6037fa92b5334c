//! Prometheus metrics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::ProjectionPublisher;

/// State for the metrics router, kept apart from the generic app state.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: PrometheusHandle,
    pub publisher: Arc<ProjectionPublisher>,
}

/// GET /metrics: Prometheus text exposition.
pub async fn get(State(exporter): State<MetricsState>) -> impl IntoResponse {
    metrics::gauge!("projection_pending_events").set(exporter.publisher.pending() as f64);

    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        exporter.handle.render(),
    )
}
