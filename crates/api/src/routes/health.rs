//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::Serialize;

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub projections: Vec<&'static str>,
    pub pending_events: usize,
}

/// GET /health: liveness plus the projection backlog.
pub async fn check<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        projections: state.publisher.projection_names(),
        pending_events: state.publisher.pending(),
    })
}
