//! Generic command submission.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use event_store::EventStore;
use serde::{Deserialize, Serialize};

use super::bikes::{AppState, EventEnvelopeResponse, parse_bike_id};
use crate::error::ApiError;

/// A command in wire form, e.g. `{"type": "RentOut", "target_id": "b1", "payload": {"renter": "alice"}}`.
#[derive(Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    pub command_type: String,
    pub target_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub status: &'static str,
    pub correlation_id: String,
    pub aggregate_id: String,
    pub state: String,
    pub sequence: i64,
    pub events: Vec<EventEnvelopeResponse>,
}

/// POST /commands: submit any bike command and wait for its outcome.
#[tracing::instrument(skip(state, req))]
pub async fn submit<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let target = req.target_id.as_deref().map(parse_bike_id).transpose()?;

    let outcome = state
        .bike_service
        .router()
        .submit_raw(&req.command_type, target, req.payload)?
        .wait()
        .await?;

    Ok(Json(CommandResponse {
        status: "ok",
        correlation_id: outcome.correlation_id,
        aggregate_id: outcome.aggregate_id.to_string(),
        state: outcome.aggregate.state().to_string(),
        sequence: outcome.sequence.as_i64(),
        events: outcome.events.into_iter().map(Into::into).collect(),
    }))
}
