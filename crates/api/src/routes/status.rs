//! Read-model queries.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use event_store::EventStore;
use projections::{BikeStatus, RenterSummary};

use super::bikes::{AppState, parse_bike_id};
use crate::error::ApiError;

/// GET /status: every bike's projected status, ordered by id.
#[tracing::instrument(skip(state))]
pub async fn list<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<BikeStatus>>, ApiError> {
    Ok(Json(state.bike_status.list_all().await?))
}

/// GET /status/{id}: one bike's projected status.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BikeStatus>, ApiError> {
    let bike_id = parse_bike_id(&id)?;

    state
        .bike_status
        .get_by_id(&bike_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Bike {id} not found")))
}

/// GET /renters: rental activity per renter.
#[tracing::instrument(skip(state))]
pub async fn renters<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<Vec<RenterSummary>> {
    Json(state.renter_ledger.all_renters().await)
}

/// GET /renters/{renter}
pub async fn renter<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(renter): Path<String>,
) -> Result<Json<RenterSummary>, ApiError> {
    state
        .renter_ledger
        .get_renter(&renter)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Renter {renter} not found")))
}
