//! Bike provisioning and rental endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::SecondsFormat;
use common::AggregateId;
use domain::{Aggregate, Bike, BikeService, CommandOutcome, Replayed};
use event_store::{EventEnvelope, EventQuery, EventStore};
use projections::{
    BikeStatusProjection, InMemoryBikeStatusRepository, ProjectionPublisher, RenterLedgerView,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub bike_service: BikeService<S>,
    pub bike_status: BikeStatusProjection<InMemoryBikeStatusRepository>,
    pub renter_ledger: RenterLedgerView,
    pub publisher: Arc<ProjectionPublisher>,
}

impl<S: EventStore + 'static> AppState<S> {
    /// The event log behind the command router.
    pub fn event_store(&self) -> &S {
        self.bike_service.router().store()
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct ProvisionRequest {
    pub location: String,
    pub id: Option<String>,
}

#[derive(Deserialize)]
pub struct RentRequest {
    pub renter: String,
}

#[derive(Deserialize)]
pub struct ReturnRequest {
    pub location: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct BikeCreatedResponse {
    pub id: String,
    pub state: String,
    pub location: String,
}

#[derive(Serialize)]
pub struct BikeResponse {
    pub status: &'static str,
    pub id: String,
    pub state: String,
    pub location: Option<String>,
    pub renter: Option<String>,
    pub sequence: i64,
}

impl BikeResponse {
    fn from_bike(bike: &Bike, sequence: i64) -> Self {
        Self {
            status: "ok",
            id: bike.id().to_string(),
            state: bike.state().to_string(),
            location: bike.location().map(String::from),
            renter: bike.renter().map(String::from),
            sequence,
        }
    }
}

impl From<CommandOutcome<Bike>> for BikeResponse {
    fn from(outcome: CommandOutcome<Bike>) -> Self {
        Self::from_bike(&outcome.aggregate, outcome.sequence.as_i64())
    }
}

/// Response type for event envelope data.
#[derive(Serialize)]
pub struct EventEnvelopeResponse {
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    pub sequence: i64,
    pub timestamp: String,
    pub payload: serde_json::Value,
    pub correlation_id: Option<String>,
}

impl From<EventEnvelope> for EventEnvelopeResponse {
    fn from(event: EventEnvelope) -> Self {
        Self {
            correlation_id: event.correlation_id().map(String::from),
            event_id: event.event_id.to_string(),
            event_type: event.event_type,
            aggregate_id: event.aggregate_id.to_string(),
            sequence: event.sequence.as_i64(),
            timestamp: event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            payload: event.payload,
        }
    }
}

/// POST /bikes: provision a bike, optionally under a caller-chosen id.
#[tracing::instrument(skip(state, req))]
pub async fn provision<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<BikeCreatedResponse>), ApiError> {
    let outcome = match req.id {
        Some(id) => {
            let bike_id = parse_bike_id(&id)?;
            state
                .bike_service
                .provision_with_id(bike_id, &req.location)
                .await?
        }
        None => state.bike_service.provision(&req.location).await?,
    };

    Ok((
        StatusCode::CREATED,
        Json(BikeCreatedResponse {
            id: outcome.aggregate_id.to_string(),
            state: outcome.aggregate.state().to_string(),
            location: req.location,
        }),
    ))
}

/// GET /bikes/{id}: current aggregate state, rebuilt from the log.
#[tracing::instrument(skip(state))]
pub async fn get<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<BikeResponse>, ApiError> {
    let bike_id = parse_bike_id(&id)?;

    let Replayed {
        aggregate: bike,
        sequence,
    } = state
        .bike_service
        .router()
        .load_replayed(&bike_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Bike {id} not found")))?;

    Ok(Json(BikeResponse::from_bike(&bike, sequence.as_i64())))
}

/// POST /bikes/{id}/rent: rent a bike out.
#[tracing::instrument(skip(state, req))]
pub async fn rent<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<RentRequest>,
) -> Result<Json<BikeResponse>, ApiError> {
    let bike_id = parse_bike_id(&id)?;
    let outcome = state.bike_service.rent_out(bike_id, &req.renter).await?;
    Ok(Json(outcome.into()))
}

/// POST /bikes/{id}/return: return a rented bike.
#[tracing::instrument(skip(state, req))]
pub async fn return_bike<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<ReturnRequest>,
) -> Result<Json<BikeResponse>, ApiError> {
    let bike_id = parse_bike_id(&id)?;
    let outcome = state
        .bike_service
        .return_bike(bike_id, &req.location)
        .await?;
    Ok(Json(outcome.into()))
}

/// GET /bikes/{id}/events: the bike's event stream in sequence order.
#[tracing::instrument(skip(state))]
pub async fn events<S: EventStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EventEnvelopeResponse>>, ApiError> {
    let bike_id = parse_bike_id(&id)?;

    let envelopes = state
        .event_store()
        .query_events(EventQuery::for_aggregate(bike_id))
        .await?;

    Ok(Json(envelopes.into_iter().map(Into::into).collect()))
}

pub(crate) fn parse_bike_id(id: &str) -> Result<AggregateId, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("Bike id must not be blank".to_string()));
    }
    Ok(AggregateId::from(id))
}
