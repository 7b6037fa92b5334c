//! HTTP API server for the bike rental service.
//!
//! Provides REST endpoints for provisioning and renting bikes, generic command
//! submission, and read-model queries, with structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{Bike, BikeService, CommandRouter, RouterConfig};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{
    BikeStatusProjection, InMemoryBikeStatusRepository, Projection, ProjectionPublisher,
    PublisherConfig, RenterLedgerView,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;
use routes::metrics::MetricsState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(MetricsState {
            handle: metrics_handle,
            publisher: state.publisher.clone(),
        });

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/bikes", post(routes::bikes::provision::<S>))
        .route("/bikes/{id}", get(routes::bikes::get::<S>))
        .route("/bikes/{id}/rent", post(routes::bikes::rent::<S>))
        .route("/bikes/{id}/return", post(routes::bikes::return_bike::<S>))
        .route("/bikes/{id}/events", get(routes::bikes::events::<S>))
        .route("/commands", post(routes::commands::submit::<S>))
        .route("/status", get(routes::status::list::<S>))
        .route("/status/{id}", get(routes::status::get::<S>))
        .route("/renters", get(routes::status::renters::<S>))
        .route("/renters/{renter}", get(routes::status::renter::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the command router, projection publisher, and read models over
/// `event_store`.
///
/// Must be called from within a Tokio runtime: the publisher spawns one
/// worker per projection.
pub fn create_state<S: EventStore + 'static>(
    event_store: S,
    router_config: RouterConfig,
    publisher_config: PublisherConfig,
) -> Arc<AppState<S>> {
    let bike_status = BikeStatusProjection::new(Arc::new(InMemoryBikeStatusRepository::new()));
    let renter_ledger = RenterLedgerView::new();

    let projections: Vec<Arc<dyn Projection>> = vec![
        Arc::new(bike_status.clone()),
        Arc::new(renter_ledger.clone()),
    ];
    let publisher = Arc::new(ProjectionPublisher::start(publisher_config, projections));

    let router: CommandRouter<S, Bike> =
        CommandRouter::with_parts(event_store, publisher.clone(), router_config);

    Arc::new(AppState {
        bike_service: BikeService::with_router(router),
        bike_status,
        renter_ledger,
        publisher,
    })
}

/// Creates the application state with default router and publisher settings.
pub fn create_default_state<S: EventStore + 'static>(event_store: S) -> Arc<AppState<S>> {
    create_state(
        event_store,
        RouterConfig::default(),
        PublisherConfig::default(),
    )
}
