//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use event_store::EventStoreError;
use projections::ProjectionError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),

    /// Bad request from the client.
    #[error("{0}")]
    BadRequest(String),

    /// Command was rejected or could not be executed.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Read model could not be queried.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Event log could not be queried.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Domain(err) => domain_status(err),
            ApiError::Projection(ProjectionError::StoreUnavailable(_))
            | ApiError::Projection(ProjectionError::EventStore(_))
            | ApiError::EventStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Projection(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn retryable(&self) -> bool {
        match self {
            ApiError::Domain(err) => err.is_retryable(),
            ApiError::Projection(err) => err.is_transient(),
            ApiError::EventStore(_) => true,
            ApiError::NotFound(_) | ApiError::BadRequest(_) => false,
        }
    }
}

fn domain_status(err: &DomainError) -> StatusCode {
    match err {
        DomainError::DomainRuleViolation(_) | DomainError::ConcurrencyConflict { .. } => {
            StatusCode::CONFLICT
        }
        DomainError::UnknownAggregate(_) => StatusCode::NOT_FOUND,
        DomainError::InvalidCommand(_) => StatusCode::BAD_REQUEST,
        DomainError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DomainError::Aborted { .. }
        | DomainError::InvariantViolation(_)
        | DomainError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "retryable": self.retryable(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;

    #[test]
    fn test_domain_errors_map_to_status_codes() {
        let cases = [
            (
                DomainError::DomainRuleViolation("already rented".into()),
                StatusCode::CONFLICT,
            ),
            (
                DomainError::UnknownAggregate(AggregateId::from("bike-9")),
                StatusCode::NOT_FOUND,
            ),
            (
                DomainError::ConcurrencyConflict {
                    aggregate_id: AggregateId::from("bike-1"),
                    attempts: 3,
                },
                StatusCode::CONFLICT,
            ),
            (
                DomainError::StorageUnavailable(EventStoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                DomainError::Timeout {
                    correlation_id: "c-1".into(),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                DomainError::InvalidCommand("location must not be blank".into()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_conflict_is_retryable_rule_violation_is_not() {
        let conflict = ApiError::from(DomainError::ConcurrencyConflict {
            aggregate_id: AggregateId::from("bike-1"),
            attempts: 3,
        });
        let rule = ApiError::from(DomainError::DomainRuleViolation("already rented".into()));

        assert!(conflict.retryable());
        assert!(!rule.retryable());
    }

    #[tokio::test]
    async fn test_response_body_carries_error_and_retryable() {
        let response =
            ApiError::from(DomainError::DomainRuleViolation("not currently rented".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["retryable"], false);
        assert!(json["error"].as_str().unwrap().contains("not currently rented"));
    }
}
