//! Domain error types.

use common::AggregateId;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur while handling a command.
///
/// Every failure a caller can observe from the command path is one of these;
/// none of them escape as panics.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The command is not allowed by the aggregate's current state.
    /// Reported verbatim and never retried.
    #[error("Domain rule violation: {0}")]
    DomainRuleViolation(String),

    /// The target aggregate has not been created yet.
    #[error("Unknown aggregate: {0}")]
    UnknownAggregate(AggregateId),

    /// The stream kept moving under us; the bounded retry budget is spent.
    #[error("Concurrency conflict on aggregate {aggregate_id} after {attempts} attempt(s)")]
    ConcurrencyConflict {
        aggregate_id: AggregateId,
        attempts: u32,
    },

    /// The event log could not be reached or failed mid-operation.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] EventStoreError),

    /// No result arrived in time and the log shows no committed events for the command.
    #[error("Command {correlation_id} timed out")]
    Timeout { correlation_id: String },

    /// The execution task ended without reporting, and nothing was committed.
    #[error("Command {correlation_id} was aborted before completing")]
    Aborted { correlation_id: String },

    /// The command could not be parsed or failed input validation.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The transition table or stored stream broke one of the runtime's invariants.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if the caller may resubmit the whole command.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DomainError::ConcurrencyConflict { .. }
                | DomainError::StorageUnavailable(_)
                | DomainError::Timeout { .. }
        )
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::DomainRuleViolation(_) => "rule_violation",
            DomainError::UnknownAggregate(_) => "unknown_aggregate",
            DomainError::ConcurrencyConflict { .. } => "conflict",
            DomainError::StorageUnavailable(_) => "storage_unavailable",
            DomainError::Timeout { .. } => "timeout",
            DomainError::Aborted { .. } => "aborted",
            DomainError::InvalidCommand(_) => "invalid_command",
            DomainError::InvariantViolation(_) => "invariant_violation",
            DomainError::Serialization(_) => "serialization",
        }
    }
}

impl From<EventStoreError> for DomainError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict { aggregate_id, .. } => {
                DomainError::ConcurrencyConflict {
                    aggregate_id,
                    attempts: 1,
                }
            }
            other => DomainError::StorageUnavailable(other),
        }
    }
}
