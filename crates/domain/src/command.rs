//! Command envelopes and results.

use common::AggregateId;
use event_store::{EventEnvelope, Sequence};
use serde_json::Value;
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainCommand};
use crate::error::DomainError;

/// A command addressed to one aggregate identity.
#[derive(Debug, Clone)]
pub struct Command<C> {
    /// The aggregate the command targets.
    pub target: AggregateId,

    /// Stamped on every event the command appends.
    pub correlation_id: String,

    pub body: C,
}

impl<C: DomainCommand> Command<C> {
    /// Creates a command with a fresh correlation id.
    pub fn new(target: AggregateId, body: C) -> Self {
        Self {
            target,
            correlation_id: Uuid::new_v4().to_string(),
            body,
        }
    }

    /// Replaces the generated correlation id.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Builds a command from its wire form.
    ///
    /// A missing target gets a generated identity, which is how new
    /// aggregates are created.
    pub fn parse(
        command_type: &str,
        target: Option<AggregateId>,
        payload: Value,
    ) -> Result<Self, DomainError> {
        let body = C::parse(command_type, payload)?;
        Ok(Self::new(target.unwrap_or_default(), body))
    }

    pub fn command_type(&self) -> &'static str {
        self.body.command_type()
    }
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandOutcome<A: Aggregate> {
    pub aggregate_id: AggregateId,

    pub correlation_id: String,

    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were appended, as committed.
    pub events: Vec<EventEnvelope>,

    /// The stream's sequence after the command.
    pub sequence: Sequence,
}
