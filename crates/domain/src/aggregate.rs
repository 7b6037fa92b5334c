//! Core aggregate and domain event traits.

use std::fmt::{Debug, Display};
use std::hash::Hash;

use common::AggregateId;
use event_store::{EventEnvelope, EventStore, Sequence};
use futures_util::TryStreamExt;
use serde_json::Value;

use crate::error::DomainError;
use crate::transition::TransitionTable;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Debug + Clone + Send + Sync + 'static {
    /// Returns the event type name.
    ///
    /// This is the type tag written to the log and used by readers to decode
    /// the payload.
    fn event_type(&self) -> &'static str;

    /// Serializes the event body into the stored payload.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;

    /// Decodes a stored event.
    ///
    /// Returns `Ok(None)` for event types this aggregate does not know, so
    /// older code can replay streams written by newer code.
    fn from_stored(event_type: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error>;
}

/// Trait for commands accepted by an aggregate.
///
/// Commands represent an intention to perform an action. They may be rejected
/// if the aggregate's current state doesn't allow the action.
pub trait DomainCommand: Debug + Clone + Send + Sync + 'static {
    /// Returns the command type name used to look up transitions.
    fn command_type(&self) -> &'static str;

    /// Builds a command from its wire form.
    fn parse(command_type: &str, payload: Value) -> Result<Self, DomainError>;

    /// Checks the command's own fields, independent of aggregate state.
    fn validate(&self) -> Result<(), DomainError> {
        Ok(())
    }
}

/// Trait for aggregates in an event-sourced system.
///
/// An aggregate's state is never stored: it is always the fold of its event
/// stream through [`Aggregate::apply`], starting from [`Aggregate::initial`].
/// Which commands are accepted in which state is described by the
/// aggregate's [`TransitionTable`].
pub trait Aggregate: Debug + Clone + Send + Sync + Sized + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of commands this aggregate accepts.
    type Command: DomainCommand;

    /// The lifecycle state used as the transition table key.
    type Tag: Debug + Display + Copy + Eq + Hash + Send + Sync + 'static;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// The state of an identity that has no events yet.
    fn initial(id: AggregateId) -> Self;

    /// The tag of [`Aggregate::initial`].
    fn initial_tag() -> Self::Tag;

    /// Returns the aggregate's identity.
    fn id(&self) -> &AggregateId;

    /// Returns the current lifecycle state.
    fn tag(&self) -> Self::Tag;

    /// Folds one event into the state.
    ///
    /// Must be pure and total: events are facts, so this never fails.
    fn apply(self, event: &Self::Event) -> Self;

    /// The transition table for this aggregate.
    fn transitions() -> &'static TransitionTable<Self>;

    /// Returns true once at least one event has been applied.
    fn exists(&self) -> bool {
        self.tag() != Self::initial_tag()
    }
}

/// An aggregate rebuilt from its stream, with the sequence it was read at.
#[derive(Debug, Clone)]
pub struct Replayed<A> {
    pub aggregate: A,
    pub sequence: Sequence,
}

impl<A: Aggregate> Replayed<A> {
    fn empty(id: AggregateId) -> Self {
        Self {
            aggregate: A::initial(id),
            sequence: Sequence::NONE,
        }
    }

    fn push(self, envelope: &EventEnvelope) -> Result<Self, DomainError> {
        let expected = self.sequence.next();
        if envelope.sequence != expected {
            return Err(DomainError::InvariantViolation(format!(
                "stream {} skipped from {} to {}",
                envelope.aggregate_id, self.sequence, envelope.sequence
            )));
        }

        let aggregate = match A::Event::from_stored(&envelope.event_type, &envelope.payload)? {
            Some(event) => self.aggregate.apply(&event),
            None => {
                tracing::debug!(
                    event_type = %envelope.event_type,
                    aggregate_id = %envelope.aggregate_id,
                    "Skipping unknown event type during replay"
                );
                self.aggregate
            }
        };

        Ok(Self {
            aggregate,
            sequence: envelope.sequence,
        })
    }
}

/// Rebuilds an aggregate from already loaded envelopes.
///
/// The same envelopes always produce the same state.
pub fn replay<'a, A, I>(id: AggregateId, envelopes: I) -> Result<Replayed<A>, DomainError>
where
    A: Aggregate,
    I: IntoIterator<Item = &'a EventEnvelope>,
{
    envelopes
        .into_iter()
        .try_fold(Replayed::empty(id), |state, envelope| state.push(envelope))
}

/// Rebuilds an aggregate by streaming its events from the store.
pub async fn rehydrate<A, S>(store: &S, id: &AggregateId) -> Result<Replayed<A>, DomainError>
where
    A: Aggregate,
    S: EventStore + ?Sized,
{
    let mut stream = store.load(id).await?;
    let mut state = Replayed::empty(id.clone());
    while let Some(envelope) = stream.try_next().await? {
        state = state.push(&envelope)?;
    }
    Ok(state)
}
