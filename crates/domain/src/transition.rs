//! Data-driven state transitions.
//!
//! Each aggregate declares, per `(state, command type)`, either the events the
//! command produces together with the state they must lead to, or a fixed
//! rejection. Anything not in the table is rejected.

use std::collections::HashMap;

use crate::aggregate::{Aggregate, DomainCommand};
use crate::error::DomainError;

/// Produces the events for an accepted command.
pub type EventFactory<A> =
    fn(&A, &<A as Aggregate>::Command) -> Vec<<A as Aggregate>::Event>;

/// A single table entry.
pub enum Transition<A: Aggregate> {
    /// Accept the command; the emitted events must leave the aggregate in `next`.
    Emit {
        next: A::Tag,
        emit: EventFactory<A>,
    },
    /// Reject the command with a fixed reason.
    Reject(&'static str),
}

/// The outcome of deciding a command against a state.
#[derive(Debug)]
pub struct Decision<A: Aggregate> {
    /// The state after folding `events`.
    pub aggregate: A,
    /// Events to append, in order.
    pub events: Vec<A::Event>,
}

/// Transition table keyed by `(state, command type)`.
pub struct TransitionTable<A: Aggregate> {
    rules: HashMap<A::Tag, HashMap<&'static str, Transition<A>>>,
}

impl<A: Aggregate> Default for TransitionTable<A> {
    fn default() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }
}

impl<A: Aggregate> TransitionTable<A> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts `command_type` in `state`, emitting `emit`'s events and moving to `next`.
    pub fn on(
        mut self,
        state: A::Tag,
        command_type: &'static str,
        next: A::Tag,
        emit: EventFactory<A>,
    ) -> Self {
        self.rules
            .entry(state)
            .or_default()
            .insert(command_type, Transition::Emit { next, emit });
        self
    }

    /// Rejects `command_type` in `state` with `reason`.
    pub fn reject(mut self, state: A::Tag, command_type: &'static str, reason: &'static str) -> Self {
        self.rules
            .entry(state)
            .or_default()
            .insert(command_type, Transition::Reject(reason));
        self
    }

    /// Looks up the entry for a state and command type.
    pub fn rule(&self, state: A::Tag, command_type: &str) -> Option<&Transition<A>> {
        self.rules.get(&state)?.get(command_type)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.rules.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decides `command` against `aggregate`.
    ///
    /// The returned aggregate is `aggregate` with every emitted event folded
    /// in; nothing is persisted here.
    pub fn decide(&self, aggregate: &A, command: &A::Command) -> Result<Decision<A>, DomainError> {
        let state = aggregate.tag();
        let command_type = command.command_type();

        match self.rule(state, command_type) {
            Some(Transition::Emit { next, emit }) => {
                let events = emit(aggregate, command);
                let folded = events
                    .iter()
                    .fold(aggregate.clone(), |acc, event| acc.apply(event));

                if folded.tag() != *next {
                    return Err(DomainError::InvariantViolation(format!(
                        "{command_type} in {state} should lead to {next}, but events led to {}",
                        folded.tag()
                    )));
                }

                Ok(Decision {
                    aggregate: folded,
                    events,
                })
            }
            Some(Transition::Reject(reason)) => {
                Err(DomainError::DomainRuleViolation((*reason).to_string()))
            }
            None if state == A::initial_tag() => {
                Err(DomainError::UnknownAggregate(aggregate.id().clone()))
            }
            None => Err(DomainError::DomainRuleViolation(format!(
                "{command_type} not allowed while {state}"
            ))),
        }
    }
}
