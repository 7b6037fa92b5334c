//! Command routing.
//!
//! The router owns the write path: rebuild the target aggregate from its
//! stream, decide the command against the transition table, append with the
//! sequence that was read, then hand the committed events to the publisher.
//! Commands for the same identity run one at a time; different identities
//! run in parallel.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::AggregateId;
use dashmap::DashMap;
use event_store::{
    COMMAND_TYPE_KEY, CORRELATION_ID_KEY, EventEnvelope, EventPublisher, EventStore,
    EventStoreExt, NewEvent, NoopPublisher,
};
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};
use tracing::Instrument;

use crate::aggregate::{Aggregate, DomainCommand, DomainEvent, Replayed, rehydrate, replay};
use crate::command::{Command, CommandOutcome};
use crate::error::DomainError;
use crate::transition::Decision;

/// Router tuning.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Attempts per command before a conflict is reported to the caller.
    pub max_attempts: u32,

    /// How long [`CommandHandle::wait`] waits before reconciling.
    pub submit_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            submit_timeout: Duration::from_secs(5),
        }
    }
}

type IdentityLocks = DashMap<AggregateId, Arc<Mutex<()>>>;

/// Routes commands to aggregates of type `A` stored in `S`.
///
/// Cheap to clone; clones share the store, publisher, and identity locks.
pub struct CommandRouter<S, A> {
    inner: Arc<RouterInner<S, A>>,
}

struct RouterInner<S, A> {
    store: S,
    publisher: Arc<dyn EventPublisher>,
    locks: IdentityLocks,
    config: RouterConfig,
    _aggregate: PhantomData<fn() -> A>,
}

impl<S, A> Clone for CommandRouter<S, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Holds an identity's lock entry and drops it from the map when unused.
struct IdentitySlot<'a> {
    locks: &'a IdentityLocks,
    id: &'a AggregateId,
    mutex: Arc<Mutex<()>>,
}

impl<'a> IdentitySlot<'a> {
    fn acquire(locks: &'a IdentityLocks, id: &'a AggregateId) -> Self {
        let mutex = locks.entry(id.clone()).or_default().value().clone();
        Self { locks, id, mutex }
    }
}

impl Drop for IdentitySlot<'_> {
    fn drop(&mut self) {
        // One reference in the map plus ours: nobody else holds or waits on it.
        self.locks
            .remove_if(self.id, |_, mutex| Arc::strong_count(mutex) == 2);
    }
}

impl<S, A> CommandRouter<S, A>
where
    S: EventStore + 'static,
    A: Aggregate,
{
    /// Creates a router with no publisher and default settings.
    pub fn new(store: S) -> Self {
        Self::with_parts(store, Arc::new(NoopPublisher), RouterConfig::default())
    }

    pub fn with_parts(store: S, publisher: Arc<dyn EventPublisher>, config: RouterConfig) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                store,
                publisher,
                locks: DashMap::new(),
                config,
                _aggregate: PhantomData,
            }),
        }
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Number of identities with a command running or queued.
    pub fn active_identities(&self) -> usize {
        self.inner.locks.len()
    }

    /// Loads an aggregate's current state, or `None` if it has no events.
    pub async fn load(&self, aggregate_id: &AggregateId) -> Result<Option<A>, DomainError> {
        let replayed = self.load_replayed(aggregate_id).await?;
        Ok(replayed.map(|replayed| replayed.aggregate))
    }

    /// Like [`CommandRouter::load`], keeping the sequence the state was
    /// rebuilt at.
    pub async fn load_replayed(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Option<Replayed<A>>, DomainError> {
        let replayed = rehydrate::<A, S>(&self.inner.store, aggregate_id).await?;
        Ok((!replayed.sequence.is_none()).then_some(replayed))
    }

    /// Runs a command to completion on the caller's task.
    ///
    /// Dropping the returned future after the append commits skips the
    /// publish; use [`CommandRouter::submit`] when the caller may give up early.
    #[tracing::instrument(
        skip(self, command),
        fields(
            aggregate_id = %command.target,
            correlation_id = %command.correlation_id,
            command = command.command_type(),
        )
    )]
    pub async fn execute(
        &self,
        command: Command<A::Command>,
    ) -> Result<CommandOutcome<A>, DomainError> {
        let started = Instant::now();
        let command_type = command.command_type();

        let result = self.execute_exclusive(&command).await;

        let outcome = match &result {
            Ok(outcome) => {
                tracing::info!(
                    sequence = %outcome.sequence,
                    events = outcome.events.len(),
                    "Command applied"
                );
                "ok"
            }
            Err(err) => {
                tracing::warn!(error = %err, "Command rejected");
                err.kind()
            }
        };
        metrics::counter!("commands_total", "command" => command_type, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("command_duration_seconds", "command" => command_type)
            .record(started.elapsed().as_secs_f64());

        result
    }

    /// Starts a command on its own task and returns a handle to its result.
    ///
    /// The command keeps running if the handle is dropped or times out.
    pub fn submit(&self, command: Command<A::Command>) -> CommandHandle<S, A> {
        let (sender, receiver) = oneshot::channel();
        let handle = CommandHandle {
            aggregate_id: command.target.clone(),
            correlation_id: command.correlation_id.clone(),
            slot: Slot::Pending(receiver),
            router: self.clone(),
        };

        let router = self.clone();
        tokio::spawn(
            async move {
                let result = router.execute(command).await;
                if sender.send(result).is_err() {
                    tracing::debug!("Command handle dropped before the result arrived");
                }
            }
            .in_current_span(),
        );

        handle
    }

    /// Parses a wire-level command and submits it.
    pub fn submit_raw(
        &self,
        command_type: &str,
        target: Option<AggregateId>,
        payload: Value,
    ) -> Result<CommandHandle<S, A>, DomainError> {
        let command = Command::parse(command_type, target, payload)?;
        Ok(self.submit(command))
    }

    /// Looks up what a command committed, from the log alone.
    ///
    /// Returns `None` if no event carries the correlation id. The aggregate in
    /// the outcome is the state as of the command's last event.
    pub async fn reconcile(
        &self,
        aggregate_id: &AggregateId,
        correlation_id: &str,
    ) -> Result<Option<CommandOutcome<A>>, DomainError> {
        let history = self.inner.store.load_all(aggregate_id).await?;
        let events: Vec<EventEnvelope> = history
            .iter()
            .filter(|event| event.correlation_id() == Some(correlation_id))
            .cloned()
            .collect();

        let Some(sequence) = events.last().map(|event| event.sequence) else {
            return Ok(None);
        };
        let replayed = replay::<A, _>(
            aggregate_id.clone(),
            history.iter().take_while(|event| event.sequence <= sequence),
        )?;

        Ok(Some(CommandOutcome {
            aggregate_id: aggregate_id.clone(),
            correlation_id: correlation_id.to_string(),
            aggregate: replayed.aggregate,
            events,
            sequence,
        }))
    }

    async fn execute_exclusive(
        &self,
        command: &Command<A::Command>,
    ) -> Result<CommandOutcome<A>, DomainError> {
        command.body.validate()?;

        let slot = IdentitySlot::acquire(&self.inner.locks, &command.target);
        let _guard = slot.mutex.lock().await;

        let max_attempts = self.inner.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.run_cycle(command).await {
                Err(DomainError::ConcurrencyConflict { aggregate_id, .. }) => {
                    metrics::counter!("command_conflicts_total").increment(1);
                    if attempt >= max_attempts {
                        return Err(DomainError::ConcurrencyConflict {
                            aggregate_id,
                            attempts: attempt,
                        });
                    }
                    tracing::debug!(attempt, "Concurrency conflict, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One load, decide, append, publish cycle.
    async fn run_cycle(
        &self,
        command: &Command<A::Command>,
    ) -> Result<CommandOutcome<A>, DomainError> {
        let store = &self.inner.store;
        let Replayed {
            aggregate,
            sequence,
        } = rehydrate::<A, S>(store, &command.target).await?;
        let Decision { aggregate, events } = A::transitions().decide(&aggregate, &command.body)?;

        if events.is_empty() {
            return Ok(CommandOutcome {
                aggregate_id: command.target.clone(),
                correlation_id: command.correlation_id.clone(),
                aggregate,
                events: Vec::new(),
                sequence,
            });
        }

        let new_events = events
            .iter()
            .map(|event| Self::stamp(command, event))
            .collect::<Result<Vec<_>, _>>()?;
        let committed = store.append(&command.target, sequence, new_events).await?;
        metrics::counter!("events_appended_total").increment(committed.len() as u64);
        let sequence = committed.last().map_or(sequence, |event| event.sequence);

        // Still under the identity lock, so publish order follows append order.
        self.inner.publisher.publish(&committed).await;

        Ok(CommandOutcome {
            aggregate_id: command.target.clone(),
            correlation_id: command.correlation_id.clone(),
            aggregate,
            events: committed,
            sequence,
        })
    }

    fn stamp(command: &Command<A::Command>, event: &A::Event) -> Result<NewEvent, DomainError> {
        Ok(
            NewEvent::new(A::aggregate_type(), event.event_type(), event.to_payload()?)
                .with_metadata(
                    CORRELATION_ID_KEY,
                    Value::String(command.correlation_id.clone()),
                )
                .with_metadata(
                    COMMAND_TYPE_KEY,
                    Value::String(command.command_type().to_string()),
                ),
        )
    }
}

/// What a submitted command resolves to.
pub type CommandResult<A> = Result<CommandOutcome<A>, DomainError>;

enum Slot<A: Aggregate> {
    Pending(oneshot::Receiver<CommandResult<A>>),
    Received(CommandResult<A>),
    /// The command task ended without sending; pollers see `Aborted`.
    Lost(CommandResult<A>),
}

/// A submitted command whose result may not be known yet.
///
/// Poll with [`CommandHandle::try_result`] or await with
/// [`CommandHandle::wait`]; both can be mixed and keep reporting the same
/// result once it has arrived.
pub struct CommandHandle<S, A: Aggregate> {
    aggregate_id: AggregateId,
    correlation_id: String,
    slot: Slot<A>,
    router: CommandRouter<S, A>,
}

impl<S, A> CommandHandle<S, A>
where
    S: EventStore + 'static,
    A: Aggregate,
{
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn aggregate_id(&self) -> &AggregateId {
        &self.aggregate_id
    }

    /// Returns the result if the command has finished, without waiting.
    ///
    /// If the command task vanished without a result this reports `Aborted`;
    /// [`CommandHandle::wait`] still checks the log in that case.
    pub fn try_result(&mut self) -> Option<&CommandResult<A>> {
        if let Slot::Pending(receiver) = &mut self.slot {
            let received = match receiver.try_recv() {
                Ok(result) => Slot::Received(result),
                Err(oneshot::error::TryRecvError::Empty) => return None,
                Err(oneshot::error::TryRecvError::Closed) => {
                    Slot::Lost(Err(DomainError::Aborted {
                        correlation_id: self.correlation_id.clone(),
                    }))
                }
            };
            self.slot = received;
        }

        match &self.slot {
            Slot::Received(result) | Slot::Lost(result) => Some(result),
            Slot::Pending(_) => None,
        }
    }

    /// Waits for the result using the router's configured timeout.
    pub async fn wait(self) -> CommandResult<A> {
        let timeout = self.router.config().submit_timeout;
        self.wait_for(timeout).await
    }

    /// Waits up to `timeout` for the result.
    ///
    /// If nothing arrives in time the log is checked for events carrying this
    /// command's correlation id; only when there are none is the command
    /// reported as timed out.
    pub async fn wait_for(self, timeout: Duration) -> CommandResult<A> {
        let CommandHandle {
            aggregate_id,
            correlation_id,
            slot,
            router,
        } = self;

        let receiver = match slot {
            Slot::Received(result) => return result,
            Slot::Lost(_) => {
                return Self::recover(&router, &aggregate_id, correlation_id).await;
            }
            Slot::Pending(receiver) => receiver,
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Self::recover(&router, &aggregate_id, correlation_id).await,
            Err(_) => {
                tracing::warn!(%correlation_id, ?timeout, "Command timed out, checking the log");
                let committed = router.reconcile(&aggregate_id, &correlation_id).await?;
                committed.ok_or(DomainError::Timeout { correlation_id })
            }
        }
    }

    async fn recover(
        router: &CommandRouter<S, A>,
        aggregate_id: &AggregateId,
        correlation_id: String,
    ) -> CommandResult<A> {
        tracing::warn!(%correlation_id, "Command task ended without a result, checking the log");
        let committed = router.reconcile(aggregate_id, &correlation_id).await?;
        committed.ok_or(DomainError::Aborted { correlation_id })
    }
}
