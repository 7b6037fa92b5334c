//! Outbox-backed delivery of committed events to projections.
//!
//! Every projection gets its own outbox and worker task. Publishing only
//! enqueues, so a slow or failing projection never holds up the command
//! path or the other projections. An event stays at the head of its outbox
//! until the projection acknowledges it; transient failures are retried with
//! exponential backoff, permanent ones are recorded and skipped.

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use event_store::{EventEnvelope, EventId, EventPublisher, EventStore, Sequence};
use futures_util::{FutureExt, TryStreamExt};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

use crate::Result;
use crate::projection::{Applied, Projection};

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Name the events are published under.
    pub topic: String,

    /// `*` delivers every event type; anything else must equal the event type.
    pub routing_key: String,

    /// First retry delay after a transient failure.
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: "Events".to_string(),
            routing_key: "*".to_string(),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl PublisherConfig {
    fn routes(&self, event: &EventEnvelope) -> bool {
        self.routing_key == "*" || self.routing_key == event.event_type
    }
}

/// The first event a projection could not apply for one aggregate.
///
/// Once a projection skips an event, later events for the same aggregate
/// usually fail too (as a sequence gap); those only bump `occurrences`.
#[derive(Debug, Clone)]
pub struct ProjectionFailure {
    pub projection: &'static str,
    pub event_id: EventId,
    pub aggregate_id: AggregateId,
    pub sequence: Sequence,
    pub event_type: String,
    pub error: String,
    pub failed_at: DateTime<Utc>,

    /// Events skipped for this aggregate, including the first.
    pub occurrences: u64,
}

struct Outbox {
    projection: Arc<dyn Projection>,
    queue: Mutex<VecDeque<EventEnvelope>>,
    wakeup: Notify,
    pending: watch::Sender<usize>,
    failures: Mutex<HashMap<AggregateId, ProjectionFailure>>,
}

impl Outbox {
    fn new(projection: Arc<dyn Projection>) -> Self {
        Self {
            projection,
            queue: Mutex::new(VecDeque::new()),
            wakeup: Notify::new(),
            pending: watch::Sender::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    async fn enqueue(&self, events: impl IntoIterator<Item = EventEnvelope>) {
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.extend(events);
        let added = queue.len() - before;
        drop(queue);

        if added > 0 {
            self.pending.send_modify(|pending| *pending += added);
            self.wakeup.notify_one();
        }
    }

    async fn run(self: Arc<Self>, config: PublisherConfig) {
        let name = self.projection.name();
        tracing::debug!(projection = name, "Projection worker started");

        loop {
            let head = self.queue.lock().await.front().cloned();
            let Some(event) = head else {
                self.wakeup.notified().await;
                continue;
            };

            self.deliver(&event, &config).await;

            self.queue.lock().await.pop_front();
            self.pending
                .send_modify(|pending| *pending = pending.saturating_sub(1));
        }
    }

    /// Delivers one event, returning once it is acknowledged or given up on.
    async fn deliver(&self, event: &EventEnvelope, config: &PublisherConfig) {
        let name = self.projection.name();
        let mut backoff = config.initial_backoff;
        let mut attempt: u32 = 1;

        loop {
            let outcome = AssertUnwindSafe(self.projection.apply(event))
                .catch_unwind()
                .await;

            let error = match outcome {
                Ok(Ok(applied)) => {
                    let label = match applied {
                        Applied::Applied => "applied",
                        Applied::Duplicate => "duplicate",
                        Applied::Ignored => "ignored",
                    };
                    metrics::counter!(
                        "projection_events_total",
                        "projection" => name,
                        "outcome" => label
                    )
                    .increment(1);
                    return;
                }
                Ok(Err(err)) if err.is_transient() => {
                    tracing::warn!(
                        projection = name,
                        aggregate_id = %event.aggregate_id,
                        sequence = %event.sequence,
                        attempt,
                        ?backoff,
                        error = %err,
                        "Projection store unavailable, retrying"
                    );
                    metrics::counter!("projection_retries_total", "projection" => name)
                        .increment(1);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(config.max_backoff);
                    attempt += 1;
                    continue;
                }
                Ok(Err(err)) => err.to_string(),
                Err(_) => "projection panicked".to_string(),
            };

            tracing::error!(
                projection = name,
                aggregate_id = %event.aggregate_id,
                sequence = %event.sequence,
                event_type = %event.event_type,
                error = %error,
                "Projection failed to apply event, skipping"
            );
            metrics::counter!("projection_failures_total", "projection" => name).increment(1);
            self.failures
                .lock()
                .await
                .entry(event.aggregate_id.clone())
                .and_modify(|failure| failure.occurrences += 1)
                .or_insert_with(|| ProjectionFailure {
                    projection: name,
                    event_id: event.event_id,
                    aggregate_id: event.aggregate_id.clone(),
                    sequence: event.sequence,
                    event_type: event.event_type.clone(),
                    error,
                    failed_at: Utc::now(),
                    occurrences: 1,
                });
            return;
        }
    }
}

/// Fans committed events out to a fixed set of projections.
pub struct ProjectionPublisher {
    config: PublisherConfig,
    outboxes: Vec<Arc<Outbox>>,
    workers: Vec<JoinHandle<()>>,
}

impl ProjectionPublisher {
    /// Starts one worker per projection on the current tokio runtime.
    pub fn start(config: PublisherConfig, projections: Vec<Arc<dyn Projection>>) -> Self {
        let outboxes: Vec<_> = projections
            .into_iter()
            .map(|projection| Arc::new(Outbox::new(projection)))
            .collect();

        let workers = outboxes
            .iter()
            .map(|outbox| tokio::spawn(Arc::clone(outbox).run(config.clone())))
            .collect();

        tracing::info!(
            topic = %config.topic,
            routing_key = %config.routing_key,
            projections = outboxes.len(),
            "Projection publisher started"
        );

        Self {
            config,
            outboxes,
            workers,
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Names of the attached projections.
    pub fn projection_names(&self) -> Vec<&'static str> {
        self.outboxes
            .iter()
            .map(|outbox| outbox.projection.name())
            .collect()
    }

    /// Events not yet acknowledged, summed over all projections.
    pub fn pending(&self) -> usize {
        self.outboxes
            .iter()
            .map(|outbox| *outbox.pending.borrow())
            .sum()
    }

    /// One entry per projection and aggregate that had an event skipped,
    /// oldest first per projection.
    pub async fn failures(&self) -> Vec<ProjectionFailure> {
        let mut all = Vec::new();
        for outbox in &self.outboxes {
            let mut failures: Vec<_> = outbox.failures.lock().await.values().cloned().collect();
            failures.sort_by_key(|failure| failure.failed_at);
            all.extend(failures);
        }
        all
    }

    /// Waits until every outbox is drained.
    pub async fn wait_idle(&self) {
        for outbox in &self.outboxes {
            let mut pending = outbox.pending.subscribe();
            // The sender lives in the outbox, so this only ends when drained.
            let _ = pending.wait_for(|pending| *pending == 0).await;
        }
    }

    /// Re-delivers every event in the log.
    ///
    /// Projections skip what they have already applied, so this is safe to
    /// run on every startup. Covers everything committed before the call;
    /// concurrent commits arrive through the live publish path instead.
    /// Returns the number of events enqueued.
    #[tracing::instrument(skip(self, store))]
    pub async fn catch_up<S: EventStore + ?Sized>(&self, store: &S) -> Result<usize> {
        let events: Vec<EventEnvelope> = store.stream_all().await?.try_collect().await?;
        let count = events.len();
        self.publish(&events).await;

        tracing::info!(events = count, "Catch-up enqueued");
        Ok(count)
    }

    /// Resets every projection and replays the whole log into them.
    #[tracing::instrument(skip(self, store))]
    pub async fn rebuild<S: EventStore + ?Sized>(&self, store: &S) -> Result<usize> {
        self.wait_idle().await;
        for outbox in &self.outboxes {
            outbox.projection.reset().await?;
            outbox.failures.lock().await.clear();
        }
        self.catch_up(store).await
    }

    /// Drains the outboxes, then stops the workers.
    pub async fn shutdown(self) {
        self.wait_idle().await;
        // Drop aborts the workers.
    }
}

impl Drop for ProjectionPublisher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

#[async_trait]
impl EventPublisher for ProjectionPublisher {
    #[tracing::instrument(
        skip(self, events),
        fields(topic = %self.config.topic, count = events.len())
    )]
    async fn publish(&self, events: &[EventEnvelope]) {
        let routed: Vec<EventEnvelope> = events
            .iter()
            .filter(|event| self.config.routes(event))
            .cloned()
            .collect();
        if routed.is_empty() {
            return;
        }

        for outbox in &self.outboxes {
            outbox.enqueue(routed.iter().cloned()).await;
        }
        metrics::counter!("events_published_total").increment(routed.len() as u64);
    }
}
