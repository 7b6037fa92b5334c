use async_trait::async_trait;

use crate::EventEnvelope;

/// Hands committed events to downstream subscribers.
///
/// Called by the command path only after an append has committed. Delivery
/// is at-least-once and decoupled from the append: implementations must not
/// block on slow subscribers, and a failed delivery is retried on the
/// publisher side rather than surfaced to the caller.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes events of a single aggregate, in append order.
    async fn publish(&self, events: &[EventEnvelope]);
}

/// Publisher that drops every event. Useful when no read side is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, events: &[EventEnvelope]) {
        tracing::trace!(count = events.len(), "no publisher attached, dropping events");
    }
}
