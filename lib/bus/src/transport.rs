//! The transport-agnostic bus contract. Both `InProcessBus` and `NatsBus`
//! implement `EventBus`, so the orchestrator, agents, and tester are
//! transport-agnostic, matching the source's generic `Orchestrator<E:
//! EventStore>` pattern.

use crate::error::BusError;
use crate::event::{Event, EventType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tradeforge_core::WorkflowId;

/// An event handed to a consumer, paired with a handle to acknowledge it.
pub struct Delivery {
    pub event: Event,
    pub ack_handle: Box<dyn AckHandle>,
}

/// Acknowledges (or explicitly skips acknowledging) a single delivery.
#[async_trait]
pub trait AckHandle: Send + Sync {
    /// Acknowledges successful processing; the event will not be redelivered
    /// to this consumer group absent a bug in the transport.
    async fn ack(&self) -> Result<(), BusError>;
}

/// A restartable, lazy sequence of deliveries for one consumer group.
#[async_trait]
pub trait Subscription: Send {
    /// Returns the next ready delivery for this group, or `None` if nothing
    /// is currently ready. Callers poll; there is no blocking long-poll
    /// variant, matching the source's non-blocking consumer loop style.
    async fn next(&mut self) -> Result<Option<Delivery>, BusError>;
}

/// Per-group lag snapshot, in unacked event count.
#[derive(Debug, Clone, Default)]
pub struct BusHealth {
    pub lag_by_group: HashMap<String, u64>,
}

/// Blanket impl so an `Arc<B>` can be shared between the orchestrator and
/// the agent workers without cloning the underlying transport.
#[async_trait]
impl<T: EventBus + ?Sized> EventBus for std::sync::Arc<T> {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        (**self).publish(event).await
    }

    async fn subscribe(&self, event_types: &[EventType], group: &str) -> Result<Box<dyn Subscription>, BusError> {
        (**self).subscribe(event_types, group).await
    }

    async fn replay(&self, workflow_id: WorkflowId, from_timestamp: Option<DateTime<Utc>>) -> Result<Vec<Event>, BusError> {
        (**self).replay(workflow_id, from_timestamp).await
    }

    async fn health(&self) -> BusHealth {
        (**self).health().await
    }
}

/// The typed pub/sub contract every transport implements.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `event`, returning only after it is durably enqueued.
    /// Fails with `BusUnavailable` after the bounded retry budget (50ms ->
    /// 5s backoff, 30s total) is exhausted.
    async fn publish(&self, event: Event) -> Result<(), BusError>;

    /// Registers (if not already known) and returns a subscription for the
    /// given consumer group, filtered to `event_types` (empty = all types).
    /// Unacked events are redelivered after the visibility timeout.
    async fn subscribe(
        &self,
        event_types: &[EventType],
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError>;

    /// Returns every event for `workflow_id` published at or after
    /// `from_timestamp` (or from the start of the log if `None`), in publish
    /// order, for recovery and audit.
    async fn replay(
        &self,
        workflow_id: WorkflowId,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, BusError>;

    /// A health probe reporting lag per consumer group.
    async fn health(&self) -> BusHealth;
}
