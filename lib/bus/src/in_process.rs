//! An in-memory, per-workflow FIFO bus, used when `BUS_URL` is unset.
//!
//! Generalized from the source's `InMemoryEventStore` test double into a
//! first-class production transport for single-binary deployments: a
//! `VecDeque` per `workflow_id` behind a `tokio::sync::Mutex`, with per-group
//! cursors so multiple consumer groups can read the same log independently.

use crate::error::BusError;
use crate::event::{Event, EventType};
use crate::transport::{AckHandle, BusHealth, Delivery, EventBus, Subscription};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tradeforge_core::WorkflowId;

struct StoredEvent {
    event: Event,
    acked_by: HashSet<String>,
}

#[derive(Default)]
struct GroupCursor {
    /// Index of the next event this group has not yet acked.
    next_index: usize,
    /// Set while the event at `next_index` is out for delivery.
    in_flight_deadline: Option<Instant>,
}

#[derive(Default)]
struct BusState {
    workflows: HashMap<WorkflowId, Vec<StoredEvent>>,
    /// (group, workflow_id) -> cursor. Absent entries default to index 0.
    cursors: HashMap<(String, WorkflowId), GroupCursor>,
    known_groups: HashSet<String>,
}

/// An in-process, single-binary bus implementation.
pub struct InProcessBus {
    state: Arc<Mutex<BusState>>,
    visibility_timeout: Duration,
}

impl InProcessBus {
    /// Creates a bus with the default 60s visibility timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_visibility_timeout(Duration::from_secs(60))
    }

    /// Creates a bus with a custom visibility timeout, for tests that need
    /// to exercise redelivery without waiting 60 real seconds.
    #[must_use]
    pub fn with_visibility_timeout(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState::default())),
            visibility_timeout,
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for InProcessBus {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            visibility_timeout: self.visibility_timeout,
        }
    }
}

#[async_trait]
impl EventBus for InProcessBus {
    async fn publish(&self, mut event: Event) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        let queue = state.workflows.entry(event.workflow_id).or_default();
        event.sequence = u64::try_from(queue.len()).unwrap_or(u64::MAX);
        queue.push(StoredEvent {
            event,
            acked_by: HashSet::new(),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let mut state = self.state.lock().await;
        state.known_groups.insert(group.to_string());
        Ok(Box::new(InProcessSubscription {
            state: Arc::clone(&self.state),
            group: group.to_string(),
            event_types: event_types.to_vec(),
            visibility_timeout: self.visibility_timeout,
        }))
    }

    async fn replay(
        &self,
        workflow_id: WorkflowId,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, BusError> {
        let state = self.state.lock().await;
        let events = state
            .workflows
            .get(&workflow_id)
            .map(|queue| {
                queue
                    .iter()
                    .map(|stored| stored.event.clone())
                    .filter(|event| from_timestamp.is_none_or(|from| event.timestamp >= from))
                    .collect()
            })
            .unwrap_or_default();
        Ok(events)
    }

    async fn health(&self) -> BusHealth {
        let state = self.state.lock().await;
        let mut lag_by_group: HashMap<String, u64> = HashMap::new();
        for group in &state.known_groups {
            let mut lag = 0u64;
            for (workflow_id, queue) in &state.workflows {
                let acked = state
                    .cursors
                    .get(&(group.clone(), *workflow_id))
                    .map_or(0, |cursor| cursor.next_index);
                lag += u64::try_from(queue.len().saturating_sub(acked)).unwrap_or(0);
            }
            lag_by_group.insert(group.clone(), lag);
        }
        BusHealth { lag_by_group }
    }
}

struct InProcessSubscription {
    state: Arc<Mutex<BusState>>,
    group: String,
    event_types: Vec<EventType>,
    visibility_timeout: Duration,
}

#[async_trait]
impl Subscription for InProcessSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let workflow_ids: Vec<WorkflowId> = state.workflows.keys().copied().collect();
        for workflow_id in workflow_ids {
            let cursor_key = (self.group.clone(), workflow_id);
            let still_in_flight = state.cursors.get(&cursor_key).is_some_and(|cursor| {
                cursor
                    .in_flight_deadline
                    .is_some_and(|deadline| now < deadline)
            });
            if still_in_flight {
                continue;
            }

            // Scan forward from the cursor's position within this workflow,
            // skipping (and immediately acking-past) events this group's
            // filter excludes, so a filtered-out event never blocks delivery
            // of a matching event behind it.
            loop {
                let next_index = state
                    .cursors
                    .get(&cursor_key)
                    .map_or(0, |cursor| cursor.next_index);

                let event_type = match state
                    .workflows
                    .get(&workflow_id)
                    .and_then(|queue| queue.get(next_index))
                {
                    Some(stored) => stored.event.event_type(),
                    None => break,
                };

                if !self.event_types.is_empty() && !self.event_types.contains(&event_type) {
                    state
                        .cursors
                        .entry(cursor_key.clone())
                        .or_default()
                        .next_index = next_index + 1;
                    continue;
                }

                let event = state
                    .workflows
                    .get(&workflow_id)
                    .and_then(|queue| queue.get(next_index))
                    .expect("checked above")
                    .event
                    .clone();
                state
                    .cursors
                    .entry(cursor_key.clone())
                    .or_default()
                    .in_flight_deadline = Some(now + self.visibility_timeout);

                return Ok(Some(Delivery {
                    event,
                    ack_handle: Box::new(InProcessAckHandle {
                        state: Arc::clone(&self.state),
                        group: self.group.clone(),
                        workflow_id,
                        index: next_index,
                    }),
                }));
            }
        }
        Ok(None)
    }
}

struct InProcessAckHandle {
    state: Arc<Mutex<BusState>>,
    group: String,
    workflow_id: WorkflowId,
    index: usize,
}

#[async_trait]
impl AckHandle for InProcessAckHandle {
    async fn ack(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        if let Some(stored) = state
            .workflows
            .get_mut(&self.workflow_id)
            .and_then(|queue| queue.get_mut(self.index))
        {
            stored.acked_by.insert(self.group.clone());
        }
        let cursor = state
            .cursors
            .entry((self.group.clone(), self.workflow_id))
            .or_default();
        if cursor.next_index == self.index {
            cursor.next_index += 1;
        }
        cursor.in_flight_deadline = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AgentRole, EventPayload};

    fn sample_event(workflow_id: WorkflowId) -> Event {
        Event::new(
            workflow_id,
            AgentRole::Orchestrator,
            1,
            EventPayload::TaskStarted {
                task_id: tradeforge_core::TaskId::new(),
            },
        )
    }

    #[tokio::test]
    async fn publish_then_subscribe_delivers_in_order() {
        let bus = InProcessBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample_event(workflow_id)).await.unwrap();
        bus.publish(sample_event(workflow_id)).await.unwrap();

        let mut sub = bus.subscribe(&[], "orchestrator").await.unwrap();
        let first = sub.next().await.unwrap().expect("first delivery");
        assert_eq!(first.event.sequence, 0);
        // second event is not yet visible: first is still in flight, FIFO.
        assert!(sub.next().await.unwrap().is_none());

        first.ack_handle.ack().await.unwrap();
        let second = sub.next().await.unwrap().expect("second delivery");
        assert_eq!(second.event.sequence, 1);
    }

    #[tokio::test]
    async fn unacked_event_is_redelivered_after_timeout() {
        let bus = InProcessBus::with_visibility_timeout(Duration::from_millis(10));
        let workflow_id = WorkflowId::new();
        bus.publish(sample_event(workflow_id)).await.unwrap();

        let mut sub = bus.subscribe(&[], "agents").await.unwrap();
        let delivery = sub.next().await.unwrap().expect("first delivery");
        assert!(sub.next().await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let redelivered = sub.next().await.unwrap().expect("redelivered");
        assert_eq!(redelivered.event.event_id, delivery.event.event_id);
    }

    #[tokio::test]
    async fn event_type_filter_excludes_non_matching_events() {
        let bus = InProcessBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample_event(workflow_id)).await.unwrap();

        let mut sub = bus
            .subscribe(&[EventType::TaskCompleted], "filtered")
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn filtered_event_does_not_block_matching_event_behind_it() {
        let bus = InProcessBus::new();
        let workflow_id = WorkflowId::new();
        // First event is never of interest to this group (e.g. TodoListCreated
        // ahead of every TaskDispatched); the second is.
        bus.publish(sample_event(workflow_id)).await.unwrap();
        bus.publish(Event::new(
            workflow_id,
            AgentRole::Orchestrator,
            1,
            EventPayload::TaskCancelled {
                task_id: tradeforge_core::TaskId::new(),
                reason: "cancelled".to_string(),
            },
        ))
        .await
        .unwrap();

        let mut sub = bus
            .subscribe(&[EventType::TaskCancelled], "filtered")
            .await
            .unwrap();
        let delivery = sub.next().await.unwrap().expect("filtered-in event is still delivered");
        assert_eq!(delivery.event.sequence, 1);
    }

    #[tokio::test]
    async fn replay_returns_full_workflow_log() {
        let bus = InProcessBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample_event(workflow_id)).await.unwrap();
        bus.publish(sample_event(workflow_id)).await.unwrap();

        let events = bus.replay(workflow_id, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 0);
        assert_eq!(events[1].sequence, 1);
    }

    #[tokio::test]
    async fn independent_groups_have_independent_cursors() {
        let bus = InProcessBus::new();
        let workflow_id = WorkflowId::new();
        bus.publish(sample_event(workflow_id)).await.unwrap();

        let mut group_a = bus.subscribe(&[], "a").await.unwrap();
        let mut group_b = bus.subscribe(&[], "b").await.unwrap();

        let delivery_a = group_a.next().await.unwrap().expect("a gets it");
        delivery_a.ack_handle.ack().await.unwrap();

        // b has not acked yet, should still see the event independently of a.
        assert!(group_b.next().await.unwrap().is_some());
    }
}
