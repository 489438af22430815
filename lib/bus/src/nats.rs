//! NATS JetStream-backed bus transport, used when `BUS_URL` is set.
//!
//! Grounded directly in the source's `NatsEventStore`
//! (`lib/workflow/src/nats.rs`): one stream holding the event log, subjects
//! keyed per workflow, durable pull consumers per subscriber group with an
//! ack-wait equal to the visibility timeout, and ephemeral `DeliverPolicy::
//! All` consumers for `replay`.

use crate::error::BusError;
use crate::event::{Event, EventType};
use crate::transport::{AckHandle, BusHealth, Delivery, EventBus, Subscription};
use async_nats::jetstream;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tradeforge_core::WorkflowId;

const EVENTS_SUBJECT_PREFIX: &str = "tradeforge.wf";
const EVENTS_STREAM_NAME: &str = "TRADEFORGE_EVENTS";

/// Configuration for the NATS-backed bus.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL, e.g. `nats://localhost:4222`.
    pub url: String,
    /// Stream name holding the event log (defaults to `TRADEFORGE_EVENTS`).
    pub stream_name: Option<String>,
    /// Visibility timeout applied as each durable consumer's ack-wait.
    pub visibility_timeout: Duration,
}

impl NatsConfig {
    /// Creates a config with the default 60s visibility timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream_name: None,
            visibility_timeout: Duration::from_secs(60),
        }
    }

    fn stream(&self) -> &str {
        self.stream_name.as_deref().unwrap_or(EVENTS_STREAM_NAME)
    }
}

/// NATS JetStream-backed bus.
pub struct NatsBus {
    jetstream: Arc<jetstream::Context>,
    config: NatsConfig,
    known_groups: Arc<Mutex<HashSet<String>>>,
}

impl NatsBus {
    /// Connects to NATS and ensures the event stream exists.
    ///
    /// # Errors
    ///
    /// Returns `BusError::BusUnavailable` if the connection or stream setup
    /// fails.
    pub async fn new(config: NatsConfig) -> Result<Self, BusError> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?;

        let jetstream = async_nats::jetstream::new(client);
        Self::ensure_stream(&jetstream, &config).await?;

        Ok(Self {
            jetstream: Arc::new(jetstream),
            config,
            known_groups: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    async fn ensure_stream(
        jetstream: &jetstream::Context,
        config: &NatsConfig,
    ) -> Result<(), BusError> {
        let stream_config = jetstream::stream::Config {
            name: config.stream().to_string(),
            subjects: vec![format!("{EVENTS_SUBJECT_PREFIX}.>")],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            ..Default::default()
        };

        jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to create event stream: {e}"),
            })?;

        Ok(())
    }

    fn subject_for(workflow_id: WorkflowId) -> String {
        format!("{EVENTS_SUBJECT_PREFIX}.{workflow_id}")
    }
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish(&self, event: Event) -> Result<(), BusError> {
        let subject = Self::subject_for(event.workflow_id);
        let bytes = serde_json::to_vec(&event).map_err(|e| BusError::SerializationFailed {
            reason: e.to_string(),
        })?;

        self.jetstream
            .publish(subject, bytes.into())
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?;

        Ok(())
    }

    async fn subscribe(
        &self,
        event_types: &[EventType],
        group: &str,
    ) -> Result<Box<dyn Subscription>, BusError> {
        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to get stream: {e}"),
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(group.to_string()),
            filter_subject: format!("{EVENTS_SUBJECT_PREFIX}.>"),
            deliver_policy: jetstream::consumer::DeliverPolicy::All,
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.config.visibility_timeout,
            ..Default::default()
        };

        let consumer = stream
            .get_or_create_consumer(group, consumer_config)
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to create consumer: {e}"),
            })?;

        self.known_groups.lock().await.insert(group.to_string());

        Ok(Box::new(NatsSubscription {
            consumer,
            event_types: event_types.to_vec(),
        }))
    }

    async fn replay(
        &self,
        workflow_id: WorkflowId,
        from_timestamp: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, BusError> {
        let stream = self
            .jetstream
            .get_stream(self.config.stream())
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to get stream: {e}"),
            })?;

        let consumer_config = jetstream::consumer::pull::Config {
            filter_subject: Self::subject_for(workflow_id),
            deliver_policy: jetstream::consumer::DeliverPolicy::All,
            ..Default::default()
        };

        let consumer = stream
            .create_consumer(consumer_config)
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to create replay consumer: {e}"),
            })?;

        let mut events = Vec::new();
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: format!("failed to fetch messages: {e}"),
            })?;

        while let Ok(Some(message)) =
            tokio::time::timeout(Duration::from_millis(100), messages.next()).await
        {
            let message = message.map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?;

            let event: Event =
                serde_json::from_slice(&message.payload).map_err(|e| BusError::SerializationFailed {
                    reason: e.to_string(),
                })?;

            message.ack().await.map_err(|e| BusError::AckFailed {
                reason: e.to_string(),
            })?;

            if from_timestamp.is_none_or(|from| event.timestamp >= from) {
                events.push(event);
            }
        }

        Ok(events)
    }

    async fn health(&self) -> BusHealth {
        let groups = self.known_groups.lock().await;
        let mut lag_by_group = HashMap::new();
        for group in groups.iter() {
            let lag = self
                .jetstream
                .get_stream(self.config.stream())
                .await
                .ok();
            let lag = match lag {
                Some(mut stream) => stream
                    .consumer_info(group)
                    .await
                    .map(|info| info.num_pending)
                    .unwrap_or(0),
                None => 0,
            };
            lag_by_group.insert(group.clone(), lag);
        }
        BusHealth { lag_by_group }
    }
}

struct NatsSubscription {
    consumer: jetstream::consumer::Consumer<jetstream::consumer::pull::Config>,
    event_types: Vec<EventType>,
}

#[async_trait]
impl Subscription for NatsSubscription {
    async fn next(&mut self) -> Result<Option<Delivery>, BusError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?;

        // Skip and ack events this group's filter excludes; ack-and-continue
        // keeps them from blocking the durable consumer's redelivery window.
        for _ in 0..16 {
            let Ok(Some(message)) =
                tokio::time::timeout(Duration::from_millis(100), messages.next()).await
            else {
                return Ok(None);
            };
            let message = message.map_err(|e| BusError::BusUnavailable {
                reason: e.to_string(),
            })?;

            let event: Event =
                serde_json::from_slice(&message.payload).map_err(|e| BusError::SerializationFailed {
                    reason: e.to_string(),
                })?;

            if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type()) {
                message.ack().await.map_err(|e| BusError::AckFailed {
                    reason: e.to_string(),
                })?;
                continue;
            }

            return Ok(Some(Delivery {
                event,
                ack_handle: Box::new(NatsAckHandle { message }),
            }));
        }
        Ok(None)
    }
}

struct NatsAckHandle {
    message: jetstream::Message,
}

#[async_trait]
impl AckHandle for NatsAckHandle {
    async fn ack(&self) -> Result<(), BusError> {
        self.message
            .ack()
            .await
            .map_err(|e| BusError::AckFailed {
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nats_config_defaults() {
        let config = NatsConfig::new("nats://localhost:4222");
        assert_eq!(config.stream(), EVENTS_STREAM_NAME);
    }

    #[test]
    fn subject_is_scoped_per_workflow() {
        let workflow_id = WorkflowId::new();
        let subject = NatsBus::subject_for(workflow_id);
        assert!(subject.starts_with("tradeforge.wf."));
        assert!(subject.ends_with(&workflow_id.to_string()));
    }
}
