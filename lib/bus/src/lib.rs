//! The typed event bus (C1): pub/sub transport, persistence, and replay for
//! the tradeforge workspace.
//!
//! Two transports satisfy the same `EventBus` contract: [`in_process::InProcessBus`]
//! for single-binary deployments (selected when `BUS_URL` is unset) and
//! [`nats::NatsBus`] for multi-process deployments.

pub mod envelope;
pub mod error;
pub mod event;
pub mod in_process;
pub mod nats;
pub mod transport;

pub use envelope::Envelope;
pub use error::BusError;
pub use event::{AgentRole, Event, EventPayload, EventType, FailureInfo, TestFailureKind, TestMetrics};
pub use in_process::InProcessBus;
pub use nats::{NatsBus, NatsConfig};
pub use transport::{AckHandle, BusHealth, Delivery, EventBus, Subscription};
