//! Error types for bus operations.

use std::fmt;

/// Errors surfaced by an `EventBus` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Transport was unreachable after the bounded retry budget was
    /// exhausted (50ms -> 5s exponential backoff, up to 30s total).
    BusUnavailable { reason: String },
    /// The event payload failed to serialize or deserialize.
    SerializationFailed { reason: String },
    /// Acking a delivered event failed.
    AckFailed { reason: String },
    /// The named consumer group does not exist on this transport.
    UnknownGroup { group: String },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BusUnavailable { reason } => write!(f, "bus unavailable: {reason}"),
            Self::SerializationFailed { reason } => {
                write!(f, "event serialization failed: {reason}")
            }
            Self::AckFailed { reason } => write!(f, "failed to ack event: {reason}"),
            Self::UnknownGroup { group } => write!(f, "unknown consumer group: {group}"),
        }
    }
}

impl std::error::Error for BusError {}
