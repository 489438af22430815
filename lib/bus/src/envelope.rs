//! Versioned payload envelope, allowing event payload schemas to evolve
//! without breaking consumers reading old events out of the log.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current payload schema version. Bump when a payload's fields change in a
/// way that is not backward compatible, and branch on `version` at read time.
pub const CURRENT_VERSION: u32 = 1;

/// Wraps a payload with a schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps `payload` at the current version.
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    /// Returns a reference to the payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consumes the envelope, returning the payload.
    pub fn into_payload(self) -> T {
        self.payload
    }

    /// Whether this envelope is at the version this binary expects.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes for wire transport.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Deserializes an envelope from JSON bytes.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let envelope = Envelope::new("payload".to_string());
        let bytes = envelope.to_json_bytes().expect("serialize");
        let parsed: Envelope<String> = Envelope::from_json_bytes(&bytes).expect("deserialize");
        assert_eq!(envelope, parsed);
    }

    #[test]
    fn new_sets_current_version() {
        let envelope = Envelope::new(42);
        assert!(envelope.is_current_version());
        assert_eq!(envelope.version, CURRENT_VERSION);
    }
}
