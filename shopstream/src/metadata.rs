//! Message metadata carried from a command's request context into every
//! envelope its unit of work publishes.
//!
//! Correlation links everything that happened on behalf of one logical
//! request; causation links an envelope to the message that caused it.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::MessageId;

/// Links related messages that belong to the same logical workflow or
/// request, even across service boundaries.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new correlation ID with the current timestamp.
    pub fn new() -> Self {
        // Uuid::now_v7() always returns a valid v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

/// Links a message to the specific message that caused it.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct CausationId(Uuid);

impl From<MessageId> for CausationId {
    /// The typical way to set causation: the id of the message that
    /// directly caused this one. `MessageId` is guaranteed v7, so this
    /// conversion is always safe.
    fn from(message_id: MessageId) -> Self {
        Self::try_new(*message_id.as_ref())
            .expect("MessageId should always be a valid v7 UUID for CausationId")
    }
}

/// Contextual metadata attached to each published envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    /// Links envelopes in the same logical workflow or request.
    pub correlation_id: CorrelationId,
    /// Links this envelope to the message that caused it.
    pub causation_id: Option<CausationId>,
    /// Additional custom metadata.
    #[serde(default)]
    pub custom: std::collections::HashMap<String, serde_json::Value>,
}

impl MessageMetadata {
    /// Creates metadata with a fresh correlation id and no causation.
    pub fn new() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            causation_id: None,
            custom: std::collections::HashMap::new(),
        }
    }

    /// Creates metadata continuing an existing correlation, caused by the
    /// given message.
    pub fn caused_by(causing_message_id: MessageId, correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            causation_id: Some(CausationId::from(causing_message_id)),
            custom: std::collections::HashMap::new(),
        }
    }

    /// Adds a custom metadata entry.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }
}

impl Default for MessageMetadata {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_id_is_v7() {
        let id = CorrelationId::new();
        assert_eq!(id.as_ref().get_version(), Some(uuid::Version::SortRand));
    }

    #[test]
    fn causation_from_message_id_preserves_uuid() {
        let message_id = MessageId::new();
        let causation = CausationId::from(message_id);
        assert_eq!(causation.as_ref(), message_id.as_ref());
    }

    #[test]
    fn metadata_caused_by_links_both_ids() {
        let correlation = CorrelationId::new();
        let cause = MessageId::new();
        let metadata = MessageMetadata::caused_by(cause, correlation);

        assert_eq!(metadata.correlation_id, correlation);
        assert_eq!(metadata.causation_id, Some(CausationId::from(cause)));
    }

    #[test]
    fn metadata_roundtrip_serialization() {
        let metadata = MessageMetadata::new()
            .with_custom("tenant", serde_json::json!("eu-west"));
        let json = serde_json::to_string(&metadata).unwrap();
        let deserialized: MessageMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(metadata, deserialized);
    }
}
