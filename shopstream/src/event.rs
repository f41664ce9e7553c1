//! Domain events and their bus representation.
//!
//! An event moves through three shapes on its way from an aggregate to a
//! read model:
//!
//! 1. [`PendingEvent`] — raised by an aggregate inside a transaction, not
//!    yet assigned a stream position;
//! 2. [`RecordedEvent`] — committed alongside the aggregate state, with a
//!    gap-free per-aggregate position;
//! 3. [`EventEnvelope`] — the bus wire shape, adding a globally unique
//!    message id (the dedup key) and the type tag for polymorphic decoding.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{ProjectionError, StoreError, StoreResult};
use crate::metadata::MessageMetadata;
use crate::types::{AggregateId, EventType, MessageId, StreamPosition, Timestamp};

/// An immutable fact that something happened to an aggregate.
///
/// Implementors are plain serde payload types; the constant type tag is the
/// key the projection registry dispatches on. Tags should be versioned,
/// e.g. `order.created.v1`, so schemas can evolve side by side.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable type identifier carried in the envelope.
    const EVENT_TYPE: &'static str;

    /// Returns this implementor's tag as an [`EventType`].
    fn event_type() -> EventType {
        EventType::try_new(Self::EVENT_TYPE).expect("EVENT_TYPE constants must be non-empty")
    }
}

/// An event raised by an aggregate during a transaction, before commit.
///
/// The stream position is assigned later, by the repository at save time,
/// so a pending event only carries the tag and serialized payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEvent {
    /// The event's type tag.
    pub event_type: EventType,
    /// The serialized payload.
    pub payload: serde_json::Value,
    /// When the aggregate raised the event.
    pub occurred_at: Timestamp,
}

impl PendingEvent {
    /// Serializes a typed event into its pending form.
    pub fn of<E: DomainEvent>(event: &E) -> StoreResult<Self> {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Self {
            event_type: E::event_type(),
            payload,
            occurred_at: Timestamp::now(),
        })
    }
}

/// A durably committed event with its position in the aggregate's stream.
///
/// Positions are strictly increasing and gap-free per aggregate: the
/// repository assigns `version + 1 ..` when it drains the aggregate's
/// uncommitted events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,
    /// Position within the aggregate's stream (first event is 1).
    pub position: StreamPosition,
    /// The event's type tag.
    pub event_type: EventType,
    /// The serialized payload.
    pub payload: serde_json::Value,
    /// When the aggregate raised the event.
    pub occurred_at: Timestamp,
}

/// The bus representation of a [`RecordedEvent`].
///
/// Adds the globally unique message id consumers deduplicate on and the
/// metadata propagated from the originating request. Redelivery of an
/// envelope reuses the same message id. Envelopes round-trip losslessly
/// through JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique per logical publish; stable across redelivery.
    pub message_id: MessageId,
    /// Type tag for polymorphic decoding.
    pub event_type: EventType,
    /// The aggregate the wrapped event belongs to.
    pub aggregate_id: AggregateId,
    /// The wrapped event's stream position.
    pub position: StreamPosition,
    /// When the aggregate raised the event.
    pub occurred_at: Timestamp,
    /// The serialized event payload.
    pub payload: serde_json::Value,
    /// Correlation/causation metadata from the originating request.
    pub metadata: MessageMetadata,
}

impl EventEnvelope {
    /// Wraps a recorded event, minting a fresh message id.
    pub fn wrap(event: RecordedEvent, metadata: MessageMetadata) -> Self {
        Self {
            message_id: MessageId::new(),
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            position: event.position,
            occurred_at: event.occurred_at,
            payload: event.payload,
            metadata,
        }
    }

    /// Checks the type tag and deserializes the payload.
    ///
    /// Fails with [`ProjectionError::Decode`] when the tag does not match
    /// or the payload is corrupt.
    pub fn decode<E: DomainEvent>(&self) -> Result<E, ProjectionError> {
        if self.event_type.as_ref() != E::EVENT_TYPE {
            return Err(ProjectionError::Decode {
                message_id: self.message_id,
                event_type: self.event_type.to_string(),
                reason: format!("envelope tag does not match expected '{}'", E::EVENT_TYPE),
            });
        }
        serde_json::from_value(self.payload.clone()).map_err(|e| ProjectionError::Decode {
            message_id: self.message_id,
            event_type: self.event_type.to_string(),
            reason: e.to_string(),
        })
    }
}
