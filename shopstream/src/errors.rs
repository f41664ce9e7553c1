//! Error types for the ShopStream pipeline.
//!
//! Each subsystem gets its own error enum so callers can tell failure modes
//! apart and handle them appropriately:
//!
//! - **`CommandError`**: mediator dispatch and unit-of-work failures
//! - **`StoreError`**: transactional store and repository failures
//! - **`BusError`**: message bus publish/subscribe failures
//! - **`PublishError`**: event publisher failures (carries the prepared
//!   envelopes so a failed batch can be replayed with the same message ids)
//! - **`ProjectionError`**: read-model projection failures
//! - **`ValidationError`**: request payload preconditions
//!
//! The key asymmetry of the pipeline lives here too:
//! [`CommandError::PublishAfterCommit`] marks a write that durably committed
//! while its event publish failed. The write is not undone; operators replay
//! the carried envelopes out-of-band.

use crate::event::EventEnvelope;
use crate::types::{AggregateId, MessageId, StreamPosition};
use thiserror::Error;

/// Errors surfaced to the caller of `Mediator::send` and
/// `UnitOfWork::execute`.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The request payload failed a precondition; no transaction was opened.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A business rule was violated during command execution.
    #[error("Business rule violation: {0}")]
    BusinessRuleViolation(String),

    /// Concurrent modification detected by the store. The unit of work was
    /// rolled back; it is safe to retry the whole command.
    #[error("Concurrency conflict on aggregate '{aggregate_id}': expected version {expected}, but current is {current}")]
    Conflict {
        /// The aggregate with the version conflict
        aggregate_id: AggregateId,
        /// The version the transaction was based on
        expected: StreamPosition,
        /// The version actually found at commit
        current: StreamPosition,
    },

    /// No handler is registered for the request type.
    #[error("No handler registered for request '{0}'")]
    HandlerNotFound(&'static str),

    /// Process wiring is wrong, e.g. a nested unit of work.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The store failed; the unit of work was rolled back. Callers may
    /// retry with backoff if the failure was transient.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// The write committed but the event publish failed. The state change
    /// stands; the carried envelopes must be replayed out-of-band.
    #[error("Events failed to publish after commit (messages {message_ids:?}): {source}")]
    PublishAfterCommit {
        /// Message ids of the envelopes that failed to publish
        message_ids: Vec<MessageId>,
        /// The prepared envelopes, for out-of-band replay with the same ids
        envelopes: Vec<EventEnvelope>,
        /// The underlying bus failure
        source: BusError,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the transactional store and its repositories.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed at save or commit time.
    #[error("Version conflict on aggregate '{aggregate_id}': expected {expected}, but current is {current}")]
    VersionConflict {
        /// The aggregate with the version conflict
        aggregate_id: AggregateId,
        /// The version the transaction was based on
        expected: StreamPosition,
        /// The version actually found
        current: StreamPosition,
    },

    /// The store is temporarily unavailable; safe to retry with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Serialization of aggregate state or an event failed.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The transaction was already completed and cannot be reused.
    #[error("Transaction already completed: {0}")]
    TransactionClosed(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the message bus collaborator.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus is temporarily unavailable; the caller may retry the batch.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// The queue or subscription does not exist.
    #[error("Unknown queue '{0}'")]
    UnknownQueue(String),

    /// The subscription was closed while an operation was in flight.
    #[error("Subscription closed: {0}")]
    SubscriptionClosed(String),

    /// Envelope encoding failed.
    #[error("Envelope encoding failed: {0}")]
    Encoding(String),

    /// An unexpected internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors from the event publisher.
///
/// A failed publish hands back the prepared envelopes so a retry reuses the
/// same message ids, keeping consumer-side deduplication possible.
#[derive(Debug, Error)]
#[error("Failed to publish {} envelope(s): {source}", envelopes.len())]
pub struct PublishError {
    /// The envelopes that were not (or may not have been) delivered.
    pub envelopes: Vec<EventEnvelope>,
    /// The underlying bus failure.
    pub source: BusError,
}

/// Errors from a projection applying an event to a read model.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The envelope's payload could not be decoded for its type tag.
    /// Genuine corruption, not schema evolution; unknown tags are ignored
    /// upstream and never produce this.
    #[error("Failed to decode payload of message {message_id} (type '{event_type}'): {reason}")]
    Decode {
        /// The message that failed to decode
        message_id: MessageId,
        /// The envelope's type tag
        event_type: String,
        /// What went wrong
        reason: String,
    },

    /// A projection handler failed applying the event.
    #[error("Failed to apply message {message_id} to read model: {reason}")]
    Apply {
        /// The message that failed to apply
        message_id: MessageId,
        /// What went wrong
        reason: String,
    },

    /// The read-model store failed.
    #[error("Read model store error: {0}")]
    Store(String),
}

/// Errors raised while wiring the mediator at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediatorError {
    /// A handler is already registered for the request type. Exactly one
    /// handler per command/query type is allowed.
    #[error("Duplicate handler registration for request '{0}'")]
    DuplicateHandler(&'static str),
}

/// Errors from validating request payloads before a transaction is opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required value was empty.
    #[error("{field} cannot be empty")]
    Empty {
        /// The offending field
        field: &'static str,
    },

    /// A value was outside its allowed range.
    #[error("{field} out of range: {reason}")]
    OutOfRange {
        /// The offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A value had an invalid format.
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat {
        /// The offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A custom validation rule failed.
    #[error("Validation failed: {0}")]
    Custom(String),
}

/// Type alias for command results.
pub type CommandResult<T> = Result<T, CommandError>;

/// Type alias for store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Type alias for bus results.
pub type BusResult<T> = Result<T, BusError>;

/// Type alias for publish results.
pub type PublishResult<T> = Result<T, PublishError>;

/// Type alias for projection results.
pub type ProjectionResult<T> = Result<T, ProjectionError>;

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict {
                aggregate_id,
                expected,
                current,
            } => Self::Conflict {
                aggregate_id,
                expected,
                current,
            },
            other => Self::Store(other),
        }
    }
}
