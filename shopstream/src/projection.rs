//! Projection dispatch: folding envelopes into read models.
//!
//! Dispatch is a registry keyed by event-type tag, resolved once at
//! startup and looked up per message — not a sequential type switch. Tags
//! with no registered handler are ignored (forward compatibility: a newer
//! writer may emit event kinds an older projection does not know yet);
//! hard errors are reserved for genuine store failures and corrupt
//! payloads.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;

use crate::errors::ProjectionResult;
use crate::event::{DomainEvent, EventEnvelope};
use crate::metadata::MessageMetadata;
use crate::types::{AggregateId, EventType, MessageId, StreamPosition, Timestamp};

/// Delivery context handed to every projection handler alongside the
/// decoded event.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// The envelope's message id (the dedup key).
    pub message_id: MessageId,
    /// The aggregate the event belongs to.
    pub aggregate_id: AggregateId,
    /// The event's position in the aggregate's stream.
    pub position: StreamPosition,
    /// When the aggregate raised the event.
    pub occurred_at: Timestamp,
    /// Correlation/causation metadata from the originating request.
    pub metadata: MessageMetadata,
}

impl EventContext {
    fn from_envelope(envelope: &EventEnvelope) -> Self {
        Self {
            message_id: envelope.message_id,
            aggregate_id: envelope.aggregate_id.clone(),
            position: envelope.position,
            occurred_at: envelope.occurred_at,
            metadata: envelope.metadata.clone(),
        }
    }
}

/// Anything that can fold envelopes into a read model.
///
/// Implementations must be idempotent: applying the same (aggregate id,
/// stream position) twice must leave the read model as if it was applied
/// once. See `read_model::apply_at` for the checkpoint-based way to get
/// this.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Applies one envelope. Unknown event types must return `Ok(())`.
    async fn process_event(&self, envelope: &EventEnvelope) -> ProjectionResult<()>;
}

type ErasedApply =
    Box<dyn Fn(&EventEnvelope) -> BoxFuture<'static, ProjectionResult<()>> + Send + Sync>;

/// Maps event-type tags to decode+apply handler pairs.
///
/// Registration is additive — multiple projection handlers may subscribe
/// to the same tag and run in registration order. The registry is
/// assembled at startup and frozen by handing it to the consumer worker.
#[derive(Default)]
pub struct ProjectionRegistry {
    handlers: HashMap<EventType, Vec<ErasedApply>>,
}

impl ProjectionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for the event type `E`.
    ///
    /// The handler receives the delivery context and the decoded event;
    /// it must be idempotent with respect to (aggregate id, position).
    #[must_use]
    pub fn on<E, F, Fut>(mut self, handler: F) -> Self
    where
        E: DomainEvent,
        F: Fn(EventContext, E) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ProjectionResult<()>> + Send + 'static,
    {
        let apply: ErasedApply = Box::new(move |envelope| {
            let ctx = EventContext::from_envelope(envelope);
            match envelope.decode::<E>() {
                Ok(event) => Box::pin(handler(ctx, event)),
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        });
        self.handlers.entry(E::event_type()).or_default().push(apply);
        self
    }

    /// The number of handlers registered for a tag.
    pub fn handler_count(&self, event_type: &EventType) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }
}

#[async_trait]
impl Projection for ProjectionRegistry {
    async fn process_event(&self, envelope: &EventEnvelope) -> ProjectionResult<()> {
        let Some(handlers) = self.handlers.get(&envelope.event_type) else {
            trace!(
                event_type = %envelope.event_type,
                message_id = %envelope.message_id,
                "no handler for event type, skipping"
            );
            return Ok(());
        };

        for handler in handlers {
            handler(envelope).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ProjectionError;
    use crate::event::{PendingEvent, RecordedEvent};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ItemAdded {
        quantity: u32,
    }

    impl DomainEvent for ItemAdded {
        const EVENT_TYPE: &'static str = "cart.item-added.v1";
    }

    fn envelope_for(event: &ItemAdded) -> EventEnvelope {
        let pending = PendingEvent::of(event).unwrap();
        EventEnvelope::wrap(
            RecordedEvent {
                aggregate_id: AggregateId::try_new("cart-1").unwrap(),
                position: StreamPosition::new(1),
                event_type: pending.event_type,
                payload: pending.payload,
                occurred_at: pending.occurred_at,
            },
            MessageMetadata::new(),
        )
    }

    #[tokio::test]
    async fn registered_handler_receives_decoded_event() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);

        let registry = ProjectionRegistry::new().on::<ItemAdded, _, _>(move |ctx, event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                assert_eq!(ctx.aggregate_id.as_ref(), "cart-1");
                seen.fetch_add(event.quantity as usize, Ordering::SeqCst);
                Ok(())
            }
        });

        registry
            .process_event(&envelope_for(&ItemAdded { quantity: 3 }))
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unknown_event_type_is_skipped_not_failed() {
        let registry = ProjectionRegistry::new();
        registry
            .process_event(&envelope_for(&ItemAdded { quantity: 1 }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn multiple_handlers_for_one_tag_all_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = Arc::clone(&count);
        let c2 = Arc::clone(&count);

        let registry = ProjectionRegistry::new()
            .on::<ItemAdded, _, _>(move |_ctx, _event| {
                let count = Arc::clone(&c1);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .on::<ItemAdded, _, _>(move |_ctx, _event| {
                let count = Arc::clone(&c2);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });

        assert_eq!(registry.handler_count(&ItemAdded::event_type()), 2);

        registry
            .process_event(&envelope_for(&ItemAdded { quantity: 1 }))
            .await
            .unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn corrupt_payload_is_a_decode_error() {
        let registry =
            ProjectionRegistry::new().on::<ItemAdded, _, _>(|_ctx, _event| async { Ok(()) });

        let mut envelope = envelope_for(&ItemAdded { quantity: 1 });
        envelope.payload = serde_json::json!({"quantity": "not-a-number"});

        let result = registry.process_event(&envelope).await;
        assert!(matches!(result, Err(ProjectionError::Decode { .. })));
    }
}
