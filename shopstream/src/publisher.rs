//! Publishes committed events to the bus as envelopes.
//!
//! Message id assignment happens once, in [`EventPublisher::prepare`], not
//! on every publish attempt: retrying a failed batch with the same prepared
//! envelopes reuses the same ids, which is what lets consumers deduplicate
//! redelivered messages.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::errors::{PublishError, PublishResult};
use crate::event::{EventEnvelope, RecordedEvent};
use crate::metadata::MessageMetadata;
use crate::types::QueueName;

/// Wraps committed events in envelopes and publishes them to one queue.
pub struct EventPublisher<B: MessageBus> {
    bus: Arc<B>,
    queue: QueueName,
}

impl<B: MessageBus> EventPublisher<B> {
    /// Creates a publisher bound to a destination queue.
    pub fn new(bus: Arc<B>, queue: QueueName) -> Self {
        Self { bus, queue }
    }

    /// The destination queue.
    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Wraps a batch of recorded events in envelopes, minting one message
    /// id per event. Per-aggregate order of the input batch is preserved.
    pub fn prepare(
        &self,
        events: Vec<RecordedEvent>,
        metadata: &MessageMetadata,
    ) -> Vec<EventEnvelope> {
        events
            .into_iter()
            .map(|event| EventEnvelope::wrap(event, metadata.clone()))
            .collect()
    }

    /// Publishes prepared envelopes in order.
    ///
    /// Envelopes before the failure point may have been delivered; the
    /// error carries the remaining batch so the caller can replay it with
    /// the same message ids. Re-publishing an already-delivered envelope is
    /// safe — consumers deduplicate on message id and projections are
    /// idempotent.
    pub async fn publish(&self, envelopes: Vec<EventEnvelope>) -> PublishResult<()> {
        for (index, envelope) in envelopes.iter().enumerate() {
            if let Err(source) = self.bus.publish(&self.queue, envelope).await {
                warn!(
                    queue = %self.queue,
                    message_id = %envelope.message_id,
                    aggregate_id = %envelope.aggregate_id,
                    position = %envelope.position,
                    error = %source,
                    "publish failed mid-batch"
                );
                return Err(PublishError {
                    envelopes: envelopes[index..].to_vec(),
                    source,
                });
            }
            debug!(
                queue = %self.queue,
                message_id = %envelope.message_id,
                event_type = %envelope.event_type,
                aggregate_id = %envelope.aggregate_id,
                position = %envelope.position,
                "envelope published"
            );
        }
        Ok(())
    }

    /// Convenience: prepare and publish in one step.
    pub async fn publish_events(
        &self,
        events: Vec<RecordedEvent>,
        metadata: &MessageMetadata,
    ) -> PublishResult<Vec<EventEnvelope>> {
        let envelopes = self.prepare(events, metadata);
        self.publish(envelopes.clone()).await?;
        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{BusError, BusResult};
    use crate::event::DomainEvent;
    use crate::types::{AggregateId, MessageId, StreamPosition, Timestamp};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Created {
        n: u32,
    }

    impl DomainEvent for Created {
        const EVENT_TYPE: &'static str = "test.created.v1";
    }

    /// Bus stub that fails the first `fail_first` publishes, then accepts.
    struct FlakyBus {
        fail_first: usize,
        calls: AtomicUsize,
        published: Mutex<Vec<MessageId>>,
    }

    impl FlakyBus {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                calls: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    struct NoConsumer;

    #[async_trait]
    impl crate::bus::BusConsumer for NoConsumer {
        async fn next(&mut self) -> BusResult<Option<crate::bus::Delivery>> {
            Ok(None)
        }

        async fn ack(&mut self, _: &crate::bus::Delivery) -> BusResult<()> {
            Ok(())
        }

        async fn nack(&mut self, _: &crate::bus::Delivery, _: bool) -> BusResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl MessageBus for FlakyBus {
        type Consumer = NoConsumer;

        async fn publish(&self, _queue: &QueueName, envelope: &EventEnvelope) -> BusResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(BusError::Unavailable("broker down".to_string()));
            }
            self.published.lock().unwrap().push(envelope.message_id);
            Ok(())
        }

        async fn subscribe(&self, _queue: &QueueName) -> BusResult<Self::Consumer> {
            Ok(NoConsumer)
        }
    }

    fn recorded(position: u64) -> RecordedEvent {
        let pending = crate::event::PendingEvent::of(&Created { n: position as u32 }).unwrap();
        RecordedEvent {
            aggregate_id: AggregateId::try_new("order-7").unwrap(),
            position: StreamPosition::new(position),
            event_type: pending.event_type,
            payload: pending.payload,
            occurred_at: Timestamp::now(),
        }
    }

    fn publisher(bus: Arc<FlakyBus>) -> EventPublisher<FlakyBus> {
        EventPublisher::new(bus, QueueName::try_new("orders").unwrap())
    }

    #[tokio::test]
    async fn prepare_preserves_batch_order() {
        let bus = Arc::new(FlakyBus::new(0));
        let publisher = publisher(bus);

        let envelopes = publisher.prepare(
            vec![recorded(1), recorded(2), recorded(3)],
            &MessageMetadata::new(),
        );

        let positions: Vec<u64> = envelopes.iter().map(|e| e.position.into()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn retry_of_prepared_batch_reuses_message_ids() {
        let bus = Arc::new(FlakyBus::new(1));
        let publisher = publisher(bus.clone());

        let envelopes = publisher.prepare(vec![recorded(1), recorded(2)], &MessageMetadata::new());
        let original_ids: Vec<MessageId> = envelopes.iter().map(|e| e.message_id).collect();

        // First attempt fails on the first envelope.
        let err = publisher.publish(envelopes).await.unwrap_err();
        assert_eq!(err.envelopes.len(), 2);

        // Retrying the batch carried in the error succeeds with the same ids.
        publisher.publish(err.envelopes).await.unwrap();
        assert_eq!(*bus.published.lock().unwrap(), original_ids);
    }

    /// Bus stub that fails exactly the second publish call.
    struct SecondFails {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessageBus for SecondFails {
        type Consumer = NoConsumer;

        async fn publish(&self, _q: &QueueName, _e: &EventEnvelope) -> BusResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(BusError::Unavailable("broker down".to_string()));
            }
            Ok(())
        }

        async fn subscribe(&self, _q: &QueueName) -> BusResult<Self::Consumer> {
            Ok(NoConsumer)
        }
    }

    #[tokio::test]
    async fn mid_batch_failure_returns_only_the_remainder() {
        let publisher = EventPublisher::new(
            Arc::new(SecondFails {
                calls: AtomicUsize::new(0),
            }),
            QueueName::try_new("orders").unwrap(),
        );

        let envelopes = publisher.prepare(
            vec![recorded(1), recorded(2), recorded(3)],
            &MessageMetadata::new(),
        );
        let second_id = envelopes[1].message_id;

        let err = publisher.publish(envelopes).await.unwrap_err();
        assert_eq!(err.envelopes.len(), 2);
        assert_eq!(err.envelopes[0].message_id, second_id);
    }
}
