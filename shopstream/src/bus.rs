//! Delivery contract required from the message bus collaborator.
//!
//! The pipeline does not fix a broker or wire format; any bus works as long
//! as it round-trips [`EventEnvelope`] fields losslessly and honors the
//! semantics documented on the traits below:
//!
//! - per-queue FIFO delivery to a single consumer;
//! - nack-with-requeue redelivers the same envelope (same message id) with
//!   an incremented attempt counter;
//! - nack-without-requeue routes the envelope to a dead-letter sink;
//! - duplicate delivery after crashes is permitted — projections, not the
//!   bus, are the idempotence layer.

use async_trait::async_trait;

use crate::errors::BusResult;
use crate::event::EventEnvelope;
use crate::types::QueueName;

/// A durable message bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// The consumer type returned by `subscribe`.
    type Consumer: BusConsumer;

    /// Publishes one envelope to a queue.
    async fn publish(&self, queue: &QueueName, envelope: &EventEnvelope) -> BusResult<()>;

    /// Opens a consumer on a queue. Multiple consumers may be active on
    /// the same queue for scale-out; the bus must not deliver one message
    /// to two consumers concurrently under normal operation.
    async fn subscribe(&self, queue: &QueueName) -> BusResult<Self::Consumer>;
}

/// A single subscription pulling envelopes off a queue.
#[async_trait]
pub trait BusConsumer: Send {
    /// Pulls the next delivery, waiting if the queue is empty. Returns
    /// `None` when the subscription has been closed.
    async fn next(&mut self) -> BusResult<Option<Delivery>>;

    /// Acknowledges a delivery, removing it from the queue. Called only
    /// after the projection durably applied the event.
    async fn ack(&mut self, delivery: &Delivery) -> BusResult<()>;

    /// Negatively acknowledges a delivery. With `requeue` the envelope is
    /// redelivered later; without it the envelope goes to the queue's
    /// dead-letter sink.
    async fn nack(&mut self, delivery: &Delivery, requeue: bool) -> BusResult<()>;
}

/// One envelope handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The delivered envelope. Identical across redeliveries.
    pub envelope: EventEnvelope,
    /// 1-based delivery attempt counter, incremented on each redelivery.
    pub attempt: u32,
}
