//! Thread-safe in-memory message bus.
//!
//! Each queue is a FIFO of deliveries plus a dead-letter sink. A pulled
//! delivery is removed from the queue immediately, so it is never handed
//! to two consumers at once; nack-with-requeue pushes it to the back with
//! an incremented attempt counter, nack-without-requeue moves its envelope
//! to the dead-letter sink. Consumers block on an empty queue until the
//! next publish.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::debug;

use shopstream::bus::{BusConsumer, Delivery, MessageBus};
use shopstream::errors::BusResult;
use shopstream::event::EventEnvelope;
use shopstream::types::QueueName;

#[derive(Default)]
struct QueueState {
    pending: Mutex<VecDeque<Delivery>>,
    dead_letters: Mutex<Vec<EventEnvelope>>,
    notify: Notify,
}

/// Thread-safe in-memory message bus for testing.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    queues: Arc<RwLock<HashMap<QueueName, Arc<QueueState>>>>,
}

impl InMemoryBus {
    /// Creates a new bus with no queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue(&self, name: &QueueName) -> Arc<QueueState> {
        if let Some(state) = self.queues.read().expect("RwLock poisoned").get(name) {
            return Arc::clone(state);
        }
        let mut queues = self.queues.write().expect("RwLock poisoned");
        Arc::clone(queues.entry(name.clone()).or_default())
    }

    /// Envelopes dead-lettered on a queue, in arrival order. Test
    /// introspection.
    pub fn dead_letters(&self, name: &QueueName) -> Vec<EventEnvelope> {
        self.queue(name)
            .dead_letters
            .lock()
            .expect("Mutex poisoned")
            .clone()
    }

    /// Number of deliveries waiting on a queue. Test introspection.
    pub fn pending_count(&self, name: &QueueName) -> usize {
        self.queue(name).pending.lock().expect("Mutex poisoned").len()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    type Consumer = InMemoryConsumer;

    async fn publish(&self, queue: &QueueName, envelope: &EventEnvelope) -> BusResult<()> {
        let state = self.queue(queue);
        state
            .pending
            .lock()
            .expect("Mutex poisoned")
            .push_back(Delivery {
                envelope: envelope.clone(),
                attempt: 1,
            });
        state.notify.notify_one();
        debug!(queue = %queue, message_id = %envelope.message_id, "envelope enqueued");
        Ok(())
    }

    async fn subscribe(&self, queue: &QueueName) -> BusResult<Self::Consumer> {
        Ok(InMemoryConsumer {
            state: self.queue(queue),
        })
    }
}

/// A competing consumer over one in-memory queue.
///
/// The subscription never closes on its own, so `next` never yields
/// `Ok(None)`; workers stop it through their shutdown signal instead.
pub struct InMemoryConsumer {
    state: Arc<QueueState>,
}

#[async_trait]
impl BusConsumer for InMemoryConsumer {
    async fn next(&mut self) -> BusResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self
                .state
                .pending
                .lock()
                .expect("Mutex poisoned")
                .pop_front()
            {
                return Ok(Some(delivery));
            }
            self.state.notify.notified().await;
        }
    }

    async fn ack(&mut self, _delivery: &Delivery) -> BusResult<()> {
        // The delivery was already removed from the queue at pull time.
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery, requeue: bool) -> BusResult<()> {
        if requeue {
            self.state
                .pending
                .lock()
                .expect("Mutex poisoned")
                .push_back(Delivery {
                    envelope: delivery.envelope.clone(),
                    attempt: delivery.attempt + 1,
                });
            self.state.notify.notify_one();
        } else {
            self.state
                .dead_letters
                .lock()
                .expect("Mutex poisoned")
                .push(delivery.envelope.clone());
        }
        Ok(())
    }
}
