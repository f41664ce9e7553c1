//! Long-lived bus consumer worker driving a projection.
//!
//! A worker pulls one envelope at a time, asks the projection to apply it,
//! and acknowledges only after the projection succeeded. Failures follow
//! the bounded-retry contract: nack-with-requeue up to `max_attempts`
//! (with jittered delay between attempts), then nack-without-requeue so
//! the bus dead-letters the message, and the worker moves on — a poison
//! message never blocks other aggregates' messages and never crashes the
//! worker process.
//!
//! Shutdown is graceful: on the stop signal the worker finishes the
//! in-flight delivery (including its ack/nack) before releasing the
//! subscription. The stop signal can only interrupt the idle pull, never
//! a partially-applied projection mutation.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::bus::{BusConsumer, Delivery};
use crate::projection::Projection;

/// Tuning knobs for a consumer worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Delivery attempts before a message is dead-lettered.
    pub max_attempts: u32,
    /// Base delay before requeueing a failed message.
    pub retry_delay: Duration,
    /// Upper bound of the random jitter added to `retry_delay`.
    pub retry_jitter: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(100),
            retry_jitter: Duration::from_millis(50),
        }
    }
}

/// A worker binding one projection to one bus subscription.
///
/// Multiple workers may be spawned on the same queue for scale-out; the
/// projection's idempotence covers the rare duplicate delivery during
/// rebalancing.
pub struct ConsumerWorker<P: Projection> {
    projection: Arc<P>,
    config: WorkerConfig,
}

impl<P: Projection + 'static> ConsumerWorker<P> {
    /// Creates a worker over a projection with default config.
    pub fn new(projection: Arc<P>) -> Self {
        Self {
            projection,
            config: WorkerConfig::default(),
        }
    }

    /// Replaces the worker config.
    #[must_use]
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawns the worker loop on a consumer. Runs until the handle's
    /// shutdown is invoked or the subscription closes.
    pub fn spawn<C: BusConsumer + 'static>(self, consumer: C) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(
            self.projection,
            self.config,
            consumer,
            shutdown_rx,
        ));
        WorkerHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Controls a spawned worker.
pub struct WorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals the worker to stop and waits for it to finish its in-flight
    /// delivery and release the subscription.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            // The worker may have already exited (closed subscription).
            let _ = tx.send(());
        }
        if let Err(err) = self.task.await {
            error!(error = %err, "worker task panicked or was aborted");
        }
    }
}

async fn run_loop<P: Projection, C: BusConsumer>(
    projection: Arc<P>,
    config: WorkerConfig,
    mut consumer: C,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!("consumer worker started");
    loop {
        let delivery = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("stop signal received, releasing subscription");
                break;
            }
            pulled = consumer.next() => pulled,
        };

        match delivery {
            Ok(Some(delivery)) => {
                handle_delivery(&*projection, &config, &mut consumer, delivery).await;
            }
            Ok(None) => {
                info!("subscription closed, worker exiting");
                break;
            }
            Err(err) => {
                warn!(error = %err, "pull failed, backing off");
                time::sleep(config.retry_delay).await;
            }
        }
    }
}

async fn handle_delivery<P: Projection, C: BusConsumer>(
    projection: &P,
    config: &WorkerConfig,
    consumer: &mut C,
    delivery: Delivery,
) {
    let envelope = &delivery.envelope;
    match projection.process_event(envelope).await {
        Ok(()) => {
            debug!(
                message_id = %envelope.message_id,
                aggregate_id = %envelope.aggregate_id,
                position = %envelope.position,
                attempt = delivery.attempt,
                "event applied"
            );
            if let Err(err) = consumer.ack(&delivery).await {
                error!(message_id = %envelope.message_id, error = %err, "ack failed");
            }
        }
        Err(projection_err) if delivery.attempt >= config.max_attempts => {
            error!(
                message_id = %envelope.message_id,
                aggregate_id = %envelope.aggregate_id,
                position = %envelope.position,
                attempt = delivery.attempt,
                error = %projection_err,
                "retries exhausted, dead-lettering message"
            );
            if let Err(err) = consumer.nack(&delivery, false).await {
                error!(message_id = %envelope.message_id, error = %err, "dead-letter nack failed");
            }
        }
        Err(projection_err) => {
            warn!(
                message_id = %envelope.message_id,
                aggregate_id = %envelope.aggregate_id,
                position = %envelope.position,
                attempt = delivery.attempt,
                error = %projection_err,
                "projection failed, requeueing for redelivery"
            );
            time::sleep(delay_with_jitter(config)).await;
            if let Err(err) = consumer.nack(&delivery, true).await {
                error!(message_id = %envelope.message_id, error = %err, "requeue nack failed");
            }
        }
    }
}

fn delay_with_jitter(config: &WorkerConfig) -> Duration {
    let jitter_bound = config.retry_jitter.as_millis().min(u128::from(u64::MAX));
    let jitter_ms = if jitter_bound == 0 {
        0
    } else {
        rand::rng().random_range(0..=jitter_bound as u64)
    };
    config.retry_delay + Duration::from_millis(jitter_ms)
}
