//! End-to-end tests of the write/read consistency pipeline.
//!
//! Each test assembles the full stack: mediator with behaviors, unit of
//! work over the in-memory store, event publisher on the in-memory bus,
//! and a consumer worker driving the order projection into a read-model
//! store.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use shopstream::bus::MessageBus;
use shopstream::consumer::{ConsumerWorker, WorkerConfig, WorkerHandle};
use shopstream::errors::{CommandError, CommandResult, ProjectionResult};
use shopstream::event::{DomainEvent, EventEnvelope, PendingEvent, RecordedEvent};
use shopstream::mediator::{
    LoggingBehavior, Mediator, MediatorBuilder, RequestContext, ValidationBehavior,
};
use shopstream::metadata::MessageMetadata;
use shopstream::projection::ProjectionRegistry;
use shopstream::publisher::EventPublisher;
use shopstream::read_model::{InMemoryReadModelStore, ReadModelStore, Versioned};
use shopstream::store::Repository;
use shopstream::types::{AggregateId, EventType, QueueName, StreamPosition, Timestamp};
use shopstream::uow::UnitOfWork;
use shopstream_memory::{InMemoryBus, InMemoryStore, MemoryRepository};
use shopstream_orders::order::order_aggregate_id;
use shopstream_orders::types::{
    CustomerEmail, DeliveryAddress, ItemTitle, OrderId, Price, Quantity, ShopItem,
};
use shopstream_orders::{
    order_projection, ChangeDeliveryAddress, ChangeDeliveryAddressHandler, CreateOrder,
    CreateOrderHandler, GetOrderById, GetOrderByIdHandler, Order, OrderCreatedV1, OrderReadModel,
    OrderUnitOfWork,
};

struct Pipeline {
    mediator: Mediator,
    uow: OrderUnitOfWork,
    store: InMemoryStore,
    bus: InMemoryBus,
    read_store: InMemoryReadModelStore<OrderReadModel>,
    queue: QueueName,
}

fn pipeline() -> Pipeline {
    let store = InMemoryStore::new();
    let bus = InMemoryBus::new();
    let queue = QueueName::try_new("orders").unwrap();
    let publisher = Arc::new(EventPublisher::new(Arc::new(bus.clone()), queue.clone()));
    let uow = UnitOfWork::new(Arc::new(store.clone()), publisher);
    let read_store = InMemoryReadModelStore::new();

    let mediator = MediatorBuilder::new()
        .behavior(LoggingBehavior)
        .behavior(ValidationBehavior)
        .register::<CreateOrder, _>(CreateOrderHandler::new(uow.clone()))
        .unwrap()
        .register::<ChangeDeliveryAddress, _>(ChangeDeliveryAddressHandler::new(uow.clone()))
        .unwrap()
        .register::<GetOrderById, _>(GetOrderByIdHandler::new(read_store.clone()))
        .unwrap()
        .build();

    Pipeline {
        mediator,
        uow,
        store,
        bus,
        read_store,
        queue,
    }
}

fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        max_attempts: 3,
        retry_delay: Duration::from_millis(1),
        retry_jitter: Duration::from_millis(0),
    }
}

async fn spawn_worker<S>(pipeline: &Pipeline, read_store: S) -> WorkerHandle
where
    S: ReadModelStore<OrderReadModel> + Clone + 'static,
{
    let registry = order_projection(ProjectionRegistry::new(), read_store);
    let consumer = pipeline.bus.subscribe(&pipeline.queue).await.unwrap();
    ConsumerWorker::new(Arc::new(registry))
        .with_config(fast_worker_config())
        .spawn(consumer)
}

async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within the deadline");
}

fn items() -> Vec<ShopItem> {
    vec![
        ShopItem {
            title: ItemTitle::try_new("keyboard").unwrap(),
            quantity: Quantity::try_new(2).unwrap(),
            price: Price::try_new(dec!(49.50)).unwrap(),
        },
        ShopItem {
            title: ItemTitle::try_new("mouse").unwrap(),
            quantity: Quantity::try_new(1).unwrap(),
            price: Price::try_new(dec!(25.00)).unwrap(),
        },
    ]
}

fn create_order(order_id: &OrderId) -> CreateOrder {
    CreateOrder {
        order_id: order_id.clone(),
        items: items(),
        account_email: CustomerEmail::try_new("buyer@example.com").unwrap(),
        delivery_address: DeliveryAddress::try_new("1 Main St").unwrap(),
    }
}

#[tokio::test]
async fn create_order_flows_from_command_to_query() {
    let pipeline = pipeline();
    let worker = spawn_worker(&pipeline, pipeline.read_store.clone()).await;
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    let returned = pipeline
        .mediator
        .send(&ctx, create_order(&order_id))
        .await
        .unwrap();
    assert_eq!(returned, order_id);

    let read_store = pipeline.read_store.clone();
    let key = order_id.to_string();
    wait_until(|| {
        let read_store = read_store.clone();
        let key = key.clone();
        async move { read_store.get(&key).await.unwrap().is_some() }
    })
    .await;

    let model = pipeline
        .mediator
        .send(&ctx, GetOrderById { order_id })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(model.total_price, dec!(124.00));
    assert_eq!(model.items.len(), 2);
    assert_eq!(model.delivery_address.as_ref(), "1 Main St");

    worker.shutdown().await;
}

#[tokio::test]
async fn two_events_from_one_unit_of_work_arrive_in_order() {
    let pipeline = pipeline();
    let worker = spawn_worker(&pipeline, pipeline.read_store.clone()).await;
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    // One transaction raising both events: created at position 1, the
    // address change at position 2, published as one ordered batch.
    pipeline
        .uow
        .execute(&ctx, |scope| {
            let order_id = order_id.clone();
            Box::pin(async move {
                let mut repo = MemoryRepository::<Order>::new(scope.session());
                let mut order = Order::create(
                    order_id,
                    items(),
                    CustomerEmail::try_new("buyer@example.com").unwrap(),
                    DeliveryAddress::try_new("1 Main St").unwrap(),
                )?;
                order.change_delivery_address(DeliveryAddress::try_new("2 Oak Ave").unwrap())?;
                let recorded = repo.save(&mut order).await?;
                scope.stage(recorded);
                Ok(())
            })
        })
        .await
        .unwrap();

    let read_store = pipeline.read_store.clone();
    let key = order_id.to_string();
    wait_until(|| {
        let read_store = read_store.clone();
        let key = key.clone();
        async move {
            read_store
                .get(&key)
                .await
                .unwrap()
                .is_some_and(|stored| u64::from(stored.position) == 2)
        }
    })
    .await;

    let stored = pipeline.read_store.get(&order_id.to_string()).await.unwrap().unwrap();
    assert_eq!(stored.model.delivery_address.as_ref(), "2 Oak Ave");

    worker.shutdown().await;
}

#[tokio::test]
async fn redelivered_envelope_leaves_the_read_model_unchanged() {
    let pipeline = pipeline();
    let worker = spawn_worker(&pipeline, pipeline.read_store.clone()).await;
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    pipeline
        .mediator
        .send(&ctx, create_order(&order_id))
        .await
        .unwrap();
    pipeline
        .mediator
        .send(
            &ctx,
            ChangeDeliveryAddress {
                order_id: order_id.clone(),
                delivery_address: DeliveryAddress::try_new("2 Oak Ave").unwrap(),
            },
        )
        .await
        .unwrap();

    let read_store = pipeline.read_store.clone();
    let key = order_id.to_string();
    wait_until(|| {
        let read_store = read_store.clone();
        let key = key.clone();
        async move {
            read_store
                .get(&key)
                .await
                .unwrap()
                .is_some_and(|stored| u64::from(stored.position) == 2)
        }
    })
    .await;

    // Redeliver the position-1 created event with a stale address, as a
    // crashed broker would after losing an ack.
    let stale = OrderCreatedV1 {
        order_id: order_id.clone(),
        items: items(),
        account_email: CustomerEmail::try_new("buyer@example.com").unwrap(),
        delivery_address: DeliveryAddress::try_new("1 Main St").unwrap(),
        total_price: dec!(124.00),
    };
    let pending = PendingEvent::of(&stale).unwrap();
    let envelope = EventEnvelope::wrap(
        RecordedEvent {
            aggregate_id: order_aggregate_id(&order_id),
            position: StreamPosition::new(1),
            event_type: pending.event_type,
            payload: pending.payload,
            occurred_at: pending.occurred_at,
        },
        MessageMetadata::new(),
    );
    pipeline.bus.publish(&pipeline.queue, &envelope).await.unwrap();

    // Give the worker time to pull and discard the duplicate.
    let bus = pipeline.bus.clone();
    let queue = pipeline.queue.clone();
    wait_until(|| {
        let bus = bus.clone();
        let queue = queue.clone();
        async move { bus.pending_count(&queue) == 0 }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stored = pipeline.read_store.get(&order_id.to_string()).await.unwrap().unwrap();
    assert_eq!(u64::from(stored.position), 2);
    assert_eq!(stored.model.delivery_address.as_ref(), "2 Oak Ave");

    worker.shutdown().await;
}

#[tokio::test]
async fn rolled_back_transaction_publishes_nothing() {
    let pipeline = pipeline();
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    let result: CommandResult<()> = pipeline
        .uow
        .execute(&ctx, |scope| {
            let order_id = order_id.clone();
            Box::pin(async move {
                let mut repo = MemoryRepository::<Order>::new(scope.session());
                let mut order = Order::create(
                    order_id,
                    items(),
                    CustomerEmail::try_new("buyer@example.com").unwrap(),
                    DeliveryAddress::try_new("1 Main St").unwrap(),
                )?;
                let recorded = repo.save(&mut order).await?;
                scope.stage(recorded);
                Err(CommandError::BusinessRuleViolation(
                    "payment declined".to_string(),
                ))
            })
        })
        .await;

    assert!(matches!(result, Err(CommandError::BusinessRuleViolation(_))));
    assert_eq!(pipeline.bus.pending_count(&pipeline.queue), 0);
    assert!(pipeline
        .store
        .committed_version::<Order>(&order_aggregate_id(&order_id))
        .is_none());
}

/// Read-model store decorator failing the first N upserts.
#[derive(Clone)]
struct FlakyReadStore {
    inner: InMemoryReadModelStore<OrderReadModel>,
    remaining_failures: Arc<AtomicUsize>,
}

#[async_trait]
impl ReadModelStore<OrderReadModel> for FlakyReadStore {
    async fn get(&self, id: &str) -> ProjectionResult<Option<Versioned<OrderReadModel>>> {
        self.inner.get(id).await
    }

    async fn upsert(&self, id: &str, model: Versioned<OrderReadModel>) -> ProjectionResult<()> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(shopstream::errors::ProjectionError::Store(
                "read store briefly unavailable".to_string(),
            ));
        }
        self.inner.upsert(id, model).await
    }

    async fn delete(&self, id: &str) -> ProjectionResult<()> {
        self.inner.delete(id).await
    }

    async fn clear(&self) -> ProjectionResult<()> {
        self.inner.clear().await
    }

    async fn count(&self) -> ProjectionResult<usize> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn transient_projection_failure_recovers_through_redelivery() {
    let pipeline = pipeline();
    let flaky = FlakyReadStore {
        inner: pipeline.read_store.clone(),
        remaining_failures: Arc::new(AtomicUsize::new(1)),
    };
    let worker = spawn_worker(&pipeline, flaky).await;
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    pipeline
        .mediator
        .send(&ctx, create_order(&order_id))
        .await
        .unwrap();

    let read_store = pipeline.read_store.clone();
    let key = order_id.to_string();
    wait_until(|| {
        let read_store = read_store.clone();
        let key = key.clone();
        async move { read_store.get(&key).await.unwrap().is_some() }
    })
    .await;

    assert!(pipeline.bus.dead_letters(&pipeline.queue).is_empty());
    worker.shutdown().await;
}

#[tokio::test]
async fn duplicate_handler_registration_fails_at_build_time() {
    let pipeline = pipeline();
    let result = MediatorBuilder::new()
        .register::<CreateOrder, _>(CreateOrderHandler::new(pipeline.uow.clone()))
        .unwrap()
        .register::<CreateOrder, _>(CreateOrderHandler::new(pipeline.uow.clone()));

    assert!(matches!(
        result,
        Err(shopstream::errors::MediatorError::DuplicateHandler(
            "CreateOrder"
        ))
    ));
}

#[tokio::test]
async fn poison_message_dead_letters_while_later_messages_process() {
    let pipeline = pipeline();
    let worker = spawn_worker(&pipeline, pipeline.read_store.clone()).await;
    let ctx = RequestContext::new();

    // A payload that carries the created-event tag but cannot decode.
    let poison = EventEnvelope::wrap(
        RecordedEvent {
            aggregate_id: AggregateId::try_new("poison-order").unwrap(),
            position: StreamPosition::new(1),
            event_type: EventType::try_new(OrderCreatedV1::EVENT_TYPE).unwrap(),
            payload: serde_json::json!({ "bogus": true }),
            occurred_at: Timestamp::now(),
        },
        MessageMetadata::new(),
    );
    pipeline.bus.publish(&pipeline.queue, &poison).await.unwrap();

    let order_id = OrderId::generate();
    pipeline
        .mediator
        .send(&ctx, create_order(&order_id))
        .await
        .unwrap();

    let read_store = pipeline.read_store.clone();
    let key = order_id.to_string();
    wait_until(|| {
        let read_store = read_store.clone();
        let key = key.clone();
        async move { read_store.get(&key).await.unwrap().is_some() }
    })
    .await;

    let bus = pipeline.bus.clone();
    let queue = pipeline.queue.clone();
    wait_until(|| {
        let bus = bus.clone();
        let queue = queue.clone();
        async move { !bus.dead_letters(&queue).is_empty() }
    })
    .await;

    let dead = pipeline.bus.dead_letters(&pipeline.queue);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message_id, poison.message_id);

    worker.shutdown().await;
}

#[tokio::test]
async fn concurrent_commands_on_different_aggregates_both_succeed() {
    let pipeline = pipeline();
    let worker = spawn_worker(&pipeline, pipeline.read_store.clone()).await;
    let ctx_a = RequestContext::new();
    let ctx_b = RequestContext::new();
    let order_a = OrderId::generate();
    let order_b = OrderId::generate();

    let (first, second) = tokio::join!(
        pipeline.mediator.send(&ctx_a, create_order(&order_a)),
        pipeline.mediator.send(&ctx_b, create_order(&order_b)),
    );
    first.unwrap();
    second.unwrap();

    let read_store = pipeline.read_store.clone();
    let (key_a, key_b) = (order_a.to_string(), order_b.to_string());
    wait_until(|| {
        let read_store = read_store.clone();
        let key_a = key_a.clone();
        let key_b = key_b.clone();
        async move {
            read_store.get(&key_a).await.unwrap().is_some()
                && read_store.get(&key_b).await.unwrap().is_some()
        }
    })
    .await;

    worker.shutdown().await;
}

#[tokio::test]
async fn duplicate_order_id_is_a_conflict() {
    let pipeline = pipeline();
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    pipeline
        .mediator
        .send(&ctx, create_order(&order_id))
        .await
        .unwrap();
    let result = pipeline.mediator.send(&ctx, create_order(&order_id)).await;

    assert!(matches!(result, Err(CommandError::Conflict { .. })));
}

#[tokio::test]
async fn empty_items_are_rejected_before_any_transaction() {
    let pipeline = pipeline();
    let ctx = RequestContext::new();
    let order_id = OrderId::generate();

    let mut command = create_order(&order_id);
    command.items.clear();
    let result = pipeline.mediator.send(&ctx, command).await;

    assert!(matches!(result, Err(CommandError::Validation(_))));
    assert!(pipeline
        .store
        .committed_version::<Order>(&order_aggregate_id(&order_id))
        .is_none());
    assert_eq!(pipeline.bus.pending_count(&pipeline.queue), 0);
}
