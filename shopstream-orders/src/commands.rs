//! Order commands and their handlers.
//!
//! Handlers run inside the unit of work: load through a repository, mutate
//! the aggregate, save, and stage the recorded events for publication
//! after commit. The handlers here are wired against the in-memory
//! adapters; a persistent deployment swaps the store and bus types at the
//! composition root.

use async_trait::async_trait;
use tracing::debug;

use shopstream::errors::{CommandError, CommandResult, ValidationError};
use shopstream::mediator::{Request, RequestContext, RequestHandler};
use shopstream::store::{Aggregate, Repository};
use shopstream::uow::UnitOfWork;
use shopstream_memory::{InMemoryBus, InMemoryStore, MemoryRepository};

use crate::order::{order_aggregate_id, Order};
use crate::types::{CustomerEmail, DeliveryAddress, OrderId, ShopItem};

/// The unit of work type the order handlers run on.
pub type OrderUnitOfWork = UnitOfWork<InMemoryStore, InMemoryBus>;

/// Creates a new order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// Id for the new order.
    pub order_id: OrderId,
    /// The ordered lines, non-empty.
    pub items: Vec<ShopItem>,
    /// The buying customer's email.
    pub account_email: CustomerEmail,
    /// Where to deliver.
    pub delivery_address: DeliveryAddress,
}

impl Request for CreateOrder {
    type Response = OrderId;

    fn name() -> &'static str {
        "CreateOrder"
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.items.is_empty() {
            return Err(ValidationError::Empty { field: "items" });
        }
        Ok(())
    }
}

/// Handles [`CreateOrder`].
pub struct CreateOrderHandler {
    uow: OrderUnitOfWork,
}

impl CreateOrderHandler {
    /// Creates the handler over a unit of work.
    pub const fn new(uow: OrderUnitOfWork) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl RequestHandler<CreateOrder> for CreateOrderHandler {
    async fn handle(&self, ctx: &RequestContext, request: CreateOrder) -> CommandResult<OrderId> {
        let order_id = request.order_id.clone();
        self.uow
            .execute(ctx, move |scope| {
                Box::pin(async move {
                    let aggregate_id = order_aggregate_id(&request.order_id);
                    let mut repo = MemoryRepository::<Order>::new(scope.session());
                    if let Some(existing) = repo.load(&aggregate_id).await? {
                        return Err(CommandError::Conflict {
                            aggregate_id,
                            expected: shopstream::types::StreamPosition::initial(),
                            current: existing.version(),
                        });
                    }

                    let mut order = Order::create(
                        request.order_id,
                        request.items,
                        request.account_email,
                        request.delivery_address,
                    )?;
                    let recorded = repo.save(&mut order).await?;
                    scope.stage(recorded);
                    Ok(())
                })
            })
            .await?;
        debug!(order_id = %order_id, "order created");
        Ok(order_id)
    }
}

/// Changes an existing order's delivery address.
#[derive(Debug, Clone)]
pub struct ChangeDeliveryAddress {
    /// The order to update.
    pub order_id: OrderId,
    /// The new delivery address.
    pub delivery_address: DeliveryAddress,
}

impl Request for ChangeDeliveryAddress {
    type Response = ();

    fn name() -> &'static str {
        "ChangeDeliveryAddress"
    }
}

/// Handles [`ChangeDeliveryAddress`].
pub struct ChangeDeliveryAddressHandler {
    uow: OrderUnitOfWork,
}

impl ChangeDeliveryAddressHandler {
    /// Creates the handler over a unit of work.
    pub const fn new(uow: OrderUnitOfWork) -> Self {
        Self { uow }
    }
}

#[async_trait]
impl RequestHandler<ChangeDeliveryAddress> for ChangeDeliveryAddressHandler {
    async fn handle(
        &self,
        ctx: &RequestContext,
        request: ChangeDeliveryAddress,
    ) -> CommandResult<()> {
        self.uow
            .execute(ctx, move |scope| {
                Box::pin(async move {
                    let aggregate_id = order_aggregate_id(&request.order_id);
                    let mut repo = MemoryRepository::<Order>::new(scope.session());
                    let mut order = repo.load(&aggregate_id).await?.ok_or_else(|| {
                        CommandError::BusinessRuleViolation(format!(
                            "order '{}' does not exist",
                            request.order_id
                        ))
                    })?;

                    order.change_delivery_address(request.delivery_address)?;
                    let recorded = repo.save(&mut order).await?;
                    scope.stage(recorded);
                    Ok(())
                })
            })
            .await
    }
}
