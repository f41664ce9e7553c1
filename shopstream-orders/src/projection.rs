//! The order read model and the projection maintaining it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shopstream::errors::ProjectionError;
use shopstream::projection::{EventContext, ProjectionRegistry};
use shopstream::read_model::{apply_at, ReadModelStore};
use shopstream::types::Timestamp;

use crate::events::{OrderCreatedV1, OrderDeliveryAddressChangedV1};
use crate::types::{CustomerEmail, DeliveryAddress, OrderId, ShopItem};

/// The denormalized order document served to queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderReadModel {
    /// The order's id.
    pub order_id: OrderId,
    /// The ordered lines.
    pub items: Vec<ShopItem>,
    /// The buying customer's email.
    pub account_email: CustomerEmail,
    /// The current delivery address.
    pub delivery_address: DeliveryAddress,
    /// Sum of the line totals.
    pub total_price: Decimal,
    /// When the order was created on the write side.
    pub created_at: Timestamp,
}

/// Registers the order projection handlers on a registry.
///
/// Both handlers go through [`apply_at`], so a redelivered envelope at or
/// below the stored checkpoint is a no-op.
pub fn order_projection<S>(registry: ProjectionRegistry, store: S) -> ProjectionRegistry
where
    S: ReadModelStore<OrderReadModel> + Clone + 'static,
{
    let created_store = store.clone();
    registry
        .on(move |ctx: EventContext, event: OrderCreatedV1| {
            let store = created_store.clone();
            async move {
                apply_at(&store, ctx.aggregate_id.as_ref(), ctx.position, |_| {
                    Ok(OrderReadModel {
                        order_id: event.order_id,
                        items: event.items,
                        account_email: event.account_email,
                        delivery_address: event.delivery_address,
                        total_price: event.total_price,
                        created_at: ctx.occurred_at,
                    })
                })
                .await
            }
        })
        .on(move |ctx: EventContext, event: OrderDeliveryAddressChangedV1| {
            let store = store.clone();
            async move {
                apply_at(&store, ctx.aggregate_id.as_ref(), ctx.position, |existing| {
                    let mut model = existing.ok_or_else(|| ProjectionError::Apply {
                        message_id: ctx.message_id,
                        reason: format!("address change for unknown order '{}'", event.order_id),
                    })?;
                    model.delivery_address = event.delivery_address;
                    Ok(model)
                })
                .await
            }
        })
}
