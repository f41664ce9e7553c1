//! The order aggregate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shopstream::errors::{CommandResult, ValidationError};
use shopstream::event::PendingEvent;
use shopstream::store::Aggregate;
use shopstream::types::{AggregateId, StreamPosition, Timestamp};

use crate::events::{OrderCreatedV1, OrderDeliveryAddressChangedV1};
use crate::types::{order_total, CustomerEmail, DeliveryAddress, OrderId, ShopItem};

/// Converts an order id into the aggregate id keying its stream.
pub fn order_aggregate_id(order_id: &OrderId) -> AggregateId {
    AggregateId::try_new(order_id.as_ref()).expect("an order id is a valid aggregate id")
}

/// A customer order, the consistency boundary of the orders service.
///
/// State changes are raised as domain events held on the aggregate until
/// a repository drains them at save time.
#[derive(Debug, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,
    version: StreamPosition,
    order_id: OrderId,
    items: Vec<ShopItem>,
    account_email: CustomerEmail,
    delivery_address: DeliveryAddress,
    total_price: Decimal,
    created_at: Timestamp,
    #[serde(skip)]
    pending: Vec<PendingEvent>,
}

impl Order {
    /// Creates a new order, raising [`OrderCreatedV1`].
    ///
    /// Rejects an empty item list; every other field was already parsed
    /// into a valid value type at the edge.
    pub fn create(
        order_id: OrderId,
        items: Vec<ShopItem>,
        account_email: CustomerEmail,
        delivery_address: DeliveryAddress,
    ) -> CommandResult<Self> {
        if items.is_empty() {
            return Err(ValidationError::Empty { field: "items" }.into());
        }

        let total_price = order_total(&items);
        let mut order = Self {
            id: order_aggregate_id(&order_id),
            version: StreamPosition::initial(),
            order_id: order_id.clone(),
            items: items.clone(),
            account_email: account_email.clone(),
            delivery_address: delivery_address.clone(),
            total_price,
            created_at: Timestamp::now(),
            pending: Vec::new(),
        };
        order.pending.push(PendingEvent::of(&OrderCreatedV1 {
            order_id,
            items,
            account_email,
            delivery_address,
            total_price,
        })?);
        Ok(order)
    }

    /// Changes the delivery address, raising [`OrderDeliveryAddressChangedV1`].
    pub fn change_delivery_address(
        &mut self,
        delivery_address: DeliveryAddress,
    ) -> CommandResult<()> {
        self.delivery_address = delivery_address.clone();
        self.pending
            .push(PendingEvent::of(&OrderDeliveryAddressChangedV1 {
                order_id: self.order_id.clone(),
                delivery_address,
            })?);
        Ok(())
    }

    /// The order's id.
    pub const fn order_id(&self) -> &OrderId {
        &self.order_id
    }

    /// The ordered lines.
    pub fn items(&self) -> &[ShopItem] {
        &self.items
    }

    /// The current delivery address.
    pub const fn delivery_address(&self) -> &DeliveryAddress {
        &self.delivery_address
    }

    /// Sum of the line totals.
    pub const fn total_price(&self) -> Decimal {
        self.total_price
    }
}

impl Aggregate for Order {
    const AGGREGATE_TYPE: &'static str = "order";

    fn aggregate_id(&self) -> &AggregateId {
        &self.id
    }

    fn version(&self) -> StreamPosition {
        self.version
    }

    fn set_version(&mut self, version: StreamPosition) {
        self.version = version;
    }

    fn take_uncommitted(&mut self) -> Vec<PendingEvent> {
        std::mem::take(&mut self.pending)
    }
}
