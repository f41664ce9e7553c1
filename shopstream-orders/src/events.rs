//! Domain events raised by the order aggregate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use shopstream::event::DomainEvent;

use crate::types::{CustomerEmail, DeliveryAddress, OrderId, ShopItem};

/// An order was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedV1 {
    /// The new order's id.
    pub order_id: OrderId,
    /// The ordered lines, non-empty.
    pub items: Vec<ShopItem>,
    /// The buying customer's email.
    pub account_email: CustomerEmail,
    /// Where to deliver.
    pub delivery_address: DeliveryAddress,
    /// Sum of the line totals at creation time.
    pub total_price: Decimal,
}

impl DomainEvent for OrderCreatedV1 {
    const EVENT_TYPE: &'static str = "order.created.v1";
}

/// An order's delivery address was changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDeliveryAddressChangedV1 {
    /// The order being updated.
    pub order_id: OrderId,
    /// The new delivery address.
    pub delivery_address: DeliveryAddress,
}

impl DomainEvent for OrderDeliveryAddressChangedV1 {
    const EVENT_TYPE: &'static str = "order.delivery_address_changed.v1";
}
