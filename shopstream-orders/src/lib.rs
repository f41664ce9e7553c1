//! Orders service domain built on the `ShopStream` pipeline.
//!
//! Demonstrates the full write/read path: the `CreateOrder` and
//! `ChangeDeliveryAddress` commands mutate the [`order::Order`] aggregate
//! inside a unit of work, the raised events flow over the bus into the
//! order projection, and `GetOrderById` serves the resulting
//! [`projection::OrderReadModel`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod events;
pub mod order;
pub mod projection;
pub mod queries;
pub mod types;

pub use commands::{
    ChangeDeliveryAddress, ChangeDeliveryAddressHandler, CreateOrder, CreateOrderHandler,
    OrderUnitOfWork,
};
pub use events::{OrderCreatedV1, OrderDeliveryAddressChangedV1};
pub use order::Order;
pub use projection::{order_projection, OrderReadModel};
pub use queries::{GetOrderById, GetOrderByIdHandler};
