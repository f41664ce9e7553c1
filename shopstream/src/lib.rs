//! `ShopStream` - CQRS write/read consistency pipeline
//!
//! Commands flow through a mediator's behavior pipeline into a unit of
//! work, which commits aggregate changes transactionally and publishes
//! the recorded events to a message bus afterwards. Consumer workers pull
//! those events and apply them to read models through idempotent
//! projections, so queries served from the read side converge on the
//! write side's history even under redelivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod consumer;
pub mod errors;
pub mod event;
pub mod mediator;
pub mod metadata;
pub mod projection;
pub mod publisher;
pub mod read_model;
pub mod store;
pub mod types;
pub mod uow;
