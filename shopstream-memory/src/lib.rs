//! In-memory adapters for the `ShopStream` pipeline
//!
//! This crate provides in-memory implementations of the store and bus
//! contracts from the shopstream crate, useful for testing and development
//! scenarios where persistence and a broker are not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod bus;
mod store;

pub use bus::{InMemoryBus, InMemoryConsumer};
pub use store::{InMemoryStore, MemoryRepository, MemorySession};
