//! Order domain value types with type-safe validation.
//!
//! Following "parse, don't validate": every value is checked at the edge
//! and illegal states are unrepresentable afterwards.

use nutype::nutype;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shopstream::errors::ValidationError;

/// Order identifier in UUID string form.
#[nutype(
    sanitize(trim),
    validate(not_empty, predicate = |s: &str| Uuid::parse_str(s).is_ok()),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Display,
        AsRef,
        Deref,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct OrderId(String);

impl OrderId {
    /// Generates a new time-ordered order id.
    pub fn generate() -> Self {
        Self::try_new(Uuid::now_v7().to_string()).expect("Uuid::now_v7() is a valid order id")
    }
}

/// Customer account email.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255, predicate = |s: &str| s.contains('@')),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Display,
        AsRef,
        Deref,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct CustomerEmail(String);

/// Free-form delivery address.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 500),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Display,
        AsRef,
        Deref,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct DeliveryAddress(String);

/// Title of a shop item line.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Display,
        AsRef,
        Deref,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct ItemTitle(String);

/// Quantity of one item line, at least 1.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct Quantity(u32);

/// Non-negative unit price.
#[nutype(
    validate(predicate = |p: &Decimal| !p.is_sign_negative()),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Display,
        Into,
        Serialize,
        Deserialize,
        TryFrom
    )
)]
pub struct Price(Decimal);

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    /// What is being bought.
    pub title: ItemTitle,
    /// How many, at least 1.
    pub quantity: Quantity,
    /// Unit price.
    pub price: Price,
}

impl ShopItem {
    /// The line total: unit price times quantity.
    pub fn total(&self) -> Decimal {
        let price: Decimal = self.price.into();
        let quantity: u32 = self.quantity.into();
        price * Decimal::from(quantity)
    }
}

/// Sum of the line totals of an order.
pub fn order_total(items: &[ShopItem]) -> Decimal {
    items.iter().map(ShopItem::total).sum()
}

impl From<OrderIdError> for ValidationError {
    fn from(err: OrderIdError) -> Self {
        Self::InvalidFormat {
            field: "order_id",
            reason: err.to_string(),
        }
    }
}

impl From<CustomerEmailError> for ValidationError {
    fn from(err: CustomerEmailError) -> Self {
        Self::InvalidFormat {
            field: "account_email",
            reason: err.to_string(),
        }
    }
}

impl From<DeliveryAddressError> for ValidationError {
    fn from(err: DeliveryAddressError) -> Self {
        Self::InvalidFormat {
            field: "delivery_address",
            reason: err.to_string(),
        }
    }
}

impl From<ItemTitleError> for ValidationError {
    fn from(err: ItemTitleError) -> Self {
        Self::InvalidFormat {
            field: "title",
            reason: err.to_string(),
        }
    }
}

impl From<QuantityError> for ValidationError {
    fn from(err: QuantityError) -> Self {
        Self::OutOfRange {
            field: "quantity",
            reason: err.to_string(),
        }
    }
}

impl From<PriceError> for ValidationError {
    fn from(err: PriceError) -> Self {
        Self::OutOfRange {
            field: "price",
            reason: err.to_string(),
        }
    }
}
