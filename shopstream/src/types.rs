//! Core identifier and counter types for the `ShopStream` pipeline.
//!
//! All types use smart constructors so that validity is established at
//! construction time, following the "parse, don't validate" principle.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one aggregate instance, the consistency boundary a single
/// transaction may mutate.
///
/// `AggregateId` values are guaranteed to be non-empty and at most 255
/// characters. Once constructed, an `AggregateId` is always valid.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateId(String);

/// A globally unique message identifier using UUIDv7 format.
///
/// Every publish of an envelope carries a `MessageId`; redelivery of the
/// same envelope reuses it, which is what lets consumers deduplicate.
/// UUIDv7 additionally gives a monotonic sort order for ids minted in
/// sequence.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new `MessageId` with the current timestamp.
    pub fn new() -> Self {
        // Uuid::now_v7() always returns a valid v7 UUID
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of an event within its aggregate's stream.
///
/// Position 0 means "nothing applied yet"; the first recorded event of a
/// stream is at position 1. Positions are strictly increasing and gap-free
/// per aggregate from the write side's perspective.
#[nutype(derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct StreamPosition(u64);

impl StreamPosition {
    /// The position of a stream before any event has been recorded.
    #[must_use]
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns the next position after this one.
    #[must_use]
    pub fn next(self) -> Self {
        let current: u64 = self.into();
        Self::new(current + 1)
    }
}

/// The type tag of a domain event, e.g. `order.created.v1`.
///
/// Tags are the key the projection registry dispatches on and the
/// discriminator the envelope carries for polymorphic decoding.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventType(String);

/// Name of a bus queue or subscription.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct QueueName(String);

/// A timestamp for when an event occurred.
///
/// Wrapper around `DateTime<Utc>` so timestamp handling stays consistent
/// across the write side, the envelope, and the projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Converts the timestamp into the underlying `DateTime`.
    pub const fn into_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl From<Timestamp> for DateTime<Utc> {
    fn from(timestamp: Timestamp) -> Self {
        timestamp.into_datetime()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
