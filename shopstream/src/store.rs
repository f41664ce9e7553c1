//! Persistence contracts consumed by the unit of work.
//!
//! The store collaborator supplies transactions and per-aggregate
//! repositories; the unit of work owns one session per logical operation
//! and is the only place these contracts are exercised on the write side.

use async_trait::async_trait;

use crate::errors::StoreResult;
use crate::event::{PendingEvent, RecordedEvent};
use crate::types::{AggregateId, StreamPosition};

/// A store that can open transactional sessions.
#[async_trait]
pub trait TransactionalStore: Send + Sync {
    /// The session type for one transaction.
    type Session: StoreSession;

    /// Begins a new transaction.
    async fn begin(&self) -> StoreResult<Self::Session>;
}

/// One write-side transaction.
///
/// A session is completed exactly once, by `commit` or `rollback`; both
/// consume it. Dropping an uncompleted session must behave like rollback —
/// staged writes never become visible. This is what makes caller-side
/// cancellation (dropping the future mid-transaction) safe.
#[async_trait]
pub trait StoreSession: Send {
    /// Durably applies all staged writes. Optimistic concurrency checks
    /// that fail here surface as `StoreError::VersionConflict`.
    async fn commit(self) -> StoreResult<()>;

    /// Discards all staged writes.
    async fn rollback(self) -> StoreResult<()>;
}

/// An entity mutated exclusively inside one unit-of-work transaction.
///
/// An aggregate owns the domain events it raises until the transaction
/// commits; repositories drain them at save time via `take_uncommitted`.
pub trait Aggregate: Send {
    /// Stable type name, used to namespace storage keys.
    const AGGREGATE_TYPE: &'static str;

    /// The aggregate's identity.
    fn aggregate_id(&self) -> &AggregateId;

    /// Stream position of the last committed event, 0 for a fresh
    /// aggregate. The basis for optimistic concurrency.
    fn version(&self) -> StreamPosition;

    /// Advances the version after a save assigned positions.
    fn set_version(&mut self, version: StreamPosition);

    /// Drains the events raised since the last save, in raised order.
    fn take_uncommitted(&mut self) -> Vec<PendingEvent>;
}

/// A repository capability for one aggregate type, scoped to a session.
///
/// `save` drains the aggregate's uncommitted events, assigns gap-free
/// stream positions starting at `version + 1`, stages the state write, and
/// returns the recorded batch in raised order so the unit of work can
/// buffer it for publication after commit.
#[async_trait]
pub trait Repository<A: Aggregate>: Send {
    /// Loads an aggregate by id, `None` when it does not exist.
    async fn load(&mut self, id: &AggregateId) -> StoreResult<Option<A>>;

    /// Stages the aggregate's state and drained events for commit.
    async fn save(&mut self, aggregate: &mut A) -> StoreResult<Vec<RecordedEvent>>;
}

/// Assigns positions to an aggregate's drained events and bumps its
/// version. Shared by repository implementations so the gap-free numbering
/// rule lives in one place.
pub fn record_pending<A: Aggregate>(aggregate: &mut A) -> Vec<RecordedEvent> {
    let mut position = aggregate.version();
    let recorded: Vec<RecordedEvent> = aggregate
        .take_uncommitted()
        .into_iter()
        .map(|pending| {
            position = position.next();
            RecordedEvent {
                aggregate_id: aggregate.aggregate_id().clone(),
                position,
                event_type: pending.event_type,
                payload: pending.payload,
                occurred_at: pending.occurred_at,
            }
        })
        .collect();
    aggregate.set_version(position);
    recorded
}
