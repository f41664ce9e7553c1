//! Thread-safe in-memory transactional store.
//!
//! Aggregates are held as serialized JSON keyed by aggregate type and id,
//! each with the stream position of its last committed event. Sessions
//! buffer writes locally and apply them atomically at commit, after an
//! optimistic version check over the whole batch. Dropping a session
//! without committing discards everything it staged.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use shopstream::errors::{StoreError, StoreResult};
use shopstream::event::RecordedEvent;
use shopstream::store::{
    record_pending, Aggregate, Repository, StoreSession, TransactionalStore,
};
use shopstream::types::{AggregateId, StreamPosition};

struct StoredAggregate {
    version: StreamPosition,
    state: serde_json::Value,
}

struct StagedWrite {
    key: String,
    aggregate_id: AggregateId,
    expected: StreamPosition,
    new_version: StreamPosition,
    state: serde_json::Value,
}

type Shared = Arc<RwLock<HashMap<String, StoredAggregate>>>;

fn storage_key<A: Aggregate>(id: &AggregateId) -> String {
    format!("{}/{}", A::AGGREGATE_TYPE, id)
}

fn decode<A: DeserializeOwned>(state: &serde_json::Value) -> StoreResult<A> {
    serde_json::from_value(state.clone()).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Thread-safe in-memory transactional store for testing.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    aggregates: Shared,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed version of an aggregate, `None` when it has never
    /// been committed. Test introspection.
    pub fn committed_version<A: Aggregate>(&self, id: &AggregateId) -> Option<StreamPosition> {
        self.aggregates
            .read()
            .expect("RwLock poisoned")
            .get(&storage_key::<A>(id))
            .map(|stored| stored.version)
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    type Session = MemorySession;

    async fn begin(&self) -> StoreResult<Self::Session> {
        Ok(MemorySession {
            shared: Arc::clone(&self.aggregates),
            staged: Vec::new(),
        })
    }
}

/// One in-memory transaction.
///
/// Writes staged through a [`MemoryRepository`] are visible to subsequent
/// loads in the same session but invisible to everyone else until commit.
pub struct MemorySession {
    shared: Shared,
    staged: Vec<StagedWrite>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn commit(self) -> StoreResult<()> {
        let Self { shared, staged } = self;
        let mut map = shared.write().expect("RwLock poisoned");

        // Validate the whole batch before touching the map, tracking the
        // versions earlier writes in the same batch would produce.
        let mut effective: HashMap<&str, StreamPosition> = HashMap::new();
        for write in &staged {
            let current = effective
                .get(write.key.as_str())
                .copied()
                .or_else(|| map.get(&write.key).map(|stored| stored.version))
                .unwrap_or_else(StreamPosition::initial);
            if current != write.expected {
                return Err(StoreError::VersionConflict {
                    aggregate_id: write.aggregate_id.clone(),
                    expected: write.expected,
                    current,
                });
            }
            effective.insert(write.key.as_str(), write.new_version);
        }

        let writes = staged.len();
        for write in staged {
            map.insert(
                write.key,
                StoredAggregate {
                    version: write.new_version,
                    state: write.state,
                },
            );
        }
        debug!(writes, "transaction committed");
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        // Staged writes never touched the shared map; dropping is enough.
        Ok(())
    }
}

/// Repository over one aggregate type, scoped to a session.
pub struct MemoryRepository<'s, A> {
    session: &'s mut MemorySession,
    _aggregate: PhantomData<fn() -> A>,
}

impl<'s, A> MemoryRepository<'s, A> {
    /// Creates a repository staging into the given session.
    pub fn new(session: &'s mut MemorySession) -> Self {
        Self {
            session,
            _aggregate: PhantomData,
        }
    }
}

#[async_trait]
impl<A> Repository<A> for MemoryRepository<'_, A>
where
    A: Aggregate + Serialize + DeserializeOwned + 'static,
{
    async fn load(&mut self, id: &AggregateId) -> StoreResult<Option<A>> {
        let key = storage_key::<A>(id);

        // Read-your-writes within the transaction.
        if let Some(write) = self.session.staged.iter().rev().find(|w| w.key == key) {
            return Ok(Some(decode(&write.state)?));
        }

        let map = self.session.shared.read().expect("RwLock poisoned");
        map.get(&key).map(|stored| decode(&stored.state)).transpose()
    }

    async fn save(&mut self, aggregate: &mut A) -> StoreResult<Vec<RecordedEvent>> {
        let expected = aggregate.version();
        let recorded = record_pending(aggregate);
        if recorded.is_empty() {
            return Ok(recorded);
        }

        let state = serde_json::to_value(&*aggregate)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.session.staged.push(StagedWrite {
            key: storage_key::<A>(aggregate.aggregate_id()),
            aggregate_id: aggregate.aggregate_id().clone(),
            expected,
            new_version: aggregate.version(),
            state,
        });
        Ok(recorded)
    }
}
