//! Read-model storage and the checkpointed idempotence helper.
//!
//! Read models are denormalized documents keyed by aggregate id, written
//! only by projections and read only by query handlers. Each document is
//! stored together with the highest stream position the owning projection
//! has applied to it; [`apply_at`] uses that checkpoint to make replays
//! and duplicate deliveries no-ops.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::errors::{ProjectionError, ProjectionResult};
use crate::types::StreamPosition;

/// A read-model document plus the checkpoint of the last applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<M> {
    /// Highest stream position durably applied to this document.
    pub position: StreamPosition,
    /// The document itself.
    pub model: M,
}

/// Storage for one read-model type.
///
/// Only projections write here; the synchronous query path only reads.
#[async_trait]
pub trait ReadModelStore<M: Send + Sync>: Send + Sync {
    /// Retrieves a document by aggregate id.
    async fn get(&self, id: &str) -> ProjectionResult<Option<Versioned<M>>>;

    /// Stores or replaces a document.
    async fn upsert(&self, id: &str, model: Versioned<M>) -> ProjectionResult<()>;

    /// Deletes a document. Succeeds even if it does not exist.
    async fn delete(&self, id: &str) -> ProjectionResult<()>;

    /// Deletes all documents. Used when rebuilding a projection.
    async fn clear(&self) -> ProjectionResult<()>;

    /// Number of stored documents.
    async fn count(&self) -> ProjectionResult<usize>;
}

/// Applies one event to a document at the given stream position, exactly
/// once.
///
/// If the stored checkpoint is already at or past `position` the event is
/// a duplicate (redelivery, rebalancing) and is skipped. Otherwise `f`
/// folds the event into the current document (`None` on first event) and
/// the result is stored together with the new checkpoint.
///
/// The check and the upsert are two separate store calls, not one atomic
/// operation. Two workers applying *different* positions for the same
/// aggregate concurrently can interleave between them, and the later
/// upsert wins the checkpoint. Duplicates of the *same* position still
/// converge regardless of interleaving. Run a single consumer per queue,
/// or partition deliveries so one aggregate is only ever processed by one
/// worker at a time.
pub async fn apply_at<M, S, F>(
    store: &S,
    id: &str,
    position: StreamPosition,
    f: F,
) -> ProjectionResult<()>
where
    M: Send + Sync,
    S: ReadModelStore<M>,
    F: FnOnce(Option<M>) -> ProjectionResult<M> + Send,
{
    let current = store.get(id).await?;
    if let Some(existing) = &current {
        if existing.position >= position {
            trace!(
                id,
                position = %position,
                applied = %existing.position,
                "event at or below checkpoint, skipping"
            );
            return Ok(());
        }
    }

    let model = f(current.map(|v| v.model))?;
    store.upsert(id, Versioned { position, model }).await
}

/// Deletes a document in response to a deletion event, exactly once.
///
/// A duplicate deletion (the document is already gone) is a no-op.
pub async fn delete_at<M, S>(store: &S, id: &str, position: StreamPosition) -> ProjectionResult<()>
where
    M: Send + Sync,
    S: ReadModelStore<M>,
{
    match store.get(id).await? {
        Some(existing) if existing.position >= position => {
            trace!(id, position = %position, "deletion at or below checkpoint, skipping");
            Ok(())
        }
        Some(_) => store.delete(id).await,
        None => Ok(()),
    }
}

/// Thread-safe in-memory read-model store for testing and development.
pub struct InMemoryReadModelStore<M> {
    models: Arc<RwLock<HashMap<String, Versioned<M>>>>,
}

impl<M> InMemoryReadModelStore<M> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<M> Default for InMemoryReadModelStore<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for InMemoryReadModelStore<M> {
    fn clone(&self) -> Self {
        Self {
            models: Arc::clone(&self.models),
        }
    }
}

#[async_trait]
impl<M> ReadModelStore<M> for InMemoryReadModelStore<M>
where
    M: Clone + Send + Sync + 'static,
{
    async fn get(&self, id: &str) -> ProjectionResult<Option<Versioned<M>>> {
        Ok(self
            .models
            .read()
            .map_err(|e| ProjectionError::Store(format!("lock poisoned: {e}")))?
            .get(id)
            .cloned())
    }

    async fn upsert(&self, id: &str, model: Versioned<M>) -> ProjectionResult<()> {
        self.models
            .write()
            .map_err(|e| ProjectionError::Store(format!("lock poisoned: {e}")))?
            .insert(id.to_string(), model);
        Ok(())
    }

    async fn delete(&self, id: &str) -> ProjectionResult<()> {
        self.models
            .write()
            .map_err(|e| ProjectionError::Store(format!("lock poisoned: {e}")))?
            .remove(id);
        Ok(())
    }

    async fn clear(&self) -> ProjectionResult<()> {
        self.models
            .write()
            .map_err(|e| ProjectionError::Store(format!("lock poisoned: {e}")))?
            .clear();
        Ok(())
    }

    async fn count(&self) -> ProjectionResult<usize> {
        Ok(self
            .models
            .read()
            .map_err(|e| ProjectionError::Store(format!("lock poisoned: {e}")))?
            .len())
    }
}
