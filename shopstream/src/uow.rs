//! Unit of work: one write-side transaction plus its event side effects.
//!
//! `UnitOfWork::execute` wraps a caller-supplied action in a store session,
//! commits on success, rolls back on error, and only after the commit is
//! durable hands the buffered events to the publisher. An event is never
//! observable for data that did not persist.
//!
//! The inverse does not hold: a publish can fail after a successful commit.
//! That failure surfaces as [`CommandError::PublishAfterCommit`] carrying
//! the prepared envelopes — the write stands and the caller (or an
//! operator) replays the envelopes out-of-band. A transactional outbox
//! would close this gap; the minimal contract implemented here makes the
//! failure loud instead.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, error, instrument, warn};

use crate::bus::MessageBus;
use crate::errors::{CommandError, CommandResult};
use crate::event::RecordedEvent;
use crate::mediator::RequestContext;
use crate::publisher::EventPublisher;
use crate::store::{StoreSession, TransactionalStore};
use crate::types::MessageId;

tokio::task_local! {
    static IN_UNIT_OF_WORK: ();
}

/// The transaction-scoped context handed to a unit-of-work action.
///
/// Owns the store session and the buffer of events recorded during the
/// action. Repositories stage events through [`UowScope::stage`]; the
/// buffer is published, in staged order, after the commit succeeds.
pub struct UowScope<S> {
    session: S,
    events: Vec<RecordedEvent>,
}

impl<S> UowScope<S> {
    /// The underlying store session, for constructing repositories.
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }

    /// Buffers recorded events for publication after commit.
    pub fn stage(&mut self, events: Vec<RecordedEvent>) {
        self.events.extend(events);
    }

    /// The events staged so far, in staged order.
    pub fn staged(&self) -> &[RecordedEvent] {
        &self.events
    }
}

/// Coordinates one transaction per logical operation.
pub struct UnitOfWork<S: TransactionalStore, B: MessageBus> {
    store: Arc<S>,
    publisher: Arc<EventPublisher<B>>,
}

impl<S: TransactionalStore, B: MessageBus> Clone for UnitOfWork<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            publisher: Arc::clone(&self.publisher),
        }
    }
}

impl<S, B> UnitOfWork<S, B>
where
    S: TransactionalStore,
    B: MessageBus,
{
    /// Creates a unit of work over a store and a publisher.
    pub fn new(store: Arc<S>, publisher: Arc<EventPublisher<B>>) -> Self {
        Self { store, publisher }
    }

    /// Runs `action` inside a transaction.
    ///
    /// - begins a session before invoking `action`;
    /// - on action error: rolls back and returns the error — no state
    ///   change, nothing published;
    /// - on success: commits, then publishes the staged events;
    /// - publish failure after commit returns
    ///   [`CommandError::PublishAfterCommit`]; the commit is not undone;
    /// - re-entrant calls on the same task are a configuration error.
    ///
    /// Cancellation: dropping the returned future mid-action drops the
    /// uncommitted session, which discards all staged writes.
    #[instrument(skip_all, fields(correlation_id = %ctx.correlation_id()))]
    pub async fn execute<T, F>(&self, ctx: &RequestContext, action: F) -> CommandResult<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut UowScope<S::Session>) -> BoxFuture<'a, CommandResult<T>> + Send,
    {
        if IN_UNIT_OF_WORK.try_with(|()| ()).is_ok() {
            return Err(CommandError::Configuration(
                "nested unit of work: execute called inside an active transaction".to_string(),
            ));
        }

        IN_UNIT_OF_WORK
            .scope((), async {
                let session = self.store.begin().await.map_err(CommandError::from)?;
                let mut scope = UowScope {
                    session,
                    events: Vec::new(),
                };

                match action(&mut scope).await {
                    Ok(value) => {
                        let UowScope { session, events } = scope;
                        session.commit().await.map_err(CommandError::from)?;
                        debug!(events = events.len(), "transaction committed");
                        self.publish_after_commit(ctx, events).await?;
                        Ok(value)
                    }
                    Err(err) => {
                        let UowScope { session, .. } = scope;
                        if let Err(rollback_err) = session.rollback().await {
                            error!(error = %rollback_err, "rollback failed");
                        }
                        Err(err)
                    }
                }
            })
            .await
    }

    async fn publish_after_commit(
        &self,
        ctx: &RequestContext,
        events: Vec<RecordedEvent>,
    ) -> CommandResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let envelopes = self.publisher.prepare(events, ctx.metadata());
        match self.publisher.publish(envelopes).await {
            Ok(()) => Ok(()),
            Err(publish_err) => {
                let message_ids: Vec<MessageId> = publish_err
                    .envelopes
                    .iter()
                    .map(|e| e.message_id)
                    .collect();
                warn!(
                    correlation_id = %ctx.correlation_id(),
                    message_ids = ?message_ids,
                    error = %publish_err.source,
                    "write committed but event publish failed; envelopes need out-of-band replay"
                );
                Err(CommandError::PublishAfterCommit {
                    message_ids,
                    envelopes: publish_err.envelopes,
                    source: publish_err.source,
                })
            }
        }
    }
}
