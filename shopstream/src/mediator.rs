//! In-process command/query mediator.
//!
//! A [`Mediator`] routes each request to exactly one registered handler,
//! through an ordered chain of cross-cutting [`PipelineBehavior`]s, and
//! fans notifications out to zero or more subscribers.
//!
//! The registry is an explicit object assembled by [`MediatorBuilder`] at
//! the application root and frozen by `build()` — there is no global
//! mutable state, and duplicate handler registration fails at wiring time,
//! not at dispatch time. Test harnesses get isolation by building a fresh
//! mediator per test.
//!
//! `send` is synchronous from the caller's perspective: the caller awaits
//! until the handler and all behaviors complete. Cancellation is native to
//! the runtime — dropping or timing out the `send` future cancels the
//! handler, and an uncommitted store session rolls back on drop.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};

use crate::errors::{CommandError, CommandResult, MediatorError, ValidationError};
use crate::metadata::{CorrelationId, MessageMetadata};

/// Per-request context flowing from the transport edge through handlers
/// into every envelope the request's unit of work publishes.
#[derive(Debug, Clone)]
pub struct RequestContext {
    metadata: MessageMetadata,
}

impl RequestContext {
    /// Creates a context with a fresh correlation id.
    pub fn new() -> Self {
        Self {
            metadata: MessageMetadata::new(),
        }
    }

    /// Creates a context carrying existing metadata, e.g. extracted from
    /// an incoming transport header.
    pub const fn with_metadata(metadata: MessageMetadata) -> Self {
        Self { metadata }
    }

    /// The correlation id of this request.
    pub fn correlation_id(&self) -> CorrelationId {
        self.metadata.correlation_id
    }

    /// The metadata propagated into published envelopes.
    pub const fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// An intent to change state (command) or read state (query).
///
/// Requests are immutable once constructed. Queries are requests whose
/// handlers never mutate anything and never open a unit of work; the
/// mediator itself does not distinguish the two.
pub trait Request: Send + 'static {
    /// The response the single registered handler produces.
    type Response: Send + 'static;

    /// Stable type identifier, used in logs and registration errors.
    fn name() -> &'static str;

    /// Payload preconditions, checked by [`ValidationBehavior`] before the
    /// handler runs and before any transaction is opened.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Handles one request type. Exactly one handler per type may be
/// registered.
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    /// Processes the request, producing its response.
    async fn handle(&self, ctx: &RequestContext, request: R) -> CommandResult<R::Response>;
}

/// A fire-and-forget notification with zero or more subscribers.
pub trait Notification: Send + Sync + 'static {
    /// Stable type identifier, used in logs.
    fn name() -> &'static str;
}

/// Handles one notification type. Registration is additive.
#[async_trait]
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    /// Reacts to the notification.
    async fn handle(&self, ctx: &RequestContext, notification: &N) -> CommandResult<()>;
}

/// Type-erased response passed along the behavior chain.
pub type ErasedResponse = Box<dyn Any + Send>;

/// Continuation invoking the rest of the pipeline (remaining behaviors,
/// then the handler). A behavior short-circuits by returning without
/// calling it.
pub type Next<'a> = Box<dyn FnOnce() -> BoxFuture<'a, CommandResult<ErasedResponse>> + Send + 'a>;

/// Erased view of the in-flight request, available to behaviors.
///
/// The validation verdict is extracted once at dispatch entry; it is a
/// pure function of the immutable request, so behaviors observing it see
/// the same answer regardless of where they sit in the chain.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// The request's type name.
    pub name: &'static str,
    validation: Result<(), ValidationError>,
}

impl RequestInfo {
    /// The request's validation verdict.
    pub fn validation(&self) -> Result<(), ValidationError> {
        self.validation.clone()
    }
}

/// A cross-cutting concern wrapping every `send`.
///
/// Behaviors run in registration order, outermost first. Each may
/// short-circuit by returning early instead of invoking `next`, which
/// prevents the handler (and any later behavior) from running.
#[async_trait]
pub trait PipelineBehavior: Send + Sync {
    /// Wraps the rest of the pipeline.
    async fn handle<'a>(
        &self,
        ctx: &'a RequestContext,
        request: &'a RequestInfo,
        next: Next<'a>,
    ) -> CommandResult<ErasedResponse>;
}

/// Rejects requests whose payload fails its preconditions, before any
/// transaction is opened.
pub struct ValidationBehavior;

#[async_trait]
impl PipelineBehavior for ValidationBehavior {
    async fn handle<'a>(
        &self,
        _ctx: &'a RequestContext,
        request: &'a RequestInfo,
        next: Next<'a>,
    ) -> CommandResult<ErasedResponse> {
        if let Err(validation) = request.validation() {
            debug!(request = request.name, error = %validation, "request rejected by validation");
            return Err(CommandError::Validation(validation));
        }
        next().await
    }
}

/// Logs each request with its outcome and latency.
pub struct LoggingBehavior;

#[async_trait]
impl PipelineBehavior for LoggingBehavior {
    async fn handle<'a>(
        &self,
        ctx: &'a RequestContext,
        request: &'a RequestInfo,
        next: Next<'a>,
    ) -> CommandResult<ErasedResponse> {
        let started = Instant::now();
        debug!(
            request = request.name,
            correlation_id = %ctx.correlation_id(),
            "handling request"
        );
        let result = next().await;
        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(_) => info!(
                request = request.name,
                correlation_id = %ctx.correlation_id(),
                elapsed_ms,
                "request handled"
            ),
            Err(err) => warn!(
                request = request.name,
                correlation_id = %ctx.correlation_id(),
                elapsed_ms,
                error = %err,
                "request failed"
            ),
        }
        result
    }
}

struct HandlerSlot<R: Request> {
    handler: Arc<dyn RequestHandler<R>>,
}

struct SubscriberSlot<N: Notification> {
    handlers: Vec<Arc<dyn NotificationHandler<N>>>,
}

/// Assembles a [`Mediator`] at application startup.
pub struct MediatorBuilder {
    handlers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    handler_names: HashMap<TypeId, &'static str>,
    subscribers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    behaviors: Vec<Arc<dyn PipelineBehavior>>,
}

impl MediatorBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            handler_names: HashMap::new(),
            subscribers: HashMap::new(),
            behaviors: Vec::new(),
        }
    }

    /// Registers the handler for a request type.
    ///
    /// Fails with [`MediatorError::DuplicateHandler`] when a handler for
    /// the same type is already registered — wiring bugs surface at
    /// startup, never at dispatch time.
    pub fn register<R, H>(mut self, handler: H) -> Result<Self, MediatorError>
    where
        R: Request,
        H: RequestHandler<R>,
    {
        let type_id = TypeId::of::<R>();
        if self.handlers.contains_key(&type_id) {
            return Err(MediatorError::DuplicateHandler(R::name()));
        }
        self.handlers.insert(
            type_id,
            Arc::new(HandlerSlot::<R> {
                handler: Arc::new(handler),
            }),
        );
        self.handler_names.insert(type_id, R::name());
        Ok(self)
    }

    /// Subscribes a handler to a notification type. Additive: any number
    /// of subscribers per type.
    pub fn subscribe<N, H>(mut self, handler: H) -> Self
    where
        N: Notification,
        H: NotificationHandler<N>,
    {
        let slot = self
            .subscribers
            .entry(TypeId::of::<N>())
            .or_insert_with(|| {
                Box::new(SubscriberSlot::<N> {
                    handlers: Vec::new(),
                })
            });
        slot.downcast_mut::<SubscriberSlot<N>>()
            .expect("subscriber slot type is keyed by TypeId")
            .handlers
            .push(Arc::new(handler));
        self
    }

    /// Appends a pipeline behavior. Behaviors run in the order appended,
    /// outermost first.
    #[must_use]
    pub fn behavior(mut self, behavior: impl PipelineBehavior + 'static) -> Self {
        self.behaviors.push(Arc::new(behavior));
        self
    }

    /// Freezes the registry into an immutable mediator.
    #[must_use]
    pub fn build(self) -> Mediator {
        Mediator {
            handlers: self.handlers,
            subscribers: self
                .subscribers
                .into_iter()
                .map(|(type_id, slot)| (type_id, Arc::<dyn Any + Send + Sync>::from(slot)))
                .collect(),
            behaviors: Arc::from(self.behaviors),
        }
    }
}

impl Default for MediatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes requests to their single handler and notifications to their
/// subscribers. Immutable after [`MediatorBuilder::build`]; cheap to clone
/// and share.
#[derive(Clone)]
pub struct Mediator {
    handlers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    subscribers: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    behaviors: Arc<[Arc<dyn PipelineBehavior>]>,
}

impl Mediator {
    /// Dispatches a request through the behavior chain to its handler and
    /// returns the typed response.
    pub async fn send<R: Request>(
        &self,
        ctx: &RequestContext,
        request: R,
    ) -> CommandResult<R::Response> {
        let slot = self
            .handlers
            .get(&TypeId::of::<R>())
            .cloned()
            .ok_or(CommandError::HandlerNotFound(R::name()))?;
        let slot = slot
            .downcast::<HandlerSlot<R>>()
            .map_err(|_| CommandError::Internal("handler slot type mismatch".to_string()))?;

        let info = RequestInfo {
            name: R::name(),
            validation: request.validate(),
        };

        let response = run_chain(
            &self.behaviors,
            ctx,
            &info,
            Arc::clone(&slot.handler),
            request,
        )
        .await?;

        response
            .downcast::<R::Response>()
            .map(|boxed| *boxed)
            .map_err(|_| CommandError::Internal("response type mismatch".to_string()))
    }

    /// Publishes a notification to every subscriber in registration order.
    ///
    /// Subscriber failures are logged and do not stop later subscribers;
    /// if any failed, an `Internal` error reporting the count is returned
    /// after all have run. Zero subscribers is not an error.
    pub async fn publish<N: Notification>(
        &self,
        ctx: &RequestContext,
        notification: &N,
    ) -> CommandResult<()> {
        let Some(slot) = self.subscribers.get(&TypeId::of::<N>()) else {
            debug!(notification = N::name(), "no subscribers registered");
            return Ok(());
        };
        let slot = slot
            .downcast_ref::<SubscriberSlot<N>>()
            .ok_or_else(|| CommandError::Internal("subscriber slot type mismatch".to_string()))?;

        let mut failures = 0usize;
        for handler in &slot.handlers {
            if let Err(err) = handler.handle(ctx, notification).await {
                error!(
                    notification = N::name(),
                    correlation_id = %ctx.correlation_id(),
                    error = %err,
                    "notification subscriber failed"
                );
                failures += 1;
            }
        }

        if failures > 0 {
            return Err(CommandError::Internal(format!(
                "{failures} subscriber(s) failed handling '{}'",
                N::name()
            )));
        }
        Ok(())
    }
}

fn run_chain<'a, R: Request>(
    behaviors: &'a [Arc<dyn PipelineBehavior>],
    ctx: &'a RequestContext,
    info: &'a RequestInfo,
    handler: Arc<dyn RequestHandler<R>>,
    request: R,
) -> BoxFuture<'a, CommandResult<ErasedResponse>> {
    match behaviors.split_first() {
        None => Box::pin(async move {
            handler
                .handle(ctx, request)
                .await
                .map(|response| Box::new(response) as ErasedResponse)
        }),
        Some((head, rest)) => Box::pin(async move {
            let next: Next<'a> = Box::new(move || run_chain(rest, ctx, info, handler, request));
            head.handle(ctx, info, next).await
        }),
    }
}
