//! Order queries, served from the read model only.

use async_trait::async_trait;

use shopstream::errors::{CommandError, CommandResult};
use shopstream::mediator::{Request, RequestContext, RequestHandler};
use shopstream::read_model::ReadModelStore;

use crate::projection::OrderReadModel;
use crate::types::OrderId;

/// Fetches one order document by id.
///
/// Reads the eventually consistent read model; a freshly committed write
/// may not be visible yet.
#[derive(Debug, Clone)]
pub struct GetOrderById {
    /// The order to fetch.
    pub order_id: OrderId,
}

impl Request for GetOrderById {
    type Response = Option<OrderReadModel>;

    fn name() -> &'static str {
        "GetOrderById"
    }
}

/// Handles [`GetOrderById`]. Never mutates and never opens a unit of work.
pub struct GetOrderByIdHandler<S> {
    store: S,
}

impl<S> GetOrderByIdHandler<S> {
    /// Creates the handler over a read-model store.
    pub const fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S> RequestHandler<GetOrderById> for GetOrderByIdHandler<S>
where
    S: ReadModelStore<OrderReadModel> + 'static,
{
    async fn handle(
        &self,
        _ctx: &RequestContext,
        request: GetOrderById,
    ) -> CommandResult<Option<OrderReadModel>> {
        let stored = self
            .store
            .get(request.order_id.as_ref())
            .await
            .map_err(|err| CommandError::Internal(err.to_string()))?;
        Ok(stored.map(|versioned| versioned.model))
    }
}
