//! Typed resolver traits
//!
//! Resolvers are plain async functions taking the request context and a typed
//! input. The adapters here erase them into [`Resolver`]s working on JSON:
//! the parsed input is deserialized into `Input` (a failure is reported as
//! `BAD_REQUEST`) and the output is serialized back to JSON.

use crate::observable::{Observable, try_map};
use crate::procedure::{ProcedureOutput, Resolver};
use crate::{Context, RpcError, RpcResult};
use futures::future::BoxFuture;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{trace, warn};

/// Trait for query and mutation resolvers.
///
/// Automatically implemented for async functions with the signature:
/// `async fn(Context<Ctx>, Input) -> RpcResult<Output>`
pub trait Handler<Ctx, Input, Output>: Clone + Send + Sync + 'static
where
    Input: DeserializeOwned + Send + 'static,
    Output: Serialize + Send + 'static,
{
    /// The future type returned by the handler
    type Future: Future<Output = RpcResult<Output>> + Send;

    /// Call the handler with context and input
    fn call(&self, ctx: Context<Ctx>, input: Input) -> Self::Future;
}

impl<Ctx, Input, Output, F, Fut> Handler<Ctx, Input, Output> for F
where
    Input: DeserializeOwned + Send + 'static,
    Output: Serialize + Send + 'static,
    F: Fn(Context<Ctx>, Input) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Output>> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, ctx: Context<Ctx>, input: Input) -> Self::Future {
        (self)(ctx, input)
    }
}

/// Trait for subscription resolvers.
///
/// Automatically implemented for async functions with the signature:
/// `async fn(Context<Ctx>, Input) -> RpcResult<Observable<Item>>`
pub trait SubscriptionHandler<Ctx, Input, Item>: Clone + Send + Sync + 'static
where
    Input: DeserializeOwned + Send + 'static,
    Item: Serialize + Send + 'static,
{
    /// The future type returned by the handler
    type Future: Future<Output = RpcResult<Observable<Item, RpcError>>> + Send;

    /// Call the handler with context and input
    fn call(&self, ctx: Context<Ctx>, input: Input) -> Self::Future;
}

impl<Ctx, Input, Item, F, Fut> SubscriptionHandler<Ctx, Input, Item> for F
where
    Input: DeserializeOwned + Send + 'static,
    Item: Serialize + Send + 'static,
    F: Fn(Context<Ctx>, Input) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = RpcResult<Observable<Item, RpcError>>> + Send + 'static,
{
    type Future = Fut;

    fn call(&self, ctx: Context<Ctx>, input: Input) -> Self::Future {
        (self)(ctx, input)
    }
}

fn deserialize_input<Input: DeserializeOwned>(value: Value) -> RpcResult<Input> {
    serde_json::from_value(value).map_err(|e| {
        warn!(error = %e, "Handler input deserialization failed");
        RpcError::bad_request(format!("Invalid input: {e}")).with_cause(e.to_string())
    })
}

/// Erase a typed query/mutation handler.
pub(crate) fn into_resolver<Ctx, Input, Output, H>(handler: H) -> Resolver<Ctx>
where
    Ctx: Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
    Output: Serialize + Send + 'static,
    H: Handler<Ctx, Input, Output>,
{
    Arc::new(
        move |ctx: Context<Ctx>, input: Value| -> BoxFuture<'static, RpcResult<ProcedureOutput>> {
            Box::pin(run_handler(handler.clone(), ctx, input))
        },
    )
}

async fn run_handler<Ctx, Input, Output, H>(
    handler: H,
    ctx: Context<Ctx>,
    input_value: Value,
) -> RpcResult<ProcedureOutput>
where
    Input: DeserializeOwned + Send + 'static,
    Output: Serialize + Send + 'static,
    H: Handler<Ctx, Input, Output>,
{
    let input: Input = deserialize_input(input_value)?;

    trace!("Executing handler");
    let output = handler.call(ctx, input).await.inspect_err(|e| {
        trace!(error_code = %e.code, error_message = %e.message, "Handler returned an error");
    })?;

    let output_value = serde_json::to_value(output).map_err(|e| {
        warn!(error = %e, "Handler output serialization failed");
        RpcError::internal(format!("Failed to serialize output: {e}"))
    })?;
    Ok(ProcedureOutput::Data(output_value))
}

/// Erase a typed subscription handler; items are serialized as they are emitted.
pub(crate) fn into_subscription_resolver<Ctx, Input, Item, H>(handler: H) -> Resolver<Ctx>
where
    Ctx: Send + Sync + 'static,
    Input: DeserializeOwned + Send + 'static,
    Item: Serialize + Send + 'static,
    H: SubscriptionHandler<Ctx, Input, Item>,
{
    Arc::new(
        move |ctx: Context<Ctx>, input: Value| -> BoxFuture<'static, RpcResult<ProcedureOutput>> {
            Box::pin(run_subscription_handler(handler.clone(), ctx, input))
        },
    )
}

async fn run_subscription_handler<Ctx, Input, Item, H>(
    handler: H,
    ctx: Context<Ctx>,
    input_value: Value,
) -> RpcResult<ProcedureOutput>
where
    Input: DeserializeOwned + Send + 'static,
    Item: Serialize + Send + 'static,
    H: SubscriptionHandler<Ctx, Input, Item>,
{
    let input: Input = deserialize_input(input_value)?;

    trace!("Executing subscription handler");
    let items = handler.call(ctx, input).await?;
    let values = items.pipe(try_map(|item: Item| {
        serde_json::to_value(item).map_err(|e| {
            warn!(error = %e, "Subscription item serialization failed");
            RpcError::internal(format!("Failed to serialize subscription item: {e}"))
        })
    }));
    Ok(ProcedureOutput::Stream(values))
}
