//! Procedure dispatch by type and path.

use super::core::Router;
use crate::middleware::ProcedureType;
use crate::procedure::{ProcedureCallOptions, ProcedureOutput};
use crate::subscription::Subscription;
use crate::{Context, RpcError, RpcResult};
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

/// Arguments for [`call_procedure`].
pub struct CallProcedureOptions<'a, Ctx> {
    /// Router holding the procedure
    pub router: &'a Router<Ctx>,
    /// Kind of procedure to call
    pub procedure_type: ProcedureType,
    /// Path of the procedure
    pub path: &'a str,
    /// Raw input
    pub input: Value,
    /// Request context
    pub ctx: Context<Ctx>,
}

/// Result of a dispatched call.
#[derive(Debug)]
pub enum CallOutput {
    /// Query or mutation result
    Data(Value),
    /// Subscription, not yet started
    Subscription(Subscription),
}

/// Resolve the procedure for `procedure_type` on `path` and call it.
///
/// Queries and mutations yield [`CallOutput::Data`]; subscriptions yield a
/// [`Subscription`] that has not been started.
///
/// # Errors
///
/// - `NOT_FOUND` when no procedure of that type exists on `path`
/// - `INTERNAL_SERVER_ERROR` when the resolver's output doesn't fit the
///   procedure type
/// - any error raised while calling the procedure
pub async fn call_procedure<Ctx: Send + Sync + 'static>(
    options: CallProcedureOptions<'_, Ctx>,
) -> RpcResult<CallOutput> {
    let CallProcedureOptions {
        router,
        procedure_type,
        path,
        input,
        ctx,
    } = options;

    let procedure = router.get(path, procedure_type).ok_or_else(|| {
        debug!(path = %path, procedure_type = %procedure_type, "Procedure not found");
        RpcError::procedure_not_found(procedure_type, path)
    })?;

    let output = procedure
        .call(ProcedureCallOptions::new(path, input, ctx))
        .await?;

    match (procedure_type, output) {
        (ProcedureType::Subscription, ProcedureOutput::Stream(stream)) => {
            Ok(CallOutput::Subscription(Subscription::new(stream)))
        }
        (ProcedureType::Query | ProcedureType::Mutation, ProcedureOutput::Data(data)) => {
            Ok(CallOutput::Data(data))
        }
        (procedure_type, output) => {
            warn!(
                path = %path,
                procedure_type = %procedure_type,
                stream = output.is_stream(),
                "Resolver output does not match procedure type"
            );
            Err(RpcError::internal(format!(
                "{procedure_type} procedure on path \"{path}\" produced the wrong kind of output"
            )))
        }
    }
}

/// Router bound to a context, for calling procedures in-process.
pub struct Caller<'a, Ctx> {
    router: &'a Router<Ctx>,
    ctx: Context<Ctx>,
}

impl<'a, Ctx: Send + Sync + 'static> Caller<'a, Ctx> {
    pub(crate) fn new(router: &'a Router<Ctx>, ctx: Context<Ctx>) -> Self {
        Self { router, ctx }
    }

    async fn dispatch(
        &self,
        procedure_type: ProcedureType,
        path: &str,
        input: Value,
    ) -> RpcResult<CallOutput> {
        call_procedure(CallProcedureOptions {
            router: self.router,
            procedure_type,
            path,
            input,
            ctx: self.ctx.clone(),
        })
        .await
    }

    /// Call a query.
    pub async fn query(&self, path: &str, input: Value) -> RpcResult<Value> {
        expect_data(self.dispatch(ProcedureType::Query, path, input).await?)
    }

    /// Call a mutation.
    pub async fn mutation(&self, path: &str, input: Value) -> RpcResult<Value> {
        expect_data(self.dispatch(ProcedureType::Mutation, path, input).await?)
    }

    /// Open a subscription; the caller starts it.
    pub async fn subscription(&self, path: &str, input: Value) -> RpcResult<Subscription> {
        match self
            .dispatch(ProcedureType::Subscription, path, input)
            .await?
        {
            CallOutput::Subscription(subscription) => Ok(subscription),
            CallOutput::Data(_) => Err(RpcError::internal(
                "Subscription procedure produced a single value",
            )),
        }
    }

    /// The bound context.
    pub fn ctx(&self) -> &Context<Ctx> {
        &self.ctx
    }
}

fn expect_data(output: CallOutput) -> RpcResult<Value> {
    match output {
        CallOutput::Data(data) => Ok(data),
        CallOutput::Subscription(subscription) => {
            subscription.destroy();
            Err(RpcError::internal("Procedure produced a stream"))
        }
    }
}

impl<Ctx> fmt::Debug for Caller<'_, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caller")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
