//! Middleware chain execution
//!
//! A procedure's middleware runs in declaration order, each step receiving a
//! [`Next`] continuation bound to the following step. The procedure's resolver
//! is the innermost step. Every step is guarded: errors and panics become an
//! `Err` result, so each middleware sees the same result type from `next`.
//!
//! ```rust,ignore
//! let timing = from_fn(|_ctx: Context<AppContext>, req: Request, next: Next<AppContext>| async move {
//!     let start = std::time::Instant::now();
//!     let result = next.run().await;
//!     tracing::info!(path = %req.path, elapsed = ?start.elapsed(), "done");
//!     result
//! });
//! ```

use crate::procedure::ProcedureOutput;
use crate::{Context, RpcError};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{trace, warn};

/// Message returned when a middleware finishes without forwarding `next`'s result.
pub(crate) const MISSING_RESULT_MESSAGE: &str =
    "No result from middlewares - did you forget to `return next()`?";

/// Kind of procedure being called.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcedureType {
    /// Read-only operation
    Query,
    /// Write operation
    Mutation,
    /// Streaming subscription
    Subscription,
}

impl ProcedureType {
    /// Wire name of the procedure type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request information passed to middleware.
#[derive(Clone, Debug)]
pub struct Request {
    /// Full path of the procedure (e.g., "users.get")
    pub path: String,
    /// Type of procedure
    pub procedure_type: ProcedureType,
    /// Raw, unparsed input
    pub input: serde_json::Value,
    /// Metadata attached to the procedure at definition time
    pub meta: serde_json::Value,
}

impl Request {
    /// Get the namespace (first part of path)
    pub fn namespace(&self) -> Option<&str> {
        self.path.split_once('.').map(|(namespace, _)| namespace)
    }

    /// Get the procedure name (last part of path)
    pub fn procedure(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }
}

/// Successful outcome of a middleware step.
pub struct MiddlewareOk<Ctx> {
    /// Output produced by the resolver (possibly rewritten by middleware)
    pub data: ProcedureOutput,
    /// Context the resolver ran with
    pub ctx: Context<Ctx>,
}

impl<Ctx> fmt::Debug for MiddlewareOk<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareOk")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Result threaded through the middleware chain.
pub type MiddlewareResult<Ctx> = Result<MiddlewareOk<Ctx>, RpcError>;

/// Values a middleware may finish with.
///
/// Returning [`MiddlewareResult`] forwards a result; returning `()` or `None`
/// means the middleware never produced one, which the chain reports as an
/// internal error.
pub trait IntoMiddlewareOutcome<Ctx>: Send {
    /// Convert into an optional chain result.
    fn into_outcome(self) -> Option<MiddlewareResult<Ctx>>;
}

impl<Ctx: Send + Sync> IntoMiddlewareOutcome<Ctx> for MiddlewareResult<Ctx> {
    fn into_outcome(self) -> Option<MiddlewareResult<Ctx>> {
        Some(self)
    }
}

impl<Ctx: Send + Sync> IntoMiddlewareOutcome<Ctx> for Option<MiddlewareResult<Ctx>> {
    fn into_outcome(self) -> Option<MiddlewareResult<Ctx>> {
        self
    }
}

impl<Ctx> IntoMiddlewareOutcome<Ctx> for () {
    fn into_outcome(self) -> Option<MiddlewareResult<Ctx>> {
        None
    }
}

/// Type-erased middleware step.
pub type MiddlewareFn<Ctx> = Arc<
    dyn Fn(Context<Ctx>, Request, Next<Ctx>) -> BoxFuture<'static, Option<MiddlewareResult<Ctx>>>
        + Send
        + Sync,
>;

/// Create middleware from an async function or closure.
///
/// # Example
/// ```rust,ignore
/// async fn require_user(ctx: Context<AppContext>, _req: Request, next: Next<AppContext>) -> MiddlewareResult<AppContext> {
///     if ctx.user.is_none() {
///         return Err(RpcError::unauthorized("Sign in first"));
///     }
///     next.run().await
/// }
///
/// let middleware = from_fn(require_user);
/// ```
pub fn from_fn<Ctx, F, Fut, R>(f: F) -> MiddlewareFn<Ctx>
where
    Ctx: Send + Sync + 'static,
    F: Fn(Context<Ctx>, Request, Next<Ctx>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoMiddlewareOutcome<Ctx> + 'static,
{
    Arc::new(move |ctx, req, next| {
        let fut = f(ctx, req, next);
        Box::pin(async move { fut.await.into_outcome() })
    })
}

/// Continuation handed to each middleware.
///
/// Consuming it runs the rest of the chain exactly once.
pub struct Next<Ctx> {
    steps: Arc<[MiddlewareFn<Ctx>]>,
    index: usize,
    ctx: Context<Ctx>,
    request: Request,
}

impl<Ctx: Send + Sync + 'static> Next<Ctx> {
    /// Continue with the current context.
    pub async fn run(self) -> MiddlewareResult<Ctx> {
        run_step(self.steps, self.index, self.ctx, self.request).await
    }

    /// Continue with a replacement context.
    pub async fn run_with(self, ctx: impl Into<Context<Ctx>>) -> MiddlewareResult<Ctx> {
        run_step(self.steps, self.index, ctx.into(), self.request).await
    }

    /// The request the chain is executing.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The context the next step will receive from [`Next::run`].
    pub fn ctx(&self) -> &Context<Ctx> {
        &self.ctx
    }
}

impl<Ctx> fmt::Debug for Next<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("index", &self.index)
            .field("remaining", &self.steps.len().saturating_sub(self.index))
            .field("path", &self.request.path)
            .finish()
    }
}

/// Run a complete chain from its first step.
pub(crate) async fn run_chain<Ctx: Send + Sync + 'static>(
    steps: Arc<[MiddlewareFn<Ctx>]>,
    ctx: Context<Ctx>,
    request: Request,
) -> MiddlewareResult<Ctx> {
    run_step(steps, 0, ctx, request).await
}

/// Invoke step `index`, guarding it against errors and panics.
fn run_step<Ctx: Send + Sync + 'static>(
    steps: Arc<[MiddlewareFn<Ctx>]>,
    index: usize,
    ctx: Context<Ctx>,
    request: Request,
) -> BoxFuture<'static, MiddlewareResult<Ctx>> {
    Box::pin(async move {
        let Some(step) = steps.get(index).cloned() else {
            warn!(path = %request.path, index, "Middleware chain ran past its last step");
            return Err(RpcError::internal(MISSING_RESULT_MESSAGE));
        };

        trace!(path = %request.path, step = index, of = steps.len(), "Running middleware step");

        let next = Next {
            steps: Arc::clone(&steps),
            index: index + 1,
            ctx: ctx.clone(),
            request: request.clone(),
        };

        // Closures may panic before handing back their future.
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| step(ctx, request, next))) {
            Ok(fut) => fut,
            Err(payload) => return Err(RpcError::from_panic(payload)),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Some(result)) => result,
            Ok(None) => {
                warn!(step = index, "Middleware finished without a result");
                Err(RpcError::internal(MISSING_RESULT_MESSAGE))
            }
            Err(payload) => {
                let error = RpcError::from_panic(payload);
                warn!(step = index, error = %error, "Middleware step panicked");
                Err(error)
            }
        }
    })
}
