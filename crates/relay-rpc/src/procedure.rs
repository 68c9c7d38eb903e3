//! Procedure definition and execution
//!
//! A [`Procedure`] bundles a resolver with its middleware, input/output
//! parsers and metadata. Calling it runs the middleware in declaration order;
//! the innermost step parses the input, invokes the resolver and parses the
//! resolver's output.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_rpc::prelude::*;
//!
//! let get_user = ProcedureBuilder::<AppContext>::new()
//!     .use_middleware(require_user)
//!     .input(Parser::validated::<GetUserInput>())
//!     .meta(json!({ "cache": "private" }))
//!     .query(get_user);
//!
//! let user = get_user
//!     .call(ProcedureCallOptions::new("users.get", json!({ "id": 1 }), ctx))
//!     .await?;
//! ```

use crate::error::{BoxError, error_chain};
use crate::handler::{Handler, SubscriptionHandler, into_resolver, into_subscription_resolver};
use crate::middleware::{
    MiddlewareFn, MiddlewareOk, MiddlewareResult, Next, ProcedureType, Request, run_chain,
};
use crate::observable::Observable;
use crate::parser::Parser;
use crate::validation::ValidationError;
use crate::{Context, RpcError, RpcResult};
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Type-erased resolver: receives the parsed input as JSON.
pub type Resolver<Ctx> =
    Arc<dyn Fn(Context<Ctx>, Value) -> BoxFuture<'static, RpcResult<ProcedureOutput>> + Send + Sync>;

/// What a resolver produced.
pub enum ProcedureOutput {
    /// A single value (queries and mutations)
    Data(Value),
    /// A stream of values (subscriptions)
    Stream(Observable<Value, RpcError>),
}

impl ProcedureOutput {
    /// Whether this is a stream.
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// The value, if this is [`ProcedureOutput::Data`].
    pub fn into_data(self) -> Option<Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Stream(_) => None,
        }
    }

    /// The observable, if this is [`ProcedureOutput::Stream`].
    pub fn into_stream(self) -> Option<Observable<Value, RpcError>> {
        match self {
            Self::Data(_) => None,
            Self::Stream(stream) => Some(stream),
        }
    }
}

impl fmt::Debug for ProcedureOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Arguments for [`Procedure::call`].
pub struct ProcedureCallOptions<Ctx> {
    /// Path the procedure is being called on
    pub path: String,
    /// Raw input before parsing
    pub raw_input: Value,
    /// Context handed to middleware and the resolver
    pub ctx: Context<Ctx>,
}

impl<Ctx> ProcedureCallOptions<Ctx> {
    /// Bundle the call arguments.
    pub fn new(path: impl Into<String>, raw_input: Value, ctx: impl Into<Context<Ctx>>) -> Self {
        Self {
            path: path.into(),
            raw_input,
            ctx: ctx.into(),
        }
    }
}

// =============================================================================
// Procedure
// =============================================================================

/// A callable procedure.
pub struct Procedure<Ctx> {
    procedure_type: ProcedureType,
    middlewares: Vec<MiddlewareFn<Ctx>>,
    resolver: Resolver<Ctx>,
    input_parser: Parser,
    output_parser: Parser,
    meta: Value,
    /// `middlewares` followed by the resolver step
    chain: Arc<[MiddlewareFn<Ctx>]>,
}

impl<Ctx: Send + Sync + 'static> Procedure<Ctx> {
    fn assemble(
        procedure_type: ProcedureType,
        middlewares: Vec<MiddlewareFn<Ctx>>,
        resolver: Resolver<Ctx>,
        input_parser: Parser,
        output_parser: Parser,
        meta: Value,
    ) -> Self {
        let chain = compile_chain(&middlewares, &resolver, &input_parser, &output_parser);
        Self {
            procedure_type,
            middlewares,
            resolver,
            input_parser,
            output_parser,
            meta,
            chain,
        }
    }

    /// Kind of procedure.
    pub fn procedure_type(&self) -> ProcedureType {
        self.procedure_type
    }

    /// Metadata attached at definition time.
    pub fn meta(&self) -> &Value {
        &self.meta
    }

    /// Number of middleware steps ahead of the resolver.
    pub fn middleware_count(&self) -> usize {
        self.middlewares.len()
    }

    /// Copy of this procedure with `middlewares` running before its own.
    #[must_use = "This method returns a new Procedure and does not modify self"]
    pub fn inherit_middlewares(&self, middlewares: &[MiddlewareFn<Ctx>]) -> Self {
        let combined = middlewares
            .iter()
            .chain(self.middlewares.iter())
            .cloned()
            .collect();
        Self::assemble(
            self.procedure_type,
            combined,
            Arc::clone(&self.resolver),
            self.input_parser.clone(),
            self.output_parser.clone(),
            self.meta.clone(),
        )
    }

    /// Run the procedure.
    ///
    /// # Errors
    ///
    /// - `BAD_REQUEST` when the input parser rejects the input
    /// - `INTERNAL_SERVER_ERROR` when the output parser rejects the output, a
    ///   middleware panics or a middleware drops `next`'s result
    /// - whatever the resolver or a middleware returned otherwise
    pub async fn call(&self, options: ProcedureCallOptions<Ctx>) -> RpcResult<ProcedureOutput> {
        let ProcedureCallOptions {
            path,
            raw_input,
            ctx,
        } = options;

        debug!(path = %path, procedure_type = %self.procedure_type, "Calling procedure");
        let start = Instant::now();

        let request = Request {
            path: path.clone(),
            procedure_type: self.procedure_type,
            input: raw_input,
            meta: self.meta.clone(),
        };

        let result = run_chain(Arc::clone(&self.chain), ctx, request).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(MiddlewareOk { data, .. }) => {
                trace!(path = %path, duration_ms, "Procedure completed");
                Ok(data)
            }
            Err(error) => {
                debug!(
                    path = %path,
                    error_code = %error.code,
                    duration_ms,
                    "Procedure failed"
                );
                Err(error)
            }
        }
    }
}

impl<Ctx> Clone for Procedure<Ctx> {
    fn clone(&self) -> Self {
        Self {
            procedure_type: self.procedure_type,
            middlewares: self.middlewares.clone(),
            resolver: Arc::clone(&self.resolver),
            input_parser: self.input_parser.clone(),
            output_parser: self.output_parser.clone(),
            meta: self.meta.clone(),
            chain: Arc::clone(&self.chain),
        }
    }
}

impl<Ctx> fmt::Debug for Procedure<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Procedure")
            .field("procedure_type", &self.procedure_type)
            .field("middlewares", &self.middlewares.len())
            .field("input_parser", &self.input_parser)
            .field("output_parser", &self.output_parser)
            .field("meta", &self.meta)
            .finish()
    }
}

fn compile_chain<Ctx: Send + Sync + 'static>(
    middlewares: &[MiddlewareFn<Ctx>],
    resolver: &Resolver<Ctx>,
    input_parser: &Parser,
    output_parser: &Parser,
) -> Arc<[MiddlewareFn<Ctx>]> {
    let resolver = Arc::clone(resolver);
    let input_parser = input_parser.clone();
    let output_parser = output_parser.clone();

    let terminal: MiddlewareFn<Ctx> = Arc::new(
        move |ctx: Context<Ctx>,
              request: Request,
              _next: Next<Ctx>|
              -> BoxFuture<'static, Option<MiddlewareResult<Ctx>>> {
            let resolver = Arc::clone(&resolver);
            let input_parser = input_parser.clone();
            let output_parser = output_parser.clone();
            Box::pin(async move {
                Some(resolve(resolver, input_parser, output_parser, ctx, request).await)
            })
        },
    );

    middlewares
        .iter()
        .cloned()
        .chain(std::iter::once(terminal))
        .collect()
}

/// Innermost chain step: parse input, resolve, parse output.
async fn resolve<Ctx: Send + Sync + 'static>(
    resolver: Resolver<Ctx>,
    input_parser: Parser,
    output_parser: Parser,
    ctx: Context<Ctx>,
    request: Request,
) -> MiddlewareResult<Ctx> {
    trace!(path = %request.path, "Parsing procedure input");
    let input = input_parser
        .parse(request.input)
        .await
        .map_err(|error| input_failure(&request.path, error))?;

    trace!(path = %request.path, "Executing resolver");
    let output = resolver(ctx.clone(), input).await?;

    let data = match output {
        ProcedureOutput::Data(value) => {
            let parsed = output_parser
                .parse(value)
                .await
                .map_err(|error| output_failure(&request.path, error))?;
            ProcedureOutput::Data(parsed)
        }
        stream @ ProcedureOutput::Stream(_) => stream,
    };

    Ok(MiddlewareOk { data, ctx })
}

fn input_failure(path: &str, error: BoxError) -> RpcError {
    debug!(path = %path, error = %error, "Input validation failed");
    let mut rpc = RpcError::bad_request(error.to_string()).with_cause(error_chain(error.as_ref()));
    if let Some(validation) = error.downcast_ref::<ValidationError>() {
        rpc = rpc.with_details(&validation.errors);
    }
    rpc
}

fn output_failure(path: &str, error: BoxError) -> RpcError {
    warn!(path = %path, error = %error, "Output validation failed");
    RpcError::internal("Output validation failed").with_cause(error_chain(error.as_ref()))
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for [`Procedure`]s.
pub struct ProcedureBuilder<Ctx> {
    middlewares: Vec<MiddlewareFn<Ctx>>,
    input_parser: Parser,
    output_parser: Parser,
    meta: Value,
}

impl<Ctx: Send + Sync + 'static> ProcedureBuilder<Ctx> {
    /// Start a builder with identity parsers, no middleware and `null` meta.
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
            input_parser: Parser::identity(),
            output_parser: Parser::identity(),
            meta: Value::Null,
        }
    }

    /// Append a middleware; middleware runs in the order it was added.
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn use_middleware(mut self, middleware: MiddlewareFn<Ctx>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Set the input parser.
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn input(mut self, parser: Parser) -> Self {
        self.input_parser = parser;
        self
    }

    /// Set the output parser (applied to query and mutation results).
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn output(mut self, parser: Parser) -> Self {
        self.output_parser = parser;
        self
    }

    /// Attach metadata visible to middleware through [`Request::meta`].
    #[must_use = "This method returns a new ProcedureBuilder and does not modify self"]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Finish as a query.
    pub fn query<H, Input, Output>(self, handler: H) -> Procedure<Ctx>
    where
        H: Handler<Ctx, Input, Output>,
        Input: DeserializeOwned + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.resolver(ProcedureType::Query, into_resolver(handler))
    }

    /// Finish as a mutation.
    pub fn mutation<H, Input, Output>(self, handler: H) -> Procedure<Ctx>
    where
        H: Handler<Ctx, Input, Output>,
        Input: DeserializeOwned + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.resolver(ProcedureType::Mutation, into_resolver(handler))
    }

    /// Finish as a subscription.
    pub fn subscription<H, Input, Item>(self, handler: H) -> Procedure<Ctx>
    where
        H: SubscriptionHandler<Ctx, Input, Item>,
        Input: DeserializeOwned + Send + 'static,
        Item: Serialize + Send + 'static,
    {
        self.resolver(
            ProcedureType::Subscription,
            into_subscription_resolver(handler),
        )
    }

    /// Finish with an untyped resolver.
    pub fn resolver(self, procedure_type: ProcedureType, resolver: Resolver<Ctx>) -> Procedure<Ctx> {
        Procedure::assemble(
            procedure_type,
            self.middlewares,
            resolver,
            self.input_parser,
            self.output_parser,
            self.meta,
        )
    }
}

impl<Ctx: Send + Sync + 'static> Default for ProcedureBuilder<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> fmt::Debug for ProcedureBuilder<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureBuilder")
            .field("middlewares", &self.middlewares.len())
            .field("input_parser", &self.input_parser)
            .field("output_parser", &self.output_parser)
            .field("meta", &self.meta)
            .finish()
    }
}
