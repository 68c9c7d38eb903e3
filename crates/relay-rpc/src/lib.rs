#![warn(missing_docs)]
//! # Relay RPC
//!
//! Procedure execution, push-based observables and a JSON-RPC style
//! transport over duplex message channels.
//!
//! ## Overview
//!
//! - **Procedures** with input/output parsers and an onion-model middleware chain
//! - **Routers** mapping `(type, path)` to procedures, with nested prefixes
//! - **Observables** with teardown, operators and stream conversion
//! - **Subscriptions** driving an observable with listener callbacks
//! - **Transport** handling queries, mutations, subscriptions and batches
//!   over any [`MessageChannel`](transport::MessageChannel)
//! - **Structured errors** with typed codes, normalization and shaping
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    MessageChannel                        │
//! │     (worker port, window, websocket, LocalChannel)       │
//! └─────────────────────────────┬────────────────────────────┘
//!                               │ envelopes
//!                               ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   TransportHandler                       │
//! │  decode ─▶ batch ─▶ context ─▶ dispatch ─▶ respond       │
//! │                          subscriptions by request id     │
//! └─────────────────────────────┬────────────────────────────┘
//!                               │ call_procedure
//!                               ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Router                            │
//! │  ┌────────────┐  ┌─────────────────┐  ┌──────────────┐   │
//! │  │ middleware │─▶│ input parser    │─▶│ resolver     │   │
//! │  └────────────┘  └─────────────────┘  └──────┬───────┘   │
//! │                                  data or Observable      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay_rpc::prelude::*;
//!
//! #[derive(Default)]
//! struct AppContext;
//!
//! async fn hello(_ctx: Context<AppContext>, name: String) -> RpcResult<serde_json::Value> {
//!     Ok(serde_json::json!({ "text": format!("hello {name}") }))
//! }
//!
//! async fn ticks(_ctx: Context<AppContext>, count: u64) -> RpcResult<Observable<u64>> {
//!     Ok(Observable::from_values((0..count).collect()))
//! }
//!
//! let router = Router::new()
//!     .middleware(logging_middleware(LogConfig::new()))
//!     .query("hello", hello)
//!     .subscription("ticks", ticks);
//!
//! let (server_end, client_end) = LocalChannel::pair("server", "client");
//! let handler = TransportHandler::new(router, server_end, |_: &LocalPeer| async {
//!     Ok(AppContext)
//! })?;
//! tokio::spawn(async move { handler.serve().await });
//! ```
//!
//! ## Calling procedures directly
//!
//! ```rust,ignore
//! let caller = router.create_caller(AppContext);
//! let greeting = caller.query("hello", serde_json::json!("world")).await?;
//! ```

mod config;
mod context;
mod error;
mod handler;
pub mod logging;
pub mod middleware;
pub mod observable;
pub mod parser;
pub mod procedure;
mod router;
pub mod subscription;
pub mod transformer;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod tests;

// Public API
pub use config::{
    BatchConfig, ConfigValidationError, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_MESSAGE_SIZE,
    TransportConfig,
};
pub use context::{Context, EmptyContext};
pub use error::{
    BoxError, ComposedTransformer, ErrorCodeMapper, ErrorConfig, ErrorTransformer,
    LoggingTransformer, RpcError, RpcErrorCode, RpcResult, error_chain,
};
pub use handler::{Handler, SubscriptionHandler};
pub use logging::{LogConfig, LogLevel, logging_middleware};
pub use middleware::{
    IntoMiddlewareOutcome, MiddlewareFn, MiddlewareOk, MiddlewareResult, Next, ProcedureType,
    Request, from_fn,
};
pub use observable::{Observable, Observer, Subscriber, Unsubscribable, observable};
pub use parser::{Parser, ParserKind, ParserResolutionError, Schema, TypedSchema};
pub use procedure::{
    Procedure, ProcedureBuilder, ProcedureCallOptions, ProcedureOutput, Resolver,
};
pub use router::{
    CallOutput, CallProcedureOptions, Caller, ErrorContext, ErrorFormatter, Router,
    call_procedure,
};
pub use subscription::Subscription;
pub use transformer::{CombinedTransformer, DataTransformer, DefaultTransformer};
pub use validation::{FieldError, Validate, ValidationError, ValidationResult, ValidationRules};

/// Prelude for convenient imports
///
/// ```rust,ignore
/// use relay_rpc::prelude::*;
/// ```
pub mod prelude {
    pub use crate::transport::{
        LocalChannel, LocalPeer, MessageChannel, TransportErrorEvent, TransportHandler,
    };
    pub use crate::{
        // Configuration
        BatchConfig,
        // Router
        Caller,
        // Context
        Context,
        DataTransformer,
        EmptyContext,
        // Errors
        ErrorConfig,
        ErrorFormatter,
        // Validation
        FieldError,
        // Logging
        LogConfig,
        LogLevel,
        // Middleware
        MiddlewareFn,
        Next,
        // Observables
        Observable,
        Observer,
        // Procedures
        Parser,
        Procedure,
        ProcedureBuilder,
        ProcedureOutput,
        ProcedureType,
        Request,
        Router,
        RpcError,
        RpcErrorCode,
        RpcResult,
        Subscriber,
        Subscription,
        TransportConfig,
        Validate,
        ValidationResult,
        ValidationRules,
        from_fn,
        logging_middleware,
        observable,
    };
}
