//! Router and procedure dispatch
//!
//! The [`Router`] collects procedures by type and path, applies router-level
//! middleware, and owns the hooks a transport needs: the data transformer and
//! [`Router::shape_error`].
//!
//! ```rust,ignore
//! let router = Router::new()
//!     .query("hello", |_ctx: Context<()>, input: HelloInput| async move {
//!         Ok(json!({ "text": format!("hello {}", input.name) }))
//!     });
//!
//! let greeting = router.create_caller(()).query("hello", json!({ "name": "world" })).await?;
//! ```
//!
//! [`call_procedure`] is the dispatcher transports use: it picks the procedure
//! strictly by [`ProcedureType`](crate::ProcedureType) and wraps subscription
//! streams into an unstarted [`Subscription`](crate::Subscription).

mod caller;
mod core;

pub use caller::{CallOutput, CallProcedureOptions, Caller, call_procedure};
pub use core::{ErrorContext, ErrorFormatter, Router};
