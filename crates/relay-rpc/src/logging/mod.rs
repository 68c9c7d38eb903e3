//! Procedure call logging
//!
//! [`logging_middleware`] records every procedure call through `tracing` with
//! structured fields (`path`, `procedure_type`, `duration_ms`, `error_code`).
//! Inputs and outputs are opt-in and pass through a [`RedactionEngine`] first.
//! The library never installs a subscriber; applications choose their own.
//!
//! ```rust,ignore
//! use relay_rpc::logging::{LogConfig, LogLevel, logging_middleware};
//!
//! let router = Router::new()
//!     .middleware(logging_middleware(
//!         LogConfig::new()
//!             .with_level(LogLevel::Debug)
//!             .with_input_logging(true)
//!             .with_slow_request_threshold(250),
//!     ))
//!     .query("users.get", get_user);
//! ```

mod config;
mod middleware;
mod redaction;

pub use config::{
    DEFAULT_REDACTION_REPLACEMENT, DEFAULT_SENSITIVE_FIELDS, DEFAULT_SLOW_THRESHOLD_MS, LogConfig,
    LogLevel,
};
pub use middleware::logging_middleware;
pub use redaction::RedactionEngine;
