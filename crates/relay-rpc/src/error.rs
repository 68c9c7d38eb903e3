//! Error types and failure normalization
//!
//! Every failure that crosses a procedure boundary, whether a typed
//! [`RpcError`], a boxed [`std::error::Error`] or a panic payload, is
//! normalized into an [`RpcError`] carrying a code from [`RpcErrorCode`].
//!
//! # Example
//! ```rust,ignore
//! use relay_rpc::{RpcError, RpcErrorCode};
//!
//! let error = RpcError::new(RpcErrorCode::NotFound, "User not found");
//! let error = RpcError::not_found("User not found"); // Convenience method
//! ```

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use thiserror::Error;
use tracing::{debug, trace};

/// Boxed error accepted from parsers and other user-provided collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message used when an internal error is sanitized for production clients.
const SANITIZED_MESSAGE: &str = "An internal error occurred";

/// Error code taxonomy.
///
/// Serialized as SCREAMING_SNAKE_CASE strings (`NotFound` becomes
/// `"NOT_FOUND"`). Each code also maps onto a JSON-RPC numeric code and an
/// HTTP status for transports that need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum RpcErrorCode {
    /// The inbound message could not be decoded into a request envelope
    ParseError,
    /// The request was malformed or its input was rejected
    BadRequest,
    /// An unexpected failure inside the server
    InternalServerError,
    /// The requested functionality is not implemented
    NotImplemented,
    /// Authentication is required
    Unauthorized,
    /// The caller lacks permission
    Forbidden,
    /// No procedure (or resource) exists at the requested location
    NotFound,
    /// The procedure exists but not for the requested method
    MethodNotSupported,
    /// The operation took too long
    Timeout,
    /// The request conflicts with current state
    Conflict,
    /// A precondition of the request was not met
    PreconditionFailed,
    /// The inbound message exceeds the configured size limit
    PayloadTooLarge,
    /// The request was well-formed but semantically invalid
    UnprocessableContent,
    /// Rate limit exceeded
    TooManyRequests,
    /// The client went away before the response was produced
    ClientClosedRequest,
}

impl RpcErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [RpcErrorCode; 15] = [
        Self::ParseError,
        Self::BadRequest,
        Self::InternalServerError,
        Self::NotImplemented,
        Self::Unauthorized,
        Self::Forbidden,
        Self::NotFound,
        Self::MethodNotSupported,
        Self::Timeout,
        Self::Conflict,
        Self::PreconditionFailed,
        Self::PayloadTooLarge,
        Self::UnprocessableContent,
        Self::TooManyRequests,
        Self::ClientClosedRequest,
    ];

    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::BadRequest => "BAD_REQUEST",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotSupported => "METHOD_NOT_SUPPORTED",
            Self::Timeout => "TIMEOUT",
            Self::Conflict => "CONFLICT",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::UnprocessableContent => "UNPROCESSABLE_CONTENT",
            Self::TooManyRequests => "TOO_MANY_REQUESTS",
            Self::ClientClosedRequest => "CLIENT_CLOSED_REQUEST",
        }
    }

    /// JSON-RPC 2.0 numeric error code.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::BadRequest => -32600,
            Self::InternalServerError | Self::NotImplemented => -32603,
            Self::Unauthorized => -32001,
            Self::Forbidden => -32003,
            Self::NotFound => -32004,
            Self::MethodNotSupported => -32005,
            Self::Timeout => -32008,
            Self::Conflict => -32009,
            Self::PreconditionFailed => -32012,
            Self::PayloadTooLarge => -32013,
            Self::UnprocessableContent => -32022,
            Self::TooManyRequests => -32029,
            Self::ClientClosedRequest => -32099,
        }
    }

    /// Closest HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ParseError | Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::MethodNotSupported => 405,
            Self::Timeout => 408,
            Self::Conflict => 409,
            Self::PreconditionFailed => 412,
            Self::PayloadTooLarge => 413,
            Self::UnprocessableContent => 422,
            Self::TooManyRequests => 429,
            Self::ClientClosedRequest => 499,
            Self::InternalServerError => 500,
            Self::NotImplemented => 501,
        }
    }

    /// Returns true if this is a client error (4xx equivalent).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.http_status())
    }

    /// Returns true if this is a server error (5xx equivalent).
    pub fn is_server_error(&self) -> bool {
        self.http_status() >= 500
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical RPC error.
///
/// # Example
/// ```rust,ignore
/// use relay_rpc::{RpcError, RpcErrorCode};
///
/// let error = RpcError::new(RpcErrorCode::Conflict, "Name taken")
///     .with_details(serde_json::json!({"name": "alice"}))
///     .with_cause("unique constraint violated");
/// ```
#[derive(Debug, Clone, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Error code
    pub code: RpcErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional structured details
    #[serde(default)]
    pub details: Option<serde_json::Value>,
    /// Rendered cause chain of the original failure (stripped in production)
    #[serde(default)]
    pub cause: Option<String>,
    /// Optional stack trace (stripped in production)
    #[serde(default)]
    pub stack_trace: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
            stack_trace: None,
        }
    }

    /// Add details to the error.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Add a cause string for debugging.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Add a stack trace for debugging.
    #[must_use = "This method returns a new RpcError and does not modify self"]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    // -------------------------------------------------------------------------
    // Normalization
    // -------------------------------------------------------------------------

    /// Normalize any error into an [`RpcError`].
    ///
    /// An error that already is an `RpcError` keeps its code and message.
    /// Anything else becomes `INTERNAL_SERVER_ERROR` with the rendered source
    /// chain preserved as `cause`.
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        if let Some(rpc) = error.downcast_ref::<RpcError>() {
            return rpc.clone();
        }
        Self::internal(error.to_string()).with_cause(error_chain(error))
    }

    /// Normalize a boxed error, taking ownership of an inner `RpcError` when present.
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(other) => Self::from_error(other.as_ref()),
        }
    }

    /// Normalize a panic payload caught at a procedure boundary.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<RpcError>() {
            Ok(rpc) => return *rpc,
            Err(other) => other,
        };
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown error".to_string()
        };
        debug!(panic_message = %message, "Converted panic into internal error");
        Self::internal(message.clone()).with_cause(format!("panicked: {message}"))
    }

    // -------------------------------------------------------------------------
    // Client preparation
    // -------------------------------------------------------------------------

    /// Apply error configuration to prepare the error for a client response.
    pub fn apply_config(mut self, config: &ErrorConfig) -> Self {
        trace!(
            code = %self.code,
            development_mode = config.development_mode,
            has_transformer = config.transformer.is_some(),
            "Applying error configuration"
        );

        if !config.development_mode {
            self.stack_trace = None;
            self.cause = None;

            if self.code.is_server_error() {
                debug!(
                    original_code = %self.code,
                    original_message = %self.message,
                    "Sanitizing server error for production"
                );
                self.message = SANITIZED_MESSAGE.to_string();
                self.details = None;
            }
        }

        if let Some(transformer) = &config.transformer {
            self = transformer.transform(self);
        }

        self
    }

    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    /// Create a PARSE_ERROR error.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ParseError, message)
    }

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadRequest, message)
    }

    /// Create an INTERNAL_SERVER_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalServerError, message)
    }

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Forbidden, message)
    }

    /// Create a CONFLICT error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Conflict, message)
    }

    /// Create a TIMEOUT error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Timeout, message)
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PayloadTooLarge, message)
    }

    /// Create a TOO_MANY_REQUESTS error.
    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::TooManyRequests, message)
    }

    /// Create a NOT_FOUND error for a missing procedure.
    pub fn procedure_not_found(procedure_type: impl fmt::Display, path: &str) -> Self {
        Self::not_found(format!(
            "No \"{procedure_type}\"-procedure on path \"{path}\""
        ))
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {err}"))
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("RpcError", 5)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;

        if let Some(ref details) = self.details {
            state.serialize_field("details", details)?;
        }

        if let Some(ref cause) = self.cause {
            state.serialize_field("cause", cause)?;
        }

        if let Some(ref stack_trace) = self.stack_trace {
            state.serialize_field("stack_trace", stack_trace)?;
        }

        state.end()
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Render an error and its sources as `outer: inner: root`.
pub fn error_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    while let Some(err) = source {
        rendered.push_str(": ");
        rendered.push_str(&err.to_string());
        source = err.source();
    }
    rendered
}

// =============================================================================
// Error Configuration
// =============================================================================

/// Controls how errors are prepared before they reach a client.
///
/// # Example
/// ```rust,ignore
/// let config = ErrorConfig::production().with_transformer(LoggingTransformer);
/// ```
#[derive(Clone)]
pub struct ErrorConfig {
    /// Whether to include causes and stack traces in client responses
    pub development_mode: bool,
    /// Custom error transformer applied last
    pub transformer: Option<std::sync::Arc<dyn ErrorTransformer>>,
}

impl ErrorConfig {
    /// Default configuration: development mode follows `debug_assertions`.
    pub fn new() -> Self {
        Self {
            development_mode: cfg!(debug_assertions),
            transformer: None,
        }
    }

    /// Development mode configuration.
    pub fn development() -> Self {
        Self {
            development_mode: true,
            transformer: None,
        }
    }

    /// Production mode configuration.
    pub fn production() -> Self {
        Self {
            development_mode: false,
            transformer: None,
        }
    }

    /// Set development mode.
    #[must_use = "This method returns a new ErrorConfig and does not modify self"]
    pub fn with_development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    /// Set a custom error transformer.
    #[must_use = "This method returns a new ErrorConfig and does not modify self"]
    pub fn with_transformer<T: ErrorTransformer + 'static>(mut self, transformer: T) -> Self {
        self.transformer = Some(std::sync::Arc::new(transformer));
        self
    }
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorConfig")
            .field("development_mode", &self.development_mode)
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

// =============================================================================
// Error Transformer
// =============================================================================

/// Hook for rewriting errors before they are shaped for a client.
pub trait ErrorTransformer: Send + Sync {
    /// Transform an error before it's sent to the client.
    fn transform(&self, error: RpcError) -> RpcError;
}

/// Logs every error at `error` level and passes it through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransformer;

impl ErrorTransformer for LoggingTransformer {
    fn transform(&self, error: RpcError) -> RpcError {
        tracing::error!(
            code = %error.code,
            message = %error.message,
            "RPC error occurred"
        );
        error
    }
}

/// Rewrites selected error codes.
#[derive(Debug, Default)]
pub struct ErrorCodeMapper {
    mappings: std::collections::HashMap<RpcErrorCode, RpcErrorCode>,
}

impl ErrorCodeMapper {
    /// Create an empty mapper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `from` onto `to`.
    #[must_use = "This method returns a new ErrorCodeMapper and does not modify self"]
    pub fn map(mut self, from: RpcErrorCode, to: RpcErrorCode) -> Self {
        self.mappings.insert(from, to);
        self
    }
}

impl ErrorTransformer for ErrorCodeMapper {
    fn transform(&self, mut error: RpcError) -> RpcError {
        if let Some(&new_code) = self.mappings.get(&error.code) {
            debug!(from_code = %error.code, to_code = %new_code, "Mapping error code");
            error.code = new_code;
        }
        error
    }
}

/// Runs several transformers in registration order.
#[derive(Default)]
pub struct ComposedTransformer {
    transformers: Vec<std::sync::Arc<dyn ErrorTransformer>>,
}

impl ComposedTransformer {
    /// Create an empty composition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transformer.
    #[must_use = "This method returns a new ComposedTransformer and does not modify self"]
    pub fn with_transformer<T: ErrorTransformer + 'static>(mut self, transformer: T) -> Self {
        self.transformers.push(std::sync::Arc::new(transformer));
        self
    }
}

impl ErrorTransformer for ComposedTransformer {
    fn transform(&self, error: RpcError) -> RpcError {
        self.transformers
            .iter()
            .fold(error, |error, transformer| transformer.transform(error))
    }
}

// =============================================================================
// Tests
// =============================================================================
