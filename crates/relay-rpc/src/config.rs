//! Transport configuration.
//!
//! [`TransportConfig`] tunes how a [`TransportHandler`](crate::TransportHandler)
//! decodes inbound traffic; [`BatchConfig`] bounds batched envelopes.
//!
//! # Example
//! ```rust,ignore
//! use relay_rpc::{BatchConfig, TransportConfig};
//!
//! let config = TransportConfig::new()
//!     .with_envelope_key("relay-rpc")
//!     .with_max_message_size(256 * 1024)
//!     .with_batch_config(BatchConfig::new().with_max_batch_size(20));
//! config.validate()?;
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default upper bound for a single inbound text payload (1MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default upper bound for the number of envelopes in one batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Error type for configuration validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigValidationError {
    /// max_message_size must be greater than 0
    #[error("max_message_size must be greater than 0")]
    InvalidMaxMessageSize,
    /// envelope_key must not be empty when set
    #[error("envelope_key must not be empty")]
    EmptyEnvelopeKey,
    /// BatchConfig validation failed
    #[error("invalid batch config: {0}")]
    InvalidBatchConfig(String),
}

/// Configuration for batched envelopes (a JSON array of requests in one message).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of envelopes accepted in one message (default: 100)
    pub max_batch_size: usize,
    /// Dispatch batch members concurrently (default: true)
    pub parallel_execution: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            parallel_execution: true,
        }
    }
}

impl BatchConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum batch size.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Enable or disable concurrent dispatch of batch members.
    #[must_use = "This method returns a new BatchConfig and does not modify self"]
    pub fn with_parallel_execution(mut self, enabled: bool) -> Self {
        self.parallel_execution = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_size == 0 {
            return Err("max_batch_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Transport handler configuration.
///
/// * `envelope_key` - When set, inbound messages must carry the request under
///   this key (messages without it are ignored as foreign traffic on a shared
///   channel) and every response is wrapped under the same key. Default: `None`.
/// * `max_message_size` - Maximum size in bytes of a text payload. Larger
///   messages are answered with `PAYLOAD_TOO_LARGE`. Default: 1MB.
/// * `batch` - Batch limits. Default: `BatchConfig::default()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Optional key wrapping every envelope on the channel
    pub envelope_key: Option<String>,
    /// Maximum inbound text payload size in bytes
    pub max_message_size: usize,
    /// Batch configuration
    pub batch: BatchConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            envelope_key: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            batch: BatchConfig::default(),
        }
    }
}

impl TransportConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_message_size` is 0, `envelope_key` is an
    /// empty string, or the batch configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_message_size == 0 {
            return Err(ConfigValidationError::InvalidMaxMessageSize);
        }
        if self.envelope_key.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigValidationError::EmptyEnvelopeKey);
        }
        self.batch
            .validate()
            .map_err(ConfigValidationError::InvalidBatchConfig)
    }

    /// Wrap every envelope under `key`.
    #[must_use = "This method returns a new TransportConfig and does not modify self"]
    pub fn with_envelope_key(mut self, key: impl Into<String>) -> Self {
        self.envelope_key = Some(key.into());
        self
    }

    /// Set the maximum inbound text payload size.
    #[must_use = "This method returns a new TransportConfig and does not modify self"]
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the batch configuration.
    #[must_use = "This method returns a new TransportConfig and does not modify self"]
    pub fn with_batch_config(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }
}
