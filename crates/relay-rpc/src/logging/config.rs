//! Configuration for [`logging_middleware`](super::logging_middleware).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Default threshold for slow procedure warnings in milliseconds.
pub const DEFAULT_SLOW_THRESHOLD_MS: u64 = 1000;

/// Default replacement string for redacted sensitive fields.
pub const DEFAULT_REDACTION_REPLACEMENT: &str = "[REDACTED]";

/// Field names redacted by default (case-insensitive substring match).
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credential",
    "private_key",
    "privatekey",
    "ssn",
    "credit_card",
    "creditcard",
    "card_number",
    "cardnumber",
    "cvv",
    "bearer",
];

/// Level at which completed calls are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Very verbose
    Trace,
    /// Debugging detail
    Debug,
    /// Normal operation
    Info,
    /// Something looks wrong
    Warn,
    /// Something failed
    Error,
    /// Logging disabled
    Off,
}

/// Controls what the logging middleware records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for successful calls (failures are always logged at `warn`).
    pub level: LogLevel,
    /// Whether to log the (redacted) raw input.
    pub log_input: bool,
    /// Whether to log the (redacted) output of queries and mutations.
    pub log_output: bool,
    /// Field names to redact (case-insensitive substring match).
    pub redacted_fields: HashSet<String>,
    /// Replacement string for redacted values.
    pub redaction_replacement: String,
    /// Paths that are never logged.
    pub excluded_paths: HashSet<String>,
    /// Per-path level overrides.
    pub procedure_levels: HashMap<String, LogLevel>,
    /// Calls slower than this are logged at `warn`.
    pub slow_request_threshold_ms: Option<u64>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_input: false,
            log_output: false,
            redacted_fields: DEFAULT_SENSITIVE_FIELDS
                .iter()
                .map(|field| (*field).to_string())
                .collect(),
            redaction_replacement: DEFAULT_REDACTION_REPLACEMENT.to_string(),
            excluded_paths: HashSet::new(),
            procedure_levels: HashMap::new(),
            slow_request_threshold_ms: Some(DEFAULT_SLOW_THRESHOLD_MS),
        }
    }
}

impl LogConfig {
    /// Creates a new logging configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level for successful calls.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets whether to log request input (redacted).
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_input_logging(mut self, enabled: bool) -> Self {
        self.log_input = enabled;
        self
    }

    /// Sets whether to log response output (redacted).
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_output_logging(mut self, enabled: bool) -> Self {
        self.log_output = enabled;
        self
    }

    /// Adds a field name to the redaction list.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn redact_field(mut self, field: impl Into<String>) -> Self {
        self.redacted_fields.insert(field.into());
        self
    }

    /// Clears all redacted fields, including the defaults.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn clear_redacted_fields(mut self) -> Self {
        self.redacted_fields.clear();
        self
    }

    /// Sets the replacement string for redacted values.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_redaction_replacement(mut self, replacement: impl Into<String>) -> Self {
        self.redaction_replacement = replacement.into();
        self
    }

    /// Excludes a path from logging.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn exclude_path(mut self, path: impl Into<String>) -> Self {
        self.excluded_paths.insert(path.into());
        self
    }

    /// Sets a custom level for one procedure path.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_procedure_level(mut self, path: impl Into<String>, level: LogLevel) -> Self {
        self.procedure_levels.insert(path.into(), level);
        self
    }

    /// Sets the slow call threshold.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn with_slow_request_threshold(mut self, threshold_ms: u64) -> Self {
        self.slow_request_threshold_ms = Some(threshold_ms);
        self
    }

    /// Disables slow call warnings.
    #[must_use = "This method returns a new LogConfig and does not modify self"]
    pub fn without_slow_request_logging(mut self) -> Self {
        self.slow_request_threshold_ms = None;
        self
    }

    /// Whether `path` should be logged at all.
    pub fn should_log_path(&self, path: &str) -> bool {
        self.level != LogLevel::Off && !self.excluded_paths.contains(path)
    }

    /// Effective level for `path`.
    pub fn level_for_path(&self, path: &str) -> LogLevel {
        self.procedure_levels
            .get(path)
            .copied()
            .unwrap_or(self.level)
    }
}
