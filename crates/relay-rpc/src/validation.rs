//! Field-level input validation
//!
//! Types implementing [`Validate`] can be plugged into a procedure through
//! [`Parser::validated`](crate::Parser::validated); a failed validation becomes
//! a `BAD_REQUEST` whose `details` list the offending fields.
//!
//! ```rust,ignore
//! impl Validate for CreateUserInput {
//!     fn validate(&self) -> ValidationResult {
//!         ValidationRules::new()
//!             .required("name", &self.name)
//!             .max_length("name", &self.name, 100)
//!             .email("email", &self.email)
//!             .range("age", self.age, 0, 150)
//!             .build()
//!     }
//! }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, warn};

static EMAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").ok());

/// Validation failure for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The field that failed validation
    pub field: String,
    /// Human-readable message
    pub message: String,
    /// Machine-readable failure kind (`required`, `range`, ...)
    pub code: String,
}

impl FieldError {
    /// Create a field error.
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code: code.into(),
        }
    }

    /// `field` is required.
    pub fn required(field: &str) -> Self {
        Self::new(field, format!("{field} is required"), "required")
    }

    /// `field` is shorter than `min` characters.
    pub fn min_length(field: &str, min: usize) -> Self {
        Self::new(
            field,
            format!("{field} must be at least {min} characters"),
            "min_length",
        )
    }

    /// `field` is longer than `max` characters.
    pub fn max_length(field: &str, max: usize) -> Self {
        Self::new(
            field,
            format!("{field} must be at most {max} characters"),
            "max_length",
        )
    }

    /// `field` is outside `min..=max`.
    pub fn range(field: &str, min: i64, max: i64) -> Self {
        Self::new(
            field,
            format!("{field} must be between {min} and {max}"),
            "range",
        )
    }

    /// `field` doesn't match `pattern`.
    pub fn pattern(field: &str, pattern: &str) -> Self {
        Self::new(
            field,
            format!("{field} must match pattern: {pattern}"),
            "pattern",
        )
    }

    /// `field` isn't an email address.
    pub fn email(field: &str) -> Self {
        Self::new(field, format!("{field} must be a valid email address"), "email")
    }

    /// Free-form failure.
    pub fn custom(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(field, message, "custom")
    }
}

/// Outcome of validating a value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    errors: Vec<FieldError>,
}

impl ValidationResult {
    /// A passing result.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A result from collected errors; passes when `errors` is empty.
    pub fn from_errors(errors: Vec<FieldError>) -> Self {
        if !errors.is_empty() {
            debug!(
                error_count = errors.len(),
                fields = ?errors.iter().map(|e| e.field.as_str()).collect::<Vec<_>>(),
                "Validation failed"
            );
        }
        Self { errors }
    }

    /// Whether validation passed.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// The collected errors.
    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    /// Errors grouped by field.
    pub fn errors_by_field(&self) -> HashMap<&str, Vec<&FieldError>> {
        let mut map: HashMap<&str, Vec<&FieldError>> = HashMap::new();
        for error in &self.errors {
            map.entry(error.field.as_str()).or_default().push(error);
        }
        map
    }

    /// Combine with another result.
    #[must_use = "This method returns a new ValidationResult and does not modify self"]
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self
    }

    /// `Ok(())` when valid, otherwise a [`ValidationError`].
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                errors: self.errors,
            })
        }
    }
}

/// Error produced by a failing [`Validate`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed: {}", summarize(.errors))]
pub struct ValidationError {
    /// Every failing field
    pub errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Types that can check their own invariants after deserialization.
pub trait Validate {
    /// Validate and report every failing field.
    fn validate(&self) -> ValidationResult;
}

impl Validate for () {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

impl Validate for serde_json::Value {
    fn validate(&self) -> ValidationResult {
        ValidationResult::ok()
    }
}

impl<T: Validate> Validate for Option<T> {
    fn validate(&self) -> ValidationResult {
        self.as_ref().map(Validate::validate).unwrap_or_default()
    }
}

impl<T: Validate> Validate for Vec<T> {
    fn validate(&self) -> ValidationResult {
        self.iter()
            .map(Validate::validate)
            .fold(ValidationResult::ok(), ValidationResult::merge)
    }
}

/// Fluent collection of common rules.
#[derive(Debug, Default)]
pub struct ValidationRules {
    errors: Vec<FieldError>,
}

impl ValidationRules {
    /// Start an empty rule set.
    pub fn new() -> Self {
        Self::default()
    }

    fn check(mut self, ok: bool, error: impl FnOnce() -> FieldError) -> Self {
        if !ok {
            self.errors.push(error());
        }
        self
    }

    /// Record an arbitrary error.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn add_error(mut self, error: FieldError) -> Self {
        self.errors.push(error);
        self
    }

    /// String must contain non-whitespace.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn required(self, field: &str, value: &str) -> Self {
        self.check(!value.trim().is_empty(), || FieldError::required(field))
    }

    /// String must be at least `min` characters.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn min_length(self, field: &str, value: &str, min: usize) -> Self {
        self.check(value.chars().count() >= min, || {
            FieldError::min_length(field, min)
        })
    }

    /// String must be at most `max` characters.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn max_length(self, field: &str, value: &str, max: usize) -> Self {
        self.check(value.chars().count() <= max, || {
            FieldError::max_length(field, max)
        })
    }

    /// Integer must lie in `min..=max`.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn range(self, field: &str, value: i64, min: i64, max: i64) -> Self {
        self.check((min..=max).contains(&value), || {
            FieldError::range(field, min, max)
        })
    }

    /// String must match the regular expression `pattern`.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn pattern(self, field: &str, value: &str, pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => self.check(re.is_match(value), || FieldError::pattern(field, pattern)),
            Err(e) => {
                warn!(field = %field, pattern = %pattern, error = %e, "Invalid validation regex pattern");
                self.add_error(FieldError::new(
                    field,
                    format!("Invalid validation pattern: {pattern}"),
                    "invalid_pattern",
                ))
            }
        }
    }

    /// String must look like an email address.
    #[must_use = "This method returns a new ValidationRules and does not modify self"]
    pub fn email(self, field: &str, value: &str) -> Self {
        let valid = EMAIL.as_ref().is_some_and(|re| re.is_match(value));
        self.check(valid, || FieldError::email(field))
    }

    /// Finish and produce the result.
    pub fn build(self) -> ValidationResult {
        ValidationResult::from_errors(self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_collect_every_failure() {
        let result = ValidationRules::new()
            .required("name", "  ")
            .min_length("password", "abc", 8)
            .range("age", 200, 0, 150)
            .email("email", "not-an-email")
            .build();

        assert!(!result.is_valid());
        let codes: Vec<_> = result.errors().iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, ["required", "min_length", "range", "email"]);
    }

    #[test]
    fn test_rules_pass_valid_input() {
        let result = ValidationRules::new()
            .required("name", "Ada")
            .max_length("name", "Ada", 10)
            .email("email", "ada@example.com")
            .pattern("code", "AB-12", r"^[A-Z]{2}-\d{2}$")
            .build();
        assert!(result.is_valid());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let result = ValidationRules::new().pattern("code", "x", "(").build();
        assert_eq!(result.errors()[0].code, "invalid_pattern");
    }

    #[test]
    fn test_validation_error_message_lists_fields() {
        let err = ValidationResult::from_errors(vec![
            FieldError::required("name"),
            FieldError::email("email"),
        ])
        .into_result()
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: name is required; email must be a valid email address"
        );
    }

    #[test]
    fn test_errors_by_field_groups() {
        let result = ValidationResult::from_errors(vec![
            FieldError::required("name"),
            FieldError::min_length("name", 2),
            FieldError::email("email"),
        ]);
        let grouped = result.errors_by_field();
        assert_eq!(grouped["name"].len(), 2);
        assert_eq!(grouped["email"].len(), 1);
    }
}
