//! Sensitive data redaction for logged payloads.

use super::config::LogConfig;
use serde_json::Value;

/// Replaces values of sensitive keys, recursively.
///
/// Field names are lowercased once up front; only the parts of a value that
/// actually change are cloned.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    sensitive_fields_lower: Vec<String>,
    replacement: String,
}

impl RedactionEngine {
    /// Creates a redaction engine from configuration.
    pub fn new(config: &LogConfig) -> Self {
        Self {
            sensitive_fields_lower: config
                .redacted_fields
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            replacement: config.redaction_replacement.clone(),
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key_lower = key.to_lowercase();
        self.sensitive_fields_lower
            .iter()
            .any(|field| key_lower.contains(field.as_str()))
    }

    /// Redacts sensitive fields from a JSON value.
    pub fn redact(&self, value: &Value) -> Value {
        self.redact_changed(value).unwrap_or_else(|| value.clone())
    }

    /// `None` when nothing needed redacting.
    fn redact_changed(&self, value: &Value) -> Option<Value> {
        match value {
            Value::Object(map) => {
                let mut changed = false;
                let redacted = map
                    .iter()
                    .map(|(key, val)| {
                        let val = if self.is_sensitive(key) {
                            changed = true;
                            Value::String(self.replacement.clone())
                        } else if let Some(inner) = self.redact_changed(val) {
                            changed = true;
                            inner
                        } else {
                            val.clone()
                        };
                        (key.clone(), val)
                    })
                    .collect();
                changed.then_some(Value::Object(redacted))
            }
            Value::Array(items) => {
                let mut changed = false;
                let redacted = items
                    .iter()
                    .map(|val| match self.redact_changed(val) {
                        Some(inner) => {
                            changed = true;
                            inner
                        }
                        None => val.clone(),
                    })
                    .collect();
                changed.then_some(Value::Array(redacted))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_sensitive_keys() {
        let engine = RedactionEngine::new(&LogConfig::new());
        let input = json!({
            "user": "ada",
            "Password": "hunter2",
            "nested": { "apiKey": "k", "items": [{ "refresh_token": "t" }, 3] }
        });

        assert_eq!(
            engine.redact(&input),
            json!({
                "user": "ada",
                "Password": "[REDACTED]",
                "nested": { "apiKey": "[REDACTED]", "items": [{ "refresh_token": "[REDACTED]" }, 3] }
            })
        );
    }

    #[test]
    fn test_untouched_values_are_equal() {
        let engine = RedactionEngine::new(&LogConfig::new());
        let input = json!({ "name": "ada", "tags": ["a", "b"] });
        assert_eq!(engine.redact(&input), input);
    }

    #[test]
    fn test_custom_fields_and_replacement() {
        let config = LogConfig::new()
            .clear_redacted_fields()
            .redact_field("email")
            .with_redaction_replacement("***");
        let engine = RedactionEngine::new(&config);
        assert_eq!(
            engine.redact(&json!({ "email": "a@b.c", "password": "p" })),
            json!({ "email": "***", "password": "p" })
        );
    }
}
