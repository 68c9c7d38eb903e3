//! Wire data transformers
//!
//! A [`DataTransformer`] rewrites procedure inputs as they arrive and results
//! as they leave. Inputs pass through [`DataTransformer::deserialize`] while
//! the envelope is parsed (a failure there is a `PARSE_ERROR`); outgoing data
//! passes through [`DataTransformer::serialize`].

use crate::RpcResult;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Converts values between their wire and in-process forms.
pub trait DataTransformer: Send + Sync {
    /// Prepare outgoing data for the wire.
    fn serialize(&self, value: Value) -> Value;

    /// Decode incoming input from the wire.
    fn deserialize(&self, value: Value) -> RpcResult<Value>;
}

/// Passes values through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransformer;

impl DataTransformer for DefaultTransformer {
    fn serialize(&self, value: Value) -> Value {
        value
    }

    fn deserialize(&self, value: Value) -> RpcResult<Value> {
        Ok(value)
    }
}

/// Uses one transformer for inputs and another for outputs.
#[derive(Clone)]
pub struct CombinedTransformer {
    input: Arc<dyn DataTransformer>,
    output: Arc<dyn DataTransformer>,
}

impl CombinedTransformer {
    /// Decode inputs with `input`, encode outputs with `output`.
    pub fn new(input: impl DataTransformer + 'static, output: impl DataTransformer + 'static) -> Self {
        Self {
            input: Arc::new(input),
            output: Arc::new(output),
        }
    }
}

impl DataTransformer for CombinedTransformer {
    fn serialize(&self, value: Value) -> Value {
        self.output.serialize(value)
    }

    fn deserialize(&self, value: Value) -> RpcResult<Value> {
        self.input.deserialize(value)
    }
}

impl fmt::Debug for CombinedTransformer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CombinedTransformer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcError;
    use serde_json::json;

    /// Wraps outputs as `{"json": value}` and unwraps inputs the same way.
    struct Tagged;

    impl DataTransformer for Tagged {
        fn serialize(&self, value: Value) -> Value {
            json!({ "json": value })
        }

        fn deserialize(&self, value: Value) -> RpcResult<Value> {
            match value {
                Value::Object(mut map) => map
                    .remove("json")
                    .ok_or_else(|| RpcError::parse_error("missing `json` key")),
                _ => Err(RpcError::parse_error("expected an object")),
            }
        }
    }

    #[test]
    fn test_default_is_identity() {
        let t = DefaultTransformer;
        assert_eq!(t.serialize(json!([1, 2])), json!([1, 2]));
        assert_eq!(t.deserialize(json!("x")).unwrap(), json!("x"));
    }

    #[test]
    fn test_combined_uses_each_side() {
        let t = CombinedTransformer::new(Tagged, DefaultTransformer);
        assert_eq!(t.deserialize(json!({ "json": 5 })).unwrap(), json!(5));
        assert!(t.deserialize(json!(5)).is_err());
        assert_eq!(t.serialize(json!(5)), json!(5));

        let t = CombinedTransformer::new(DefaultTransformer, Tagged);
        assert_eq!(t.serialize(json!(5)), json!({ "json": 5 }));
    }
}
