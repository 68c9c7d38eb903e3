//! JSON-RPC style envelopes
//!
//! ```text
//! Request:  {id, jsonrpc?: "2.0", method, params?: {path, input}}
//! Response: {id, jsonrpc?, result: {type: "started" | "stopped"}}
//!           {id, jsonrpc?, result: {type: "data", data}}
//!           {id, jsonrpc?, error: <shaped error>}
//! ```

use crate::transformer::DataTransformer;
use crate::{ProcedureType, RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Version string accepted in (and echoed from) the `jsonrpc` field.
pub const JSONRPC_VERSION: &str = "2.0";

/// Client-chosen request identifier: a JSON number or string.
///
/// A `null` id is represented as `None` wherever ids appear.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id
    Number(serde_json::Number),
    /// String id
    String(String),
}

impl RequestId {
    /// Numeric id, with integral floats such as `7.0` folded onto `7`.
    pub fn number(n: serde_json::Number) -> Self {
        Self::Number(canonical_number(&n).unwrap_or(n))
    }
}

/// Integer form of an integral float id; `None` when `n` needs no folding.
fn canonical_number(n: &serde_json::Number) -> Option<serde_json::Number> {
    if !n.is_f64() {
        return None;
    }
    let f = n.as_f64()?;
    if f.fract() != 0.0 {
        return None;
    }
    if f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some((f as i64).into())
    } else if f >= 0.0 && f < u64::MAX as f64 {
        Some((f as u64).into())
    } else {
        None
    }
}

/// Value-based key so `7` and `7.0` name the same id.
fn number_key(n: &serde_json::Number) -> String {
    canonical_number(n).unwrap_or_else(|| n.clone()).to_string()
}

impl PartialEq for RequestId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => number_key(a) == number_key(b),
            (Self::String(a), Self::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for RequestId {}

impl Hash for RequestId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Number(n) => {
                0u8.hash(state);
                number_key(n).hash(state);
            }
            Self::String(s) => {
                1u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self::Number(id.into())
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Run a query
    #[serde(rename = "query")]
    Query,
    /// Run a mutation
    #[serde(rename = "mutation")]
    Mutation,
    /// Open a subscription
    #[serde(rename = "subscription")]
    Subscription,
    /// Stop the subscription opened under the same id
    #[serde(rename = "subscription.stop")]
    SubscriptionStop,
}

impl Method {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
            Self::Subscription => "subscription",
            Self::SubscriptionStop => "subscription.stop",
        }
    }

    /// Procedure type to dispatch to; `None` for `subscription.stop`.
    pub fn procedure_type(&self) -> Option<ProcedureType> {
        match self {
            Self::Query => Some(ProcedureType::Query),
            Self::Mutation => Some(ProcedureType::Mutation),
            Self::Subscription => Some(ProcedureType::Subscription),
            Self::SubscriptionStop => None,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "query" => Some(Self::Query),
            "mutation" => Some(Self::Mutation),
            "subscription" => Some(Self::Subscription),
            "subscription.stop" => Some(Self::SubscriptionStop),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Procedure address and input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestParams {
    /// Procedure path
    pub path: String,
    /// Procedure input (after the transformer's `deserialize`)
    #[serde(default)]
    pub input: Value,
}

/// Inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Request id; `None` when `null` or absent
    pub id: Option<RequestId>,
    /// `"2.0"` when the client speaks JSON-RPC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// What to do
    pub method: Method,
    /// Required for every method except `subscription.stop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<RequestParams>,
}

impl RequestEnvelope {
    /// Envelope for a query, mutation or subscription.
    pub fn new(
        id: impl Into<RequestId>,
        method: Method,
        path: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id: Some(id.into()),
            jsonrpc: None,
            method,
            params: Some(RequestParams {
                path: path.into(),
                input,
            }),
        }
    }

    /// Envelope stopping the subscription opened under `id`.
    pub fn stop(id: impl Into<RequestId>) -> Self {
        Self {
            id: Some(id.into()),
            jsonrpc: None,
            method: Method::SubscriptionStop,
            params: None,
        }
    }
}

/// Successful response payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseResult {
    /// Subscription accepted
    Started,
    /// A query/mutation result or one subscription value
    Data {
        /// The value (after the transformer's `serialize`)
        data: Value,
    },
    /// Subscription ended
    Stopped,
}

/// Either a result or a shaped error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    /// Success
    Result(ResponseResult),
    /// Failure, shaped by the router
    Error(Value),
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request this answers; `null` when unknown
    pub id: Option<RequestId>,
    /// Echo of the request's `jsonrpc`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    /// Result or error
    #[serde(flatten)]
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    /// Result response.
    pub fn result(id: Option<RequestId>, jsonrpc: Option<String>, result: ResponseResult) -> Self {
        Self {
            id,
            jsonrpc,
            body: ResponseBody::Result(result),
        }
    }

    /// Error response carrying an already shaped error.
    pub fn error(id: Option<RequestId>, jsonrpc: Option<String>, shape: Value) -> Self {
        Self {
            id,
            jsonrpc,
            body: ResponseBody::Error(shape),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Validate one inbound request field by field.
///
/// The input is passed through `transformer.deserialize`.
///
/// # Errors
///
/// `PARSE_ERROR` describing the first offending field.
pub fn parse_request(value: Value, transformer: &dyn DataTransformer) -> RpcResult<RequestEnvelope> {
    let Value::Object(mut map) = value else {
        return Err(RpcError::parse_error("Request must be an object"));
    };

    let id = match map.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => Some(RequestId::number(n)),
        Some(Value::String(s)) => Some(RequestId::String(s)),
        Some(other) => {
            return Err(RpcError::parse_error(format!(
                "`id` must be a number, a string or null, got {}",
                type_name(&other)
            )));
        }
    };

    let jsonrpc = match map.remove("jsonrpc") {
        None => None,
        Some(Value::String(v)) if v == JSONRPC_VERSION => Some(v),
        Some(other) => {
            return Err(RpcError::parse_error(format!(
                "`jsonrpc` must be \"{JSONRPC_VERSION}\", got {other}"
            )));
        }
    };

    let method = match map.remove("method") {
        Some(Value::String(raw)) => Method::parse(&raw).ok_or_else(|| {
            RpcError::parse_error(format!("Unknown method `{raw}`"))
        })?,
        Some(other) => {
            return Err(RpcError::parse_error(format!(
                "`method` must be a string, got {}",
                type_name(&other)
            )));
        }
        None => return Err(RpcError::parse_error("`method` is required")),
    };

    let params = if method == Method::SubscriptionStop {
        None
    } else {
        Some(parse_params(map.remove("params"), transformer)?)
    };

    Ok(RequestEnvelope {
        id,
        jsonrpc,
        method,
        params,
    })
}

fn parse_params(params: Option<Value>, transformer: &dyn DataTransformer) -> RpcResult<RequestParams> {
    let mut params: Map<String, Value> = match params {
        Some(Value::Object(map)) => map,
        Some(other) => {
            return Err(RpcError::parse_error(format!(
                "`params` must be an object, got {}",
                type_name(&other)
            )));
        }
        None => return Err(RpcError::parse_error("`params` is required")),
    };

    let path = match params.remove("path") {
        Some(Value::String(path)) => path,
        Some(other) => {
            return Err(RpcError::parse_error(format!(
                "`params.path` must be a string, got {}",
                type_name(&other)
            )));
        }
        None => return Err(RpcError::parse_error("`params.path` is required")),
    };

    let raw_input = params.remove("input").unwrap_or(Value::Null);
    let input = transformer.deserialize(raw_input).map_err(|e| {
        debug!(path = %path, error = %e, "Input transformer rejected input");
        RpcError::parse_error(format!("Failed to deserialize input: {}", e.message))
            .with_cause(e.to_string())
    })?;

    Ok(RequestParams { path, input })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RpcErrorCode;
    use crate::transformer::DefaultTransformer;
    use serde_json::json;

    fn parse(value: Value) -> RpcResult<RequestEnvelope> {
        parse_request(value, &DefaultTransformer)
    }

    #[test]
    fn test_parse_full_request() {
        let request = parse(json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "query",
            "params": { "path": "hello", "input": { "name": "client" } }
        }))
        .unwrap();

        assert_eq!(request.id, Some(RequestId::from(1u64)));
        assert_eq!(request.jsonrpc.as_deref(), Some("2.0"));
        assert_eq!(request.method, Method::Query);
        assert_eq!(
            request.params,
            Some(RequestParams {
                path: "hello".into(),
                input: json!({ "name": "client" })
            })
        );
    }

    #[test]
    fn test_stop_needs_no_params() {
        let request = parse(json!({ "id": "a", "method": "subscription.stop" })).unwrap();
        assert_eq!(request.method, Method::SubscriptionStop);
        assert!(request.params.is_none());
    }

    #[test]
    fn test_missing_input_is_null() {
        let request = parse(json!({ "id": 1, "method": "mutation", "params": { "path": "p" } })).unwrap();
        assert_eq!(request.params.unwrap().input, Value::Null);
    }

    #[test]
    fn test_rejects_malformed_fields() {
        let cases = [
            json!([]),
            json!({ "id": true, "method": "query", "params": { "path": "p" } }),
            json!({ "id": 1, "jsonrpc": "1.0", "method": "query", "params": { "path": "p" } }),
            json!({ "id": 1, "method": "call", "params": { "path": "p" } }),
            json!({ "id": 1, "params": { "path": "p" } }),
            json!({ "id": 1, "method": "query" }),
            json!({ "id": 1, "method": "query", "params": { "input": 1 } }),
            json!({ "id": 1, "method": "query", "params": { "path": 3 } }),
        ];
        for case in cases {
            let err = parse(case.clone()).unwrap_err();
            assert_eq!(err.code, RpcErrorCode::ParseError, "{case}");
        }
    }

    #[test]
    fn test_request_id_display_and_equality() {
        assert_eq!(RequestId::from(7u64).to_string(), "7");
        assert_eq!(RequestId::from("abc").to_string(), "abc");
        assert_ne!(RequestId::from(7u64), RequestId::from("7"));
        let from_json: RequestId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(from_json, RequestId::from(7u64));
    }

    #[test]
    fn test_integral_float_ids_match_integers() {
        use std::collections::HashSet;

        let float: RequestId = serde_json::from_value(json!(7.0)).unwrap();
        assert_eq!(float, RequestId::from(7u64));
        assert_eq!(RequestId::from(-3i64), serde_json::from_value(json!(-3.0)).unwrap());
        assert_ne!(RequestId::from(7u64), serde_json::from_value(json!(7.5)).unwrap());

        let ids: HashSet<RequestId> = [float, RequestId::from(7u64)].into_iter().collect();
        assert_eq!(ids.len(), 1);

        // Parsed ids are folded, so responses echo the integer form.
        let request = parse(json!({ "id": 7.0, "method": "subscription.stop" })).unwrap();
        assert_eq!(serde_json::to_value(request.id).unwrap(), json!(7));
    }

    #[test]
    fn test_response_shapes() {
        let data = ResponseEnvelope::result(
            Some(1u64.into()),
            None,
            ResponseResult::Data { data: json!({ "text": "hi" }) },
        );
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({ "id": 1, "result": { "type": "data", "data": { "text": "hi" } } })
        );

        let started = ResponseEnvelope::result(Some("s".into()), Some("2.0".into()), ResponseResult::Started);
        assert_eq!(
            serde_json::to_value(&started).unwrap(),
            json!({ "id": "s", "jsonrpc": "2.0", "result": { "type": "started" } })
        );

        let error = ResponseEnvelope::error(None, None, json!({ "code": "PARSE_ERROR" }));
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({ "id": null, "error": { "code": "PARSE_ERROR" } })
        );
    }

    #[test]
    fn test_request_encode_decode_preserves_fields() {
        let request = RequestEnvelope::new(42u64, Method::Subscription, "ticks", json!({ "every": 5 }));
        let encoded = serde_json::to_value(&request).unwrap();
        let decoded = parse(encoded).unwrap();
        assert_eq!(decoded, request);
    }
}
