//! Integration tests for the transport handler
//!
//! These tests drive a router end to end through the public API: a client
//! posts envelopes on one end of a `LocalChannel` and reads the responses.

use relay_rpc::prelude::*;
use relay_rpc::transport::{Payload, RequestEnvelope, ResponseEnvelope, ResponseResult};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;

// =============================================================================
// Test Context and Handlers
// =============================================================================

#[derive(Debug, Clone, Default)]
struct AppContext {
    peer: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateUser {
    name: String,
    age: i64,
}

impl Validate for CreateUser {
    fn validate(&self) -> ValidationResult {
        ValidationRules::new()
            .required("name", &self.name)
            .range("age", self.age, 0, 150)
            .build()
    }
}

async fn hello(_ctx: Context<AppContext>, name: String) -> RpcResult<Value> {
    Ok(json!({ "text": format!("hello {name}") }))
}

async fn create_user(ctx: Context<AppContext>, input: CreateUser) -> RpcResult<Value> {
    Ok(json!({ "name": input.name, "createdBy": ctx.peer }))
}

async fn ticker(_ctx: Context<AppContext>, interval_ms: u64) -> RpcResult<Observable<u64>> {
    Ok(Observable::from_stream_fn(move || {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        async_stream::stream! {
            let mut n = 0u64;
            loop {
                interval.tick().await;
                yield Ok(n);
                n += 1;
            }
        }
    }))
}

fn app_router() -> Router<AppContext> {
    let users = Router::new().procedure(
        "create",
        ProcedureBuilder::new()
            .input(Parser::validated::<CreateUser>())
            .mutation(create_user),
    );

    Router::new()
        .middleware(logging_middleware(LogConfig::new().with_level(LogLevel::Debug)))
        .query("hello", hello)
        .subscription("ticker", ticker)
        .merge("users", users)
}

struct Client {
    channel: LocalChannel,
}

impl Client {
    fn connect(router: Router<AppContext>) -> Self {
        let (server_end, channel) = LocalChannel::pair("server", "client");
        let handler = TransportHandler::new(router, server_end, |peer: &LocalPeer| {
            let peer = peer.to_string();
            async move { Ok::<_, RpcError>(AppContext { peer }) }
        })
        .unwrap();
        tokio::spawn(async move { handler.serve().await });
        Self { channel }
    }

    fn send(&self, message: Value) {
        self.channel.post(message).unwrap();
    }

    fn request(&self, request: RequestEnvelope) {
        self.send(serde_json::to_value(request).unwrap());
    }

    async fn recv(&self) -> Value {
        let inbound = timeout(Duration::from_secs(2), self.channel.recv())
            .await
            .expect("timed out waiting for a response")
            .expect("channel closed");
        let Payload::Json(value) = inbound.payload else {
            panic!("expected a JSON payload");
        };
        value
    }

    async fn expect_silence(&self) {
        assert!(
            timeout(Duration::from_millis(50), self.channel.recv())
                .await
                .is_err()
        );
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_hello_query() {
    let client = Client::connect(app_router());
    client.send(json!({ "id": 1, "method": "query", "params": { "path": "hello", "input": "client" } }));

    assert_eq!(
        client.recv().await,
        json!({ "id": 1, "result": { "type": "data", "data": { "text": "hello client" } } })
    );
}

#[tokio::test]
async fn test_typed_envelopes_round_trip() {
    let client = Client::connect(app_router());
    client.request(RequestEnvelope::new(
        42u64,
        relay_rpc::transport::Method::Query,
        "hello",
        json!("typed"),
    ));

    let response: ResponseEnvelope = serde_json::from_value(client.recv().await).unwrap();
    assert_eq!(
        response,
        ResponseEnvelope::result(
            Some(42u64.into()),
            None,
            ResponseResult::Data {
                data: json!({ "text": "hello typed" })
            }
        )
    );
}

#[tokio::test]
async fn test_validated_mutation() {
    let client = Client::connect(app_router());

    client.send(json!({
        "id": 1,
        "method": "mutation",
        "params": { "path": "users.create", "input": { "name": "Ada", "age": 36 } }
    }));
    assert_eq!(
        client.recv().await["result"]["data"],
        json!({ "name": "Ada", "createdBy": "client" })
    );

    client.send(json!({
        "id": 2,
        "method": "mutation",
        "params": { "path": "users.create", "input": { "name": "", "age": 36 } }
    }));
    let response = client.recv().await;
    assert_eq!(response["id"], 2);
    assert_eq!(response["error"]["code"], "BAD_REQUEST");
    assert_eq!(response["error"]["details"][0]["field"], "name");
}

#[tokio::test]
async fn test_streaming_subscription_until_stopped() {
    let client = Client::connect(app_router());
    client.send(json!({ "id": "tick", "method": "subscription", "params": { "path": "ticker", "input": 5 } }));

    assert_eq!(client.recv().await["result"]["type"], "started");
    assert_eq!(client.recv().await["result"]["data"], 0);
    assert_eq!(client.recv().await["result"]["data"], 1);

    client.send(json!({ "id": "tick", "method": "subscription.stop" }));

    // Values already queued may arrive before the stop is processed.
    loop {
        let response = client.recv().await;
        assert_eq!(response["id"], "tick");
        if response["result"]["type"] == "stopped" {
            break;
        }
        assert_eq!(response["result"]["type"], "data");
    }
    client.expect_silence().await;
}

#[tokio::test]
async fn test_duplicate_subscription_id() {
    let client = Client::connect(app_router());
    client.send(json!({ "id": 7, "method": "subscription", "params": { "path": "ticker", "input": 1000 } }));
    assert_eq!(client.recv().await["result"]["type"], "started");

    client.send(json!({ "id": 7, "method": "subscription", "params": { "path": "ticker", "input": 1000 } }));

    // Skip values from the first subscription.
    let response = loop {
        let response = client.recv().await;
        if response.get("error").is_some() {
            break response;
        }
    };
    assert_eq!(
        response,
        json!({ "id": 7, "error": { "code": "BAD_REQUEST", "message": "Duplicate id 7" } })
    );
}

#[tokio::test]
async fn test_stop_unknown_subscription_is_silent() {
    let client = Client::connect(app_router());
    client.send(json!({ "id": 99, "method": "subscription.stop" }));
    client.expect_silence().await;
}

#[tokio::test]
async fn test_missing_path_is_parse_error() {
    let client = Client::connect(app_router());
    client.send(json!({ "id": 1, "method": "query", "params": { "input": "client" } }));

    let response = client.recv().await;
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], "PARSE_ERROR");
}

#[tokio::test]
async fn test_direct_caller_matches_transport() {
    let router = app_router();
    let caller = router.create_caller(AppContext {
        peer: "local".into(),
    });

    let value = caller
        .mutation("users.create", json!({ "name": "Lin", "age": 30 }))
        .await
        .unwrap();
    assert_eq!(value, json!({ "name": "Lin", "createdBy": "local" }));

    let err = caller.query("users.create", Value::Null).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::NotFound);
}
