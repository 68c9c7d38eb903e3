//! Router tests - registration, merging, dispatch and error shaping

use crate::{
    CallOutput, CallProcedureOptions, Context, ErrorConfig, ErrorContext, MiddlewareFn, Next,
    Observable, ProcedureBuilder, ProcedureType, Request, Router, RpcError, RpcErrorCode,
    RpcResult, call_procedure, from_fn,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct AppContext {
    tenant: String,
}

async fn ping(_ctx: Context<AppContext>, _: ()) -> RpcResult<&'static str> {
    Ok("pong")
}

async fn tenant(ctx: Context<AppContext>, _: ()) -> RpcResult<String> {
    Ok(ctx.tenant.clone())
}

async fn rename(_ctx: Context<AppContext>, name: String) -> RpcResult<Value> {
    Ok(json!({ "renamed": name }))
}

async fn ticks(_ctx: Context<AppContext>, count: u32) -> RpcResult<Observable<u32>> {
    Ok(Observable::from_values((0..count).collect()))
}

fn ctx() -> AppContext {
    AppContext {
        tenant: "acme".into(),
    }
}

fn counting(counter: &Arc<Mutex<Vec<String>>>) -> MiddlewareFn<AppContext> {
    let counter = Arc::clone(counter);
    from_fn(
        move |_ctx: Context<AppContext>, req: Request, next: Next<AppContext>| {
            let counter = Arc::clone(&counter);
            async move {
                counter.lock().unwrap().push(req.path.clone());
                next.run().await
            }
        },
    )
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn test_registration_and_lookup() {
    let router = Router::<AppContext>::new()
        .query("ping", ping)
        .mutation("users.rename", rename)
        .subscription("ticks", ticks);

    assert_eq!(router.len(), 3);
    assert!(!router.is_empty());
    assert!(router.has("ping", ProcedureType::Query));
    assert!(!router.has("ping", ProcedureType::Mutation));
    assert!(router.get("ticks", ProcedureType::Subscription).is_some());
    assert_eq!(router.procedures(), vec!["ping", "ticks", "users.rename"]);
}

#[test]
fn test_same_path_different_types() {
    let router = Router::<AppContext>::new()
        .query("user", ping)
        .mutation("user", rename);

    assert_eq!(router.len(), 2);
    assert_eq!(router.procedures(), vec!["user"]);
}

#[test]
#[should_panic(expected = "Duplicate query procedure registered on path \"ping\"")]
fn test_duplicate_registration_panics() {
    let _ = Router::<AppContext>::new()
        .query("ping", ping)
        .query("ping", tenant);
}

#[test]
fn test_merge_prefixes_paths() {
    let users = Router::<AppContext>::new()
        .mutation("rename", rename)
        .query("tenant", tenant);

    let router = Router::new()
        .query("ping", ping)
        .merge("users", users)
        .merge("", Router::new().subscription("ticks", ticks));

    assert_eq!(
        router.procedures(),
        vec!["ping", "ticks", "users.rename", "users.tenant"]
    );
    assert!(router.has("users.rename", ProcedureType::Mutation));
}

#[test]
#[should_panic(expected = "Duplicate mutation procedure")]
fn test_merge_collision_panics() {
    let _ = Router::<AppContext>::new()
        .mutation("users.rename", rename)
        .merge("users", Router::new().mutation("rename", rename));
}

// =============================================================================
// Middleware scoping
// =============================================================================

#[tokio::test]
async fn test_router_middleware_applies_to_later_procedures() {
    let seen = Arc::new(Mutex::new(Vec::new()));

    let router = Router::new()
        .query("before", ping)
        .middleware(counting(&seen))
        .query("after", ping);

    let caller = router.create_caller(ctx());
    caller.query("before", Value::Null).await.unwrap();
    caller.query("after", Value::Null).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["after"]);
    assert_eq!(
        router.get("after", ProcedureType::Query).unwrap().middleware_count(),
        1
    );
}

#[tokio::test]
async fn test_merged_procedures_run_parent_middleware_first() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let order = Arc::clone(&seen);
    let child_mw = from_fn(
        move |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| {
            let order = Arc::clone(&order);
            async move {
                order.lock().unwrap().push("child".to_string());
                next.run().await
            }
        },
    );

    let child = Router::new().middleware(child_mw).query("tenant", tenant);
    let router = Router::new()
        .middleware(counting(&seen))
        .merge("org", child);

    let value = router
        .create_caller(ctx())
        .query("org.tenant", Value::Null)
        .await
        .unwrap();

    assert_eq!(value, json!("acme"));
    assert_eq!(*seen.lock().unwrap(), vec!["org.tenant", "child"]);
}

// =============================================================================
// Dispatch
// =============================================================================

#[tokio::test]
async fn test_call_procedure_by_type() {
    let router = Router::new()
        .query("tenant", tenant)
        .subscription("ticks", ticks);

    let output = call_procedure(CallProcedureOptions {
        router: &router,
        procedure_type: ProcedureType::Query,
        path: "tenant",
        input: Value::Null,
        ctx: Context::new(ctx()),
    })
    .await
    .unwrap();
    assert!(matches!(output, CallOutput::Data(ref v) if v == &json!("acme")));

    let output = call_procedure(CallProcedureOptions {
        router: &router,
        procedure_type: ProcedureType::Subscription,
        path: "ticks",
        input: json!(2),
        ctx: Context::new(ctx()),
    })
    .await
    .unwrap();
    let CallOutput::Subscription(subscription) = output else {
        panic!("expected a subscription");
    };
    assert!(!subscription.is_destroyed());
}

#[tokio::test]
async fn test_missing_procedure_is_not_found() {
    let router = Router::new().query("ping", ping);
    let caller = router.create_caller(ctx());

    let err = caller.mutation("ping", Value::Null).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::NotFound);
    assert_eq!(err.message, "No \"mutation\"-procedure on path \"ping\"");

    let err = caller.query("pong", Value::Null).await.unwrap_err();
    assert_eq!(err.message, "No \"query\"-procedure on path \"pong\"");
}

#[tokio::test]
async fn test_caller_subscription_delivers_values() {
    let router = Router::new().subscription("ticks", ticks);
    let caller = router.create_caller(ctx());

    let subscription = caller.subscription("ticks", json!(3)).await.unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let destroyed = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&destroyed);

    subscription
        .on_data(move |value| sink.lock().unwrap().push(value))
        .on_destroy(move || *flag.lock().unwrap() = true);
    subscription.start().unwrap();

    assert_eq!(*received.lock().unwrap(), vec![json!(0), json!(1), json!(2)]);
    assert!(*destroyed.lock().unwrap());
    assert!(subscription.is_destroyed());
}

#[tokio::test]
async fn test_stream_from_query_type_is_internal_error() {
    let router = Router::new().procedure(
        "odd",
        ProcedureBuilder::new().resolver(
            ProcedureType::Query,
            Arc::new(|_ctx: Context<AppContext>, _input: Value| {
                Box::pin(async {
                    Ok(crate::ProcedureOutput::Stream(Observable::from_values(vec![
                        json!(1),
                    ])))
                }) as futures::future::BoxFuture<'static, RpcResult<crate::ProcedureOutput>>
            }),
        ),
    );

    let err = router
        .create_caller(ctx())
        .query("odd", Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
}

// =============================================================================
// Error shaping
// =============================================================================

#[test]
fn test_shape_error_default_shape() {
    let router = Router::<AppContext>::new().error_config(ErrorConfig::development());
    let error = RpcError::bad_request("Missing name").with_details(json!({ "field": "name" }));

    let shape = router.shape_error(ErrorContext {
        error: &error,
        procedure_type: Some(ProcedureType::Mutation),
        path: Some("users.rename"),
        input: None,
        ctx: None,
    });

    assert_eq!(
        shape,
        json!({
            "code": "BAD_REQUEST",
            "message": "Missing name",
            "details": { "field": "name" }
        })
    );
}

#[test]
fn test_shape_error_production_sanitizes_server_errors() {
    let router = Router::<AppContext>::new().error_config(ErrorConfig::production());
    let error = RpcError::internal("db password leaked").with_cause("connection refused");

    let shape = router.shape_error(ErrorContext {
        error: &error,
        procedure_type: None,
        path: None,
        input: None,
        ctx: None,
    });

    assert_eq!(shape["code"], "INTERNAL_SERVER_ERROR");
    assert_ne!(shape["message"], "db password leaked");
    assert!(shape.get("cause").is_none());
}

#[test]
fn test_error_formatter_receives_context() {
    let router = Router::<AppContext>::new()
        .error_config(ErrorConfig::development())
        .error_formatter(|context: &ErrorContext<'_, AppContext>, mut shape: Value| {
            shape["path"] = json!(context.path);
            shape["tenant"] = json!(context.ctx.map(|ctx| ctx.tenant.clone()));
            shape
        });

    let error = RpcError::forbidden("Nope");
    let request_ctx = Context::new(ctx());
    let shape = router.shape_error(ErrorContext {
        error: &error,
        procedure_type: Some(ProcedureType::Query),
        path: Some("secrets.list"),
        input: Some(&Value::Null),
        ctx: Some(&request_ctx),
    });

    assert_eq!(shape["code"], "FORBIDDEN");
    assert_eq!(shape["path"], "secrets.list");
    assert_eq!(shape["tenant"], "acme");
}

// =============================================================================
// Property-Based Tests
// =============================================================================

proptest! {
    /// Merged paths are always `prefix.path` and every one resolves.
    #[test]
    fn prop_merge_prefix_join(
        prefix in "[a-z]{1,8}",
        names in prop::collection::btree_set("[a-z]{1,8}", 1..6),
    ) {
        let mut child = Router::<AppContext>::new();
        for name in &names {
            child = child.query(name.clone(), ping);
        }
        let router = Router::new().merge(prefix.clone(), child);

        let expected: Vec<String> = names.iter().map(|n| format!("{prefix}.{n}")).collect();
        prop_assert_eq!(router.procedures(), expected.clone());
        for path in &expected {
            prop_assert!(router.has(path, ProcedureType::Query));
        }
    }
}
