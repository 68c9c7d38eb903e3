//! Middleware tests - onion ordering, context replacement and guarded steps

use crate::middleware::MiddlewareOk;
use crate::{
    Context, MiddlewareFn, MiddlewareResult, Next, ProcedureBuilder, ProcedureCallOptions,
    ProcedureOutput, Request, RpcError, RpcErrorCode, RpcResult, from_fn,
};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct AppContext {
    user: Option<String>,
}

async fn current_user(ctx: Context<AppContext>, _: ()) -> RpcResult<Value> {
    Ok(json!(ctx.user))
}

fn call_options() -> ProcedureCallOptions<AppContext> {
    ProcedureCallOptions::new("me", Value::Null, AppContext::default())
}

fn recorder(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> MiddlewareFn<AppContext> {
    let log = Arc::clone(log);
    from_fn(
        move |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{label}:before"));
                let result = next.run().await;
                log.lock().unwrap().push(format!("{label}:after"));
                result
            }
        },
    )
}

#[tokio::test]
async fn test_onion_ordering() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let procedure = ProcedureBuilder::new()
        .use_middleware(recorder(&log, "outer"))
        .use_middleware(recorder(&log, "inner"))
        .query(current_user);

    procedure.call(call_options()).await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["outer:before", "inner:before", "inner:after", "outer:after"]
    );
}

#[tokio::test]
async fn test_run_with_replaces_context_downstream() {
    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                let authed = AppContext {
                    user: Some("ada".into()),
                    ..(*ctx).clone()
                };
                next.run_with(authed).await
            },
        ))
        .query(current_user);

    let output = procedure.call(call_options()).await.unwrap();
    assert_eq!(output.into_data().unwrap(), json!("ada"));
}

#[tokio::test]
async fn test_result_carries_resolver_context() {
    let seen = Arc::new(Mutex::new(None));
    let seen_in_mw = Arc::clone(&seen);

    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            move |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| {
                let seen = Arc::clone(&seen_in_mw);
                async move {
                    let result = next.run().await;
                    if let Ok(ok) = &result {
                        *seen.lock().unwrap() = ok.ctx.user.clone();
                    }
                    result
                }
            },
        ))
        .use_middleware(from_fn(
            |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                next.run_with(AppContext {
                    user: Some("grace".into()),
                })
                .await
            },
        ))
        .query(current_user);

    procedure.call(call_options()).await.unwrap();
    assert_eq!(seen.lock().unwrap().as_deref(), Some("grace"));
}

#[tokio::test]
async fn test_short_circuit_skips_resolver() {
    let reached = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&reached);

    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                if ctx.user.is_none() {
                    return Err(RpcError::unauthorized("Sign in first"));
                }
                next.run().await
            },
        ))
        .query(move |_ctx: Context<AppContext>, _: ()| {
            let flag = Arc::clone(&flag);
            async move {
                *flag.lock().unwrap() = true;
                Ok::<_, RpcError>(Value::Null)
            }
        });

    let err = procedure.call(call_options()).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::Unauthorized);
    assert!(!*reached.lock().unwrap());
}

#[tokio::test]
async fn test_outer_middleware_observes_inner_errors() {
    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                next.run().await.map_err(|e| {
                    RpcError::new(e.code, format!("wrapped: {}", e.message))
                })
            },
        ))
        .query(|_ctx: Context<AppContext>, _: ()| async move {
            Err::<Value, _>(RpcError::not_found("User not found"))
        });

    let err = procedure.call(call_options()).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::NotFound);
    assert_eq!(err.message, "wrapped: User not found");
}

#[tokio::test]
async fn test_middleware_may_rewrite_output() {
    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                let MiddlewareOk { data, ctx } = next.run().await?;
                let data = match data {
                    ProcedureOutput::Data(value) => ProcedureOutput::Data(json!({ "wrapped": value })),
                    stream => stream,
                };
                Ok::<_, RpcError>(MiddlewareOk { data, ctx })
            },
        ))
        .query(|_ctx: Context<AppContext>, _: ()| async move { Ok::<_, RpcError>(7) });

    let output = procedure.call(call_options()).await.unwrap();
    assert_eq!(output.into_data().unwrap(), json!({ "wrapped": 7 }));
}

#[tokio::test]
async fn test_middleware_without_result_is_internal_error() {
    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| async move {
                let _ = next.run().await;
            },
        ))
        .query(current_user);

    let err = procedure.call(call_options()).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
    assert!(err.message.contains("forget to `return next()`"), "{}", err.message);
}

#[tokio::test]
async fn test_panicking_middleware_becomes_internal_error() {
    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            |_ctx: Context<AppContext>, req: Request, _next: Next<AppContext>| async move {
                if req.path == "me" {
                    panic!("middleware exploded");
                }
                None::<MiddlewareResult<AppContext>>
            },
        ))
        .query(current_user);

    let err = procedure.call(call_options()).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
    assert_eq!(err.message, "middleware exploded");
}

#[tokio::test]
async fn test_panicking_resolver_is_caught() {
    let procedure = ProcedureBuilder::<AppContext>::new().query(
        |_ctx: Context<AppContext>, _: ()| async move {
            if true {
                panic!("resolver exploded");
            }
            Ok::<Value, RpcError>(Value::Null)
        },
    );

    let err = procedure.call(call_options()).await.unwrap_err();
    assert_eq!(err.code, RpcErrorCode::InternalServerError);
    assert_eq!(err.message, "resolver exploded");
}

#[tokio::test]
async fn test_request_exposes_path_parts() {
    let captured = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&captured);

    let procedure = ProcedureBuilder::new()
        .use_middleware(from_fn(
            move |_ctx: Context<AppContext>, req: Request, next: Next<AppContext>| {
                let sink = Arc::clone(&sink);
                async move {
                    *sink.lock().unwrap() =
                        Some((req.namespace().map(String::from), req.procedure().to_string()));
                    next.run().await
                }
            },
        ))
        .query(current_user);

    procedure
        .call(ProcedureCallOptions::new(
            "users.profile.me",
            Value::Null,
            AppContext::default(),
        ))
        .await
        .unwrap();

    assert_eq!(
        captured.lock().unwrap().clone(),
        Some((Some("users".to_string()), "me".to_string()))
    );
}

// =============================================================================
// Property-Based Tests
// =============================================================================

proptest! {
    /// Every middleware runs exactly once, in declaration order, for any chain length.
    #[test]
    fn prop_each_middleware_runs_once_in_order(count in 0usize..12) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut builder = ProcedureBuilder::new();
        for index in 0..count {
            let log = Arc::clone(&log);
            builder = builder.use_middleware(from_fn(
                move |_ctx: Context<AppContext>, _req: Request, next: Next<AppContext>| {
                    let log = Arc::clone(&log);
                    async move {
                        log.lock().unwrap().push(index);
                        next.run().await
                    }
                },
            ));
        }
        let procedure = builder.query(current_user);

        let result = rt.block_on(procedure.call(call_options()));
        prop_assert!(result.is_ok());
        prop_assert_eq!(log.lock().unwrap().clone(), (0..count).collect::<Vec<_>>());
    }
}
