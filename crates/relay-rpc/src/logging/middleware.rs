use super::config::{LogConfig, LogLevel};
use super::redaction::RedactionEngine;
use crate::middleware::{MiddlewareFn, MiddlewareResult, Next, ProcedureType, Request, from_fn};
use crate::procedure::ProcedureOutput;
use crate::{Context, RpcError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Emit a completion event at a runtime-selected level.
fn log_success(
    level: LogLevel,
    path: &str,
    procedure_type: ProcedureType,
    duration_ms: u64,
    input: Option<&Value>,
    output: Option<&Value>,
) {
    macro_rules! emit {
        ($macro:ident) => {
            $macro!(
                path = %path,
                procedure_type = %procedure_type,
                duration_ms,
                input = ?input,
                output = ?output,
                "Procedure call succeeded"
            )
        };
    }

    match level {
        LogLevel::Trace => emit!(trace),
        LogLevel::Debug => emit!(debug),
        LogLevel::Info => emit!(info),
        LogLevel::Warn => emit!(warn),
        LogLevel::Error => emit!(error),
        LogLevel::Off => {}
    }
}

fn log_failure(
    path: &str,
    procedure_type: ProcedureType,
    duration_ms: u64,
    input: Option<&Value>,
    err: &RpcError,
) {
    warn!(
        path = %path,
        procedure_type = %procedure_type,
        duration_ms,
        input = ?input,
        error_code = %err.code,
        error_message = %err.message,
        "Procedure call failed"
    );
}

/// Creates a logging middleware with the given configuration.
///
/// Every call is logged on completion with its path, type and duration;
/// failures at `warn`, successes at the configured level. Input and output
/// are only included when enabled, and always pass through redaction.
///
/// # Example
///
/// ```rust,ignore
/// let config = LogConfig::new()
///     .with_input_logging(true)
///     .redact_field("email")
///     .exclude_path("health");
///
/// let router = Router::new()
///     .middleware(logging_middleware(config))
///     .query("users.get", get_user);
/// ```
pub fn logging_middleware<Ctx>(config: LogConfig) -> MiddlewareFn<Ctx>
where
    Ctx: Send + Sync + 'static,
{
    let engine = Arc::new(RedactionEngine::new(&config));
    let config = Arc::new(config);

    from_fn(move |_ctx: Context<Ctx>, req: Request, next: Next<Ctx>| {
        let config = Arc::clone(&config);
        let engine = Arc::clone(&engine);

        async move {
            if !config.should_log_path(&req.path) {
                return next.run().await;
            }

            trace!(path = %req.path, procedure_type = %req.procedure_type, "Procedure call started");
            let input = config.log_input.then(|| engine.redact(&req.input));
            let start = Instant::now();

            let result: MiddlewareResult<Ctx> = next.run().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match &result {
                Ok(ok) => {
                    let output = match &ok.data {
                        ProcedureOutput::Data(value) if config.log_output => {
                            Some(engine.redact(value))
                        }
                        _ => None,
                    };
                    log_success(
                        config.level_for_path(&req.path),
                        &req.path,
                        req.procedure_type,
                        duration_ms,
                        input.as_ref(),
                        output.as_ref(),
                    );
                }
                Err(err) => {
                    log_failure(&req.path, req.procedure_type, duration_ms, input.as_ref(), err);
                }
            }

            if config
                .slow_request_threshold_ms
                .is_some_and(|threshold| duration_ms > threshold)
            {
                warn!(
                    path = %req.path,
                    duration_ms,
                    threshold_ms = ?config.slow_request_threshold_ms,
                    "Slow procedure call"
                );
            }

            result
        }
    })
}
