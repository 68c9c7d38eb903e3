//! Router: procedure registry plus the transport-facing hooks.

use super::caller::Caller;
use crate::handler::{Handler, SubscriptionHandler};
use crate::middleware::{MiddlewareFn, ProcedureType};
use crate::procedure::{Procedure, ProcedureBuilder};
use crate::transformer::{DataTransformer, DefaultTransformer};
use crate::{Context, ErrorConfig, RpcError};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Everything known about a failure when it is shaped for a client.
pub struct ErrorContext<'a, Ctx> {
    /// The error, already prepared with the router's [`ErrorConfig`]
    pub error: &'a RpcError,
    /// Type of the failed procedure, when the request got that far
    pub procedure_type: Option<ProcedureType>,
    /// Path of the failed procedure, when known
    pub path: Option<&'a str>,
    /// Raw input of the failed request, when known
    pub input: Option<&'a Value>,
    /// Request context, when one was created
    pub ctx: Option<&'a Context<Ctx>>,
}

impl<Ctx> fmt::Debug for ErrorContext<'_, Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorContext")
            .field("error", &self.error)
            .field("procedure_type", &self.procedure_type)
            .field("path", &self.path)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// Rewrites the default error shape (`{code, message, details?, cause?}`).
pub type ErrorFormatter<Ctx> = Arc<dyn Fn(&ErrorContext<'_, Ctx>, Value) -> Value + Send + Sync>;

/// Registry of procedures, keyed by type and path.
///
/// Middleware added with [`Router::middleware`] applies to procedures
/// registered after it.
///
/// # Example
/// ```rust,ignore
/// let router = Router::new()
///     .middleware(logging_middleware(LogConfig::new()))
///     .query("health", health)
///     .mutation("users.create", create_user)
///     .subscription("ticks", ticks)
///     .merge("admin", admin_router());
/// ```
pub struct Router<Ctx> {
    procedures: HashMap<ProcedureType, BTreeMap<String, Procedure<Ctx>>>,
    middlewares: Vec<MiddlewareFn<Ctx>>,
    transformer: Arc<dyn DataTransformer>,
    error_formatter: Option<ErrorFormatter<Ctx>>,
    error_config: ErrorConfig,
}

impl<Ctx: Send + Sync + 'static> Router<Ctx> {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            procedures: HashMap::new(),
            middlewares: Vec::new(),
            transformer: Arc::new(DefaultTransformer),
            error_formatter: None,
            error_config: ErrorConfig::default(),
        }
    }

    /// Add middleware for procedures registered from now on.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn middleware(mut self, middleware: MiddlewareFn<Ctx>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Register a procedure.
    ///
    /// # Panics
    ///
    /// Panics if a procedure of the same type is already registered on `path`.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn procedure(mut self, path: impl Into<String>, procedure: Procedure<Ctx>) -> Self {
        let path = path.into();
        let procedure = procedure.inherit_middlewares(&self.middlewares);
        self.insert(path, procedure);
        self
    }

    fn insert(&mut self, path: String, procedure: Procedure<Ctx>) {
        let procedure_type = procedure.procedure_type();
        let table = self.procedures.entry(procedure_type).or_default();
        if table.contains_key(&path) {
            panic!("Duplicate {procedure_type} procedure registered on path \"{path}\"");
        }
        trace!(path = %path, procedure_type = %procedure_type, "Registered procedure");
        table.insert(path, procedure);
    }

    /// Register a query resolver.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn query<H, Input, Output>(self, path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Ctx, Input, Output>,
        Input: DeserializeOwned + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.procedure(path, ProcedureBuilder::new().query(handler))
    }

    /// Register a mutation resolver.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn mutation<H, Input, Output>(self, path: impl Into<String>, handler: H) -> Self
    where
        H: Handler<Ctx, Input, Output>,
        Input: DeserializeOwned + Send + 'static,
        Output: Serialize + Send + 'static,
    {
        self.procedure(path, ProcedureBuilder::new().mutation(handler))
    }

    /// Register a subscription resolver.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn subscription<H, Input, Item>(self, path: impl Into<String>, handler: H) -> Self
    where
        H: SubscriptionHandler<Ctx, Input, Item>,
        Input: DeserializeOwned + Send + 'static,
        Item: Serialize + Send + 'static,
    {
        self.procedure(path, ProcedureBuilder::new().subscription(handler))
    }

    /// Mount every procedure of `other` under `prefix`.
    ///
    /// Merged procedures keep their own middleware and additionally run this
    /// router's current middleware first.
    ///
    /// # Panics
    ///
    /// Panics if a merged path collides with an existing procedure of the same type.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn merge(mut self, prefix: impl Into<String>, other: Router<Ctx>) -> Self {
        let prefix = prefix.into();
        debug!(prefix = %prefix, procedures = other.len(), "Merging router");
        for table in other.procedures.into_values() {
            for (path, procedure) in table {
                let full_path = if prefix.is_empty() {
                    path
                } else {
                    format!("{prefix}.{path}")
                };
                let procedure = procedure.inherit_middlewares(&self.middlewares);
                self.insert(full_path, procedure);
            }
        }
        self
    }

    /// Set the data transformer used by transports.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn transformer(mut self, transformer: impl DataTransformer + 'static) -> Self {
        self.transformer = Arc::new(transformer);
        self
    }

    /// Set a formatter for error shapes sent to clients.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn error_formatter(
        mut self,
        formatter: impl Fn(&ErrorContext<'_, Ctx>, Value) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.error_formatter = Some(Arc::new(formatter));
        self
    }

    /// Set how errors are prepared before shaping.
    #[must_use = "This method returns a new Router and does not modify self"]
    pub fn error_config(mut self, config: ErrorConfig) -> Self {
        self.error_config = config;
        self
    }

    // -------------------------------------------------------------------------
    // Introspection
    // -------------------------------------------------------------------------

    /// All registered paths, sorted and deduplicated across types.
    pub fn procedures(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .procedures
            .values()
            .flat_map(|table| table.keys().cloned())
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.values().map(BTreeMap::len).sum()
    }

    /// Whether no procedure is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a procedure of `procedure_type` exists on `path`.
    pub fn has(&self, path: &str, procedure_type: ProcedureType) -> bool {
        self.get(path, procedure_type).is_some()
    }

    /// Look up a procedure.
    pub fn get(&self, path: &str, procedure_type: ProcedureType) -> Option<&Procedure<Ctx>> {
        self.procedures
            .get(&procedure_type)
            .and_then(|table| table.get(path))
    }

    /// The data transformer.
    pub fn data_transformer(&self) -> &Arc<dyn DataTransformer> {
        &self.transformer
    }

    /// The error configuration.
    pub fn get_error_config(&self) -> &ErrorConfig {
        &self.error_config
    }

    /// Bind the router to a context for direct server-side calls.
    pub fn create_caller(&self, ctx: impl Into<Context<Ctx>>) -> Caller<'_, Ctx> {
        Caller::new(self, ctx.into())
    }

    /// Shape an error for a client.
    ///
    /// The error is prepared with the router's [`ErrorConfig`], serialized to
    /// the default `{code, message, details?, cause?}` shape and finally passed
    /// through the error formatter, if any.
    pub fn shape_error(&self, context: ErrorContext<'_, Ctx>) -> Value {
        let prepared = context.error.clone().apply_config(&self.error_config);
        let shape = serde_json::to_value(&prepared).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to serialize error shape");
            json!({ "code": prepared.code.as_str(), "message": prepared.message })
        });

        match &self.error_formatter {
            Some(formatter) => formatter(
                &ErrorContext {
                    error: &prepared,
                    procedure_type: context.procedure_type,
                    path: context.path,
                    input: context.input,
                    ctx: context.ctx,
                },
                shape,
            ),
            None => shape,
        }
    }
}

impl<Ctx: Send + Sync + 'static> Default for Router<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Ctx> fmt::Debug for Router<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<String> = self
            .procedures
            .iter()
            .flat_map(|(procedure_type, table)| {
                table.keys().map(move |path| format!("{procedure_type} {path}"))
            })
            .collect();
        paths.sort();
        f.debug_struct("Router")
            .field("procedures", &paths)
            .field("middlewares", &self.middlewares.len())
            .field("error_config", &self.error_config)
            .finish()
    }
}
