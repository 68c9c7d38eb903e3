//! Transport handler: bridges a [`MessageChannel`] to a [`Router`].

use super::channel::{Inbound, MessageChannel, Payload, incoming};
use super::envelope::{
    RequestEnvelope, RequestId, RequestParams, ResponseEnvelope, ResponseResult,
    parse_request,
};
use crate::config::{ConfigValidationError, TransportConfig};
use crate::router::{CallOutput, CallProcedureOptions, ErrorContext, Router, call_procedure};
use crate::subscription::Subscription;
use crate::{Context, ProcedureType, RpcError, RpcResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use futures::future::{BoxFuture, join_all};
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Builds the request context for each inbound message from its sender.
pub type ContextFactory<Ctx, D> = Arc<dyn Fn(&D) -> BoxFuture<'static, RpcResult<Ctx>> + Send + Sync>;

/// Telemetry callback invoked for every error sent to a client.
pub type ErrorHandler = Arc<dyn Fn(&TransportErrorEvent<'_>) + Send + Sync>;

/// An error about to be reported to a client.
#[derive(Debug)]
pub struct TransportErrorEvent<'a> {
    /// The error as raised (before shaping)
    pub error: &'a RpcError,
    /// Request id, when known
    pub id: Option<&'a RequestId>,
    /// Procedure type, when known
    pub procedure_type: Option<ProcedureType>,
    /// Procedure path, when known
    pub path: Option<&'a str>,
}

/// What is known about the request an error belongs to.
struct Scope<'a, Ctx> {
    procedure_type: Option<ProcedureType>,
    path: Option<&'a str>,
    input: Option<&'a Value>,
    ctx: Option<&'a Context<Ctx>>,
}

impl<Ctx> Scope<'_, Ctx> {
    fn none() -> Self {
        Self {
            procedure_type: None,
            path: None,
            input: None,
            ctx: None,
        }
    }
}

/// Per-request data shared by a subscription's listeners.
struct SubscriptionScope<Ctx, D> {
    id: RequestId,
    jsonrpc: Option<String>,
    reply_to: D,
    path: String,
    input: Value,
    ctx: Context<Ctx>,
}

struct Inner<Ctx, C: MessageChannel> {
    router: Arc<Router<Ctx>>,
    channel: Arc<C>,
    create_context: ContextFactory<Ctx, C::Destination>,
    on_error: Option<ErrorHandler>,
    subscriptions: DashMap<RequestId, Subscription>,
    config: TransportConfig,
}

/// Serves a router over a message channel.
///
/// Requests are single envelopes or arrays of envelopes (batches). Queries and
/// mutations are answered with one `data` or `error` response; subscriptions
/// answer `started`, then one `data` per value, then `stopped` (or a final
/// `error`).
///
/// # Example
/// ```rust,ignore
/// let (server_end, client_end) = LocalChannel::pair("server", "client");
/// let handler = TransportHandler::builder(router, server_end, |_peer: &LocalPeer| async {
///     Ok(AppContext::default())
/// })
/// .on_error(|event| tracing::error!(error = %event.error, "rpc failure"))
/// .build()?;
///
/// tokio::spawn(async move { handler.serve().await });
/// ```
pub struct TransportHandler<Ctx, C: MessageChannel> {
    inner: Arc<Inner<Ctx, C>>,
}

impl<Ctx, C: MessageChannel> Clone for TransportHandler<Ctx, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`TransportHandler`].
pub struct TransportHandlerBuilder<Ctx, C: MessageChannel> {
    router: Arc<Router<Ctx>>,
    channel: Arc<C>,
    create_context: ContextFactory<Ctx, C::Destination>,
    on_error: Option<ErrorHandler>,
    config: TransportConfig,
}

impl<Ctx, C> TransportHandlerBuilder<Ctx, C>
where
    Ctx: Send + Sync + 'static,
    C: MessageChannel,
{
    /// Set a telemetry callback for reported errors.
    #[must_use = "This method returns a new TransportHandlerBuilder and does not modify self"]
    pub fn on_error(mut self, f: impl Fn(&TransportErrorEvent<'_>) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the transport configuration.
    #[must_use = "This method returns a new TransportHandlerBuilder and does not modify self"]
    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the configuration and create the handler.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigValidationError`] found in the configuration.
    pub fn build(self) -> Result<TransportHandler<Ctx, C>, ConfigValidationError> {
        self.config.validate()?;
        debug!(
            procedures = self.router.len(),
            envelope_key = ?self.config.envelope_key,
            max_message_size = self.config.max_message_size,
            max_batch_size = self.config.batch.max_batch_size,
            "Transport handler created"
        );
        Ok(TransportHandler {
            inner: Arc::new(Inner {
                router: self.router,
                channel: self.channel,
                create_context: self.create_context,
                on_error: self.on_error,
                subscriptions: DashMap::new(),
                config: self.config,
            }),
        })
    }
}

impl<Ctx, C> TransportHandler<Ctx, C>
where
    Ctx: Send + Sync + 'static,
    C: MessageChannel,
{
    /// Start building a handler.
    ///
    /// `create_context` runs once per inbound message with the sender's
    /// destination; a failure is reported on every request of that message.
    pub fn builder<F, Fut>(
        router: impl Into<Arc<Router<Ctx>>>,
        channel: C,
        create_context: F,
    ) -> TransportHandlerBuilder<Ctx, C>
    where
        F: Fn(&C::Destination) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Ctx>> + Send + 'static,
    {
        let create_context: ContextFactory<Ctx, C::Destination> =
            Arc::new(move |destination: &C::Destination| -> BoxFuture<'static, RpcResult<Ctx>> {
                Box::pin(create_context(destination))
            });
        TransportHandlerBuilder {
            router: router.into(),
            channel: Arc::new(channel),
            create_context,
            on_error: None,
            config: TransportConfig::default(),
        }
    }

    /// Create a handler with the default configuration.
    ///
    /// # Errors
    ///
    /// Never fails for the default configuration; the signature matches
    /// [`TransportHandlerBuilder::build`].
    pub fn new<F, Fut>(
        router: impl Into<Arc<Router<Ctx>>>,
        channel: C,
        create_context: F,
    ) -> Result<Self, ConfigValidationError>
    where
        F: Fn(&C::Destination) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RpcResult<Ctx>> + Send + 'static,
    {
        Self::builder(router, channel, create_context).build()
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// The router being served.
    pub fn router(&self) -> &Arc<Router<Ctx>> {
        &self.inner.router
    }

    /// Handle inbound messages until the channel closes, then [`close`](Self::close).
    ///
    /// Each message runs on its own task so slow requests don't hold up
    /// others; in-flight messages are awaited before closing.
    pub async fn serve(&self) {
        info!("Transport handler serving");
        let mut messages = incoming(Arc::clone(&self.inner.channel));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                message = messages.next() => match message {
                    Some(inbound) => {
                        let handler = self.clone();
                        tasks.spawn(async move { handler.handle_message(inbound).await });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => report_join(joined),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            report_join(joined);
        }

        info!("Channel closed; shutting transport handler down");
        self.close();
    }

    /// Destroy every live subscription and forget them.
    pub fn close(&self) {
        let live: Vec<Subscription> = self
            .inner
            .subscriptions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.subscriptions.clear();
        debug!(count = live.len(), "Closing live subscriptions");
        for subscription in live {
            subscription.destroy();
        }
    }

    /// Handle one inbound message (a single envelope or a batch).
    ///
    /// Resolves once every request in the message has been answered (for
    /// subscriptions: once they have started).
    pub async fn handle_message(&self, inbound: Inbound<C::Destination>) {
        self.inner.handle_message(inbound).await;
    }
}

impl<Ctx, C: MessageChannel> fmt::Debug for TransportHandler<Ctx, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandler")
            .field("router", &self.inner.router)
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("config", &self.inner.config)
            .finish()
    }
}

fn report_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Message handler task panicked");
        }
    }
}

// =============================================================================
// Message handling
// =============================================================================

impl<Ctx, C> Inner<Ctx, C>
where
    Ctx: Send + Sync + 'static,
    C: MessageChannel,
{
    async fn handle_message(self: &Arc<Self>, inbound: Inbound<C::Destination>) {
        let Inbound { payload, reply_to } = inbound;

        let value = match payload {
            Payload::Json(value) => value,
            Payload::Text(text) => {
                if text.len() > self.config.max_message_size {
                    warn!(
                        size = text.len(),
                        max = self.config.max_message_size,
                        "Inbound message too large"
                    );
                    let error = RpcError::payload_too_large(format!(
                        "Message size {} exceeds maximum of {} bytes",
                        text.len(),
                        self.config.max_message_size
                    ));
                    self.respond_error(&reply_to, None, None, &error, Scope::none());
                    return;
                }
                match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        debug!(error = %e, "Inbound message is not valid JSON");
                        let error = RpcError::parse_error(format!("Invalid JSON: {e}"))
                            .with_cause(e.to_string());
                        self.respond_error(&reply_to, None, None, &error, Scope::none());
                        return;
                    }
                }
            }
        };

        let value = match &self.config.envelope_key {
            None => value,
            Some(key) => match value {
                Value::Object(mut map) => match map.remove(key) {
                    Some(wrapped) => wrapped,
                    None => {
                        trace!(envelope_key = %key, "Ignoring message without envelope key");
                        return;
                    }
                },
                _ => {
                    trace!(envelope_key = %key, "Ignoring non-object message");
                    return;
                }
            },
        };

        let members = match value {
            Value::Array(items) => items,
            single => vec![single],
        };

        let max_batch_size = self.config.batch.max_batch_size;
        if members.len() > max_batch_size {
            warn!(size = members.len(), max = max_batch_size, "Batch too large");
            let error = RpcError::bad_request(format!(
                "Batch size {} exceeds maximum of {max_batch_size}",
                members.len()
            ));
            self.respond_error(&reply_to, None, None, &error, Scope::none());
            return;
        }

        let transformer = Arc::clone(self.router.data_transformer());
        let mut requests = Vec::with_capacity(members.len());
        for member in members {
            match parse_request(member, transformer.as_ref()) {
                Ok(request) => requests.push(request),
                Err(error) => {
                    debug!(error = %error, "Rejecting malformed message");
                    self.respond_error(&reply_to, None, None, &error, Scope::none());
                    return;
                }
            }
        }
        if requests.is_empty() {
            return;
        }

        let ctx = (self.create_context)(&reply_to).await.map(Context::new);
        if let Err(e) = &ctx {
            debug!(error = %e, "Context factory failed");
        }

        trace!(requests = requests.len(), "Dispatching message");
        if self.config.batch.parallel_execution {
            join_all(
                requests
                    .into_iter()
                    .map(|request| self.handle_request(request, &ctx, &reply_to)),
            )
            .await;
        } else {
            for request in requests {
                self.handle_request(request, &ctx, &reply_to).await;
            }
        }
    }

    async fn handle_request(
        self: &Arc<Self>,
        request: RequestEnvelope,
        ctx: &RpcResult<Context<Ctx>>,
        reply_to: &C::Destination,
    ) {
        let RequestEnvelope {
            id,
            jsonrpc,
            method,
            params,
        } = request;

        let Some(procedure_type) = method.procedure_type() else {
            self.stop_subscription(id.as_ref());
            return;
        };

        let RequestParams { path, input } = params.unwrap_or_default();
        let scope_without_ctx = || Scope {
            procedure_type: Some(procedure_type),
            path: Some(path.as_str()),
            input: Some(&input),
            ctx: None,
        };

        let Some(id) = id else {
            let error = RpcError::bad_request("`id` is required");
            self.respond_error(reply_to, None, jsonrpc, &error, scope_without_ctx());
            return;
        };

        let ctx = match ctx {
            Ok(ctx) => ctx.clone(),
            Err(error) => {
                self.respond_error(reply_to, Some(id), jsonrpc, error, scope_without_ctx());
                return;
            }
        };

        trace!(request_id = %id, path = %path, procedure_type = %procedure_type, "Handling request");

        let result = call_procedure(CallProcedureOptions {
            router: &self.router,
            procedure_type,
            path: &path,
            input: input.clone(),
            ctx: ctx.clone(),
        })
        .await;

        match result {
            Ok(CallOutput::Data(data)) => {
                let data = self.router.data_transformer().serialize(data);
                self.respond(
                    reply_to,
                    ResponseEnvelope::result(Some(id), jsonrpc, ResponseResult::Data { data }),
                );
            }
            Ok(CallOutput::Subscription(subscription)) => {
                let scope = SubscriptionScope {
                    id,
                    jsonrpc,
                    reply_to: reply_to.clone(),
                    path,
                    input,
                    ctx,
                };
                self.start_subscription(subscription, scope);
            }
            Err(error) => {
                let scope = Scope {
                    procedure_type: Some(procedure_type),
                    path: Some(path.as_str()),
                    input: Some(&input),
                    ctx: Some(&ctx),
                };
                self.respond_error(reply_to, Some(id), jsonrpc, &error, scope);
            }
        }
    }

    fn stop_subscription(&self, id: Option<&RequestId>) {
        let Some(id) = id else {
            trace!("Ignoring subscription.stop without id");
            return;
        };
        match self.subscriptions.remove(id) {
            Some((_, subscription)) => {
                debug!(request_id = %id, "Stopping subscription");
                subscription.destroy();
            }
            None => trace!(request_id = %id, "No subscription to stop"),
        }
    }

    fn start_subscription(
        self: &Arc<Self>,
        subscription: Subscription,
        scope: SubscriptionScope<Ctx, C::Destination>,
    ) {
        let registered = match self.subscriptions.entry(scope.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(subscription.clone());
                true
            }
        };

        if !registered {
            debug!(request_id = %scope.id, "Rejecting duplicate subscription id");
            subscription.destroy();
            let error = RpcError::bad_request(format!("Duplicate id {}", scope.id));
            self.respond_error(
                &scope.reply_to,
                Some(scope.id.clone()),
                scope.jsonrpc.clone(),
                &error,
                Scope {
                    procedure_type: Some(ProcedureType::Subscription),
                    path: Some(scope.path.as_str()),
                    input: Some(&scope.input),
                    ctx: Some(&scope.ctx),
                },
            );
            return;
        }

        let scope = Arc::new(scope);
        self.attach_listeners(&subscription, &scope);

        debug!(request_id = %scope.id, path = %scope.path, "Subscription started");
        self.respond(
            &scope.reply_to,
            ResponseEnvelope::result(
                Some(scope.id.clone()),
                scope.jsonrpc.clone(),
                ResponseResult::Started,
            ),
        );

        if let Err(e) = subscription.start() {
            debug!(request_id = %scope.id, error = %e, "Subscription ended before it started");
        }
    }

    fn attach_listeners(
        self: &Arc<Self>,
        subscription: &Subscription,
        scope: &Arc<SubscriptionScope<Ctx, C::Destination>>,
    ) {
        let weak: Weak<Self> = Arc::downgrade(self);

        let (on_data, data_scope) = (weak.clone(), Arc::clone(scope));
        let (on_error, error_scope) = (weak.clone(), Arc::clone(scope));
        let (on_destroy, destroy_scope) = (weak, Arc::clone(scope));
        let handle = subscription.clone();
        let error_handle = subscription.clone();

        subscription
            .on_data(move |data| {
                let Some(inner) = on_data.upgrade() else { return };
                let data = inner.router.data_transformer().serialize(data);
                inner.respond(
                    &data_scope.reply_to,
                    ResponseEnvelope::result(
                        Some(data_scope.id.clone()),
                        data_scope.jsonrpc.clone(),
                        ResponseResult::Data { data },
                    ),
                );
            })
            .on_error(move |error| {
                let Some(inner) = on_error.upgrade() else { return };
                inner.untrack(&error_scope.id, &error_handle);
                inner.respond_error(
                    &error_scope.reply_to,
                    Some(error_scope.id.clone()),
                    error_scope.jsonrpc.clone(),
                    &error,
                    Scope {
                        procedure_type: Some(ProcedureType::Subscription),
                        path: Some(error_scope.path.as_str()),
                        input: Some(&error_scope.input),
                        ctx: Some(&error_scope.ctx),
                    },
                );
            })
            .on_destroy(move || {
                let Some(inner) = on_destroy.upgrade() else { return };
                inner.untrack(&destroy_scope.id, &handle);
                debug!(request_id = %destroy_scope.id, "Subscription stopped");
                inner.respond(
                    &destroy_scope.reply_to,
                    ResponseEnvelope::result(
                        Some(destroy_scope.id.clone()),
                        destroy_scope.jsonrpc.clone(),
                        ResponseResult::Stopped,
                    ),
                );
            });
    }

    /// Forget `subscription` if it is still the one tracked under `id`.
    fn untrack(&self, id: &RequestId, subscription: &Subscription) {
        self.subscriptions
            .remove_if(id, |_, tracked| tracked.ptr_eq(subscription));
    }

    // -------------------------------------------------------------------------
    // Responses
    // -------------------------------------------------------------------------

    fn respond_error(
        &self,
        reply_to: &C::Destination,
        id: Option<RequestId>,
        jsonrpc: Option<String>,
        error: &RpcError,
        scope: Scope<'_, Ctx>,
    ) {
        if let Some(on_error) = &self.on_error {
            on_error(&TransportErrorEvent {
                error,
                id: id.as_ref(),
                procedure_type: scope.procedure_type,
                path: scope.path,
            });
        }

        let shape = self.router.shape_error(ErrorContext {
            error,
            procedure_type: scope.procedure_type,
            path: scope.path,
            input: scope.input,
            ctx: scope.ctx,
        });
        self.respond(reply_to, ResponseEnvelope::error(id, jsonrpc, shape));
    }

    fn respond(&self, reply_to: &C::Destination, envelope: ResponseEnvelope) {
        let message = match serde_json::to_value(&envelope) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "Failed to serialize response envelope");
                return;
            }
        };
        let message = match &self.config.envelope_key {
            Some(key) => json!({ key.as_str(): message }),
            None => message,
        };
        if let Err(e) = self.channel.send(message, reply_to) {
            warn!(destination = ?reply_to, error = %e, "Failed to send response");
        }
    }
}
