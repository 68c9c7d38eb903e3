//! Serving a router over a duplex message channel
//!
//! Messages are JSON-RPC style envelopes:
//!
//! ```json
//! { "id": 1, "jsonrpc": "2.0", "method": "query", "params": { "path": "hello", "input": "client" } }
//! ```
//!
//! Responses carry the same `id` plus either a `result` (`started`, `data`
//! or `stopped`) or an `error` shaped by the router. A message may also be
//! an array of envelopes, handled as one batch with a shared context.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_rpc::transport::{LocalChannel, LocalPeer, TransportHandler};
//!
//! let (server_end, client_end) = LocalChannel::pair("server", "client");
//! let handler = TransportHandler::new(router, server_end, |_peer: &LocalPeer| async {
//!     Ok(AppContext::default())
//! })?;
//! tokio::spawn(async move { handler.serve().await });
//!
//! client_end.post(serde_json::json!({
//!     "id": 1,
//!     "method": "query",
//!     "params": { "path": "hello", "input": "client" }
//! }))?;
//! ```

mod channel;
mod envelope;
mod handler;

pub use channel::{ChannelError, Inbound, LocalChannel, LocalPeer, MessageChannel, Payload, incoming};
pub use envelope::{
    JSONRPC_VERSION, Method, RequestEnvelope, RequestId, RequestParams, ResponseBody,
    ResponseEnvelope, ResponseResult, parse_request,
};
pub use handler::{
    ContextFactory, ErrorHandler, TransportErrorEvent, TransportHandler, TransportHandlerBuilder,
};
