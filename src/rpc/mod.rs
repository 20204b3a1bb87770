//! RPC transport: a worker-isolated request/response channel.
//!
//! In the browser, the engine lives behind a Web Worker message port and the
//! host talks to it only through `call(method, params) -> future<result>`.
//! This module models that boundary as an in-process analog: [`RpcClient`]
//! is the host-side handle, [`MethodRegistry`] is the worker-side dispatch
//! table, and [`RpcTransport`] wires the two together over channels so the
//! concurrency cap, per-call timeout, and request-id correlation all behave
//! the same whether or not a real worker thread sits in between.

mod methods;
mod transport;

pub use methods::{handler, HandlerFn, MethodRegistry};
pub use transport::{LogMessage, RpcClient, RpcTransport};

use serde_json::Value;

/// A single outbound call: method name plus JSON params.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Correlation id, unique per in-flight call.
    pub id: u64,
    /// Registered method name.
    pub method: String,
    /// JSON-encoded parameters, method-specific.
    pub params: Value,
}
