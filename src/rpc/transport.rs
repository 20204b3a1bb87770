//! Host-side client and worker-side transport loop.
//!
//! [`RpcTransport::spawn`] starts the worker-side dispatch loop on a tokio
//! task and returns the host-side [`RpcClient`] handle. This mirrors the
//! real worker-message-port boundary closely enough that swapping this
//! in-process channel pair for an actual `postMessage` bridge would not
//! change a single call site in `engine.rs`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, instrument, warn};

use crate::error::RpcError;
use crate::rpc::{Envelope, MethodRegistry};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, RpcError>>>>>;

/// A log line emitted by the worker side, distinct from a call response and
/// never matched to a pending call.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Severity, as a `tracing`-style level name (`"info"`, `"warn"`, ...).
    pub level: &'static str,
    /// Human-readable message.
    pub message: String,
}

/// Worker-side half of the transport: owns the method registry and the
/// inbound call queue.
pub struct RpcTransport {
    inbound_rx: mpsc::UnboundedReceiver<Envelope>,
    pending: PendingMap,
    registry: Arc<MethodRegistry>,
    semaphore: Arc<Semaphore>,
    call_timeout: Duration,
    closed: Arc<AtomicBool>,
    log_tx: mpsc::UnboundedSender<LogMessage>,
}

impl RpcTransport {
    /// Spawns the worker-side dispatch loop and returns the paired
    /// host-side [`RpcClient`].
    ///
    /// `max_concurrent_calls` caps in-flight calls; calls over the cap fail
    /// fast with [`RpcError::RateLimit`] instead of queuing. `call_timeout`
    /// bounds each call; expiry yields [`RpcError::Timeout`].
    pub fn spawn(
        registry: MethodRegistry,
        max_concurrent_calls: usize,
        call_timeout: Duration,
    ) -> (RpcClient, mpsc::UnboundedReceiver<LogMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(Semaphore::new(max_concurrent_calls));

        let transport = RpcTransport {
            inbound_rx,
            pending: pending.clone(),
            registry: Arc::new(registry),
            semaphore: semaphore.clone(),
            call_timeout,
            closed: closed.clone(),
            log_tx,
        };
        tokio::spawn(transport.run());

        let client = RpcClient {
            inbound_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(0)),
            closed,
            call_timeout,
        };
        (client, log_rx)
    }

    #[instrument(skip(self), name = "rpc_transport")]
    async fn run(mut self) {
        while let Some(envelope) = self.inbound_rx.recv().await {
            let Envelope { id, method, params } = envelope;
            let Some(tx) = self.pending.lock().expect("pending map poisoned").remove(&id) else {
                // Caller already timed out and dropped its oneshot receiver.
                continue;
            };

            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    let _ = tx.send(Err(RpcError::RateLimit));
                    continue;
                }
            };

            let registry = self.registry.clone();
            let deadline = self.call_timeout;
            let log_tx = self.log_tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = tokio::time::timeout(deadline, registry.dispatch(&method, params)).await;
                let result = match outcome {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(method = %method, "rpc call timed out");
                        Err(RpcError::Timeout {
                            method: method.clone(),
                            elapsed_ms: deadline.as_millis() as u64,
                        })
                    }
                };
                let _ = log_tx.send(LogMessage {
                    level: "debug",
                    message: format!("rpc call '{method}' completed"),
                });
                let _ = tx.send(result);
            });
        }

        debug!("rpc transport inbound channel closed, draining pending calls");
        self.closed.store(true, Ordering::SeqCst);
        let mut pending = self.pending.lock().expect("pending map poisoned");
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError::Terminated));
        }
    }
}

/// Host-side handle: the only type application code calls through.
#[derive(Clone)]
pub struct RpcClient {
    inbound_tx: mpsc::UnboundedSender<Envelope>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
}

impl RpcClient {
    /// Calls `method` with `params`, waiting up to the configured timeout.
    ///
    /// Correlation is by request id alone; responses may resolve in any
    /// order relative to how calls were issued.
    pub async fn call(&self, method: impl Into<String>, params: Value) -> Result<Value, RpcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RpcError::Terminated);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(id, tx);

        let envelope = Envelope {
            id,
            method: method.into(),
            params,
        };
        if self.inbound_tx.send(envelope).is_err() {
            self.pending.lock().expect("pending map poisoned").remove(&id);
            return Err(RpcError::SendError("worker transport closed".into()));
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Terminated),
            Err(_) => {
                self.pending.lock().expect("pending map poisoned").remove(&id);
                Err(RpcError::Timeout {
                    method: "unknown".into(),
                    elapsed_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Returns `true` once the transport has been shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::methods::handler;

    fn registry_with_echo() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register("echo", handler(|params| async move { Ok(params) }));
        registry
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (client, _logs) =
            RpcTransport::spawn(registry_with_echo(), 10, Duration::from_secs(1));
        let result = client
            .call("echo", Value::String("hello".into()))
            .await
            .unwrap();
        assert_eq!(result, Value::String("hello".into()));
    }

    #[tokio::test]
    async fn test_unknown_method_propagates() {
        let (client, _logs) =
            RpcTransport::spawn(MethodRegistry::new(), 10, Duration::from_secs(1));
        let err = client.call("missing", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::UnknownMethod(m) if m == "missing"));
    }

    #[tokio::test]
    async fn test_concurrency_cap_rate_limits() {
        let mut registry = MethodRegistry::new();
        registry.register(
            "slow",
            handler(|_params| async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Value::Null)
            }),
        );
        let (client, _logs) = RpcTransport::spawn(registry, 1, Duration::from_secs(5));

        let client2 = client.clone();
        let first = tokio::spawn(async move { client2.call("slow", Value::Null).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = client.call("slow", Value::Null).await;

        assert!(matches!(second, Err(RpcError::RateLimit)));
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_not_closed_before_shutdown() {
        let (client, _logs) =
            RpcTransport::spawn(registry_with_echo(), 10, Duration::from_secs(5));
        assert!(!client.is_closed());
        client.call("echo", Value::Bool(true)).await.unwrap();
    }
}
