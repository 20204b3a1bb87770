//! Worker-side method dispatch table.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::RpcError;

/// A boxed async handler: takes JSON params, returns a JSON result or an
/// [`RpcError::Handler`] describing what went wrong.
pub type HandlerFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Maps method names to handlers, mirroring the worker-side registration
/// described for the RPC surface: `initializeSchema`, `createCollection`,
/// `search`, `enqueueEmbedding`, and so on are all registered here by
/// [`crate::Engine`] at construction time.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl MethodRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under `method`. Re-registering the same name
    /// replaces the previous handler.
    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    /// Returns the number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` if no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatches `method` with `params`, or `RpcError::UnknownMethod` if
    /// nothing is registered under that name.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let handler = self
            .handlers
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::UnknownMethod(method.to_string()))?;
        handler(params).await
    }
}

/// Builds a [`HandlerFn`] from an async closure over `(Value) -> Result<Value, RpcError>`.
///
/// A thin convenience so call sites in `engine.rs` can write
/// `handler(|params| async move { ... })` instead of hand-boxing futures.
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = MethodRegistry::new();
        let err = registry
            .dispatch("nope", Value::Null)
            .await
            .expect_err("unregistered method must fail");
        assert!(matches!(err, RpcError::UnknownMethod(m) if m == "nope"));
    }

    #[tokio::test]
    async fn test_dispatch_registered_method() {
        let mut registry = MethodRegistry::new();
        registry.register(
            "echo",
            handler(|params| async move { Ok(params) }),
        );
        let result = registry
            .dispatch("echo", Value::String("hi".into()))
            .await
            .unwrap();
        assert_eq!(result, Value::String("hi".into()));
    }

    #[tokio::test]
    async fn test_dispatch_handler_error_propagates() {
        let mut registry = MethodRegistry::new();
        registry.register(
            "fail",
            handler(|_params| async move {
                Err(RpcError::Handler {
                    code: "BOOM".into(),
                    message: "kaboom".into(),
                })
            }),
        );
        let err = registry.dispatch("fail", Value::Null).await.unwrap_err();
        assert!(matches!(err, RpcError::Handler { code, .. } if code == "BOOM"));
    }
}
