//! Closure-backed tool backends for external connectors.
//!
//! Social search and app integrations are owned by other services; the
//! runtime only needs an async function to call. `FnToolBackend` adapts any
//! such function into a [`ToolBackend`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use skein_core::error::ToolError;
use skein_core::identity::CallerIdentity;
use skein_core::tool::ToolBackend;

type Handler = dyn Fn(serde_json::Value, CallerIdentity) -> BoxFuture<'static, Result<serde_json::Value, ToolError>>
    + Send
    + Sync;

/// A [`ToolBackend`] that forwards to an async closure.
pub struct FnToolBackend {
    name: String,
    handler: Box<Handler>,
}

impl FnToolBackend {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value, CallerIdentity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(move |args, caller| Box::pin(handler(args, caller))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for FnToolBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnToolBackend").field("name", &self.name).finish()
    }
}

#[async_trait]
impl ToolBackend for FnToolBackend {
    async fn invoke(
        &self,
        arguments: &serde_json::Value,
        caller: &CallerIdentity,
    ) -> Result<serde_json::Value, ToolError> {
        (self.handler)(arguments.clone(), caller.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn forwards_arguments_and_caller() {
        let backend = FnToolBackend::new("social", |args, caller: CallerIdentity| async move {
            Ok(json!({
                "query": args["query"],
                "user": caller.user_id,
            }))
        });

        let out = backend
            .invoke(&json!({"query": "launch"}), &CallerIdentity::new("u7"))
            .await
            .unwrap();
        assert_eq!(out, json!({"query": "launch", "user": "u7"}));
        assert_eq!(backend.name(), "social");
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let backend = FnToolBackend::new("apps", move |_args, _caller| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ToolError::ExecutionFailed {
                    tool_name: "app_integration".into(),
                    reason: "503 from upstream".into(),
                })
            }
        });

        let err = backend
            .invoke(&json!({}), &CallerIdentity::new("u1"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
