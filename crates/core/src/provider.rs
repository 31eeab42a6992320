//! Completion provider trait: the abstraction over LLM backends.
//!
//! A provider streams a model completion back as a sequence of deltas:
//! text fragments, optional reasoning fragments, and tool-call fragments
//! that arrive piecewise and are assembled by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// A streaming completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use (e.g., "anthropic/claude-sonnet-4", "gpt-4o")
    pub model: String,

    /// System prompt, including any injected memory context
    pub system_prompt: String,

    /// The running conversation history
    pub history: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool schema sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Token usage information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One incremental piece of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionDelta {
    /// A fragment of the assistant's visible text.
    Text { content: String },

    /// A fragment of model reasoning, surfaced as a `thinking` event.
    Thinking { content: String },

    /// A fragment of a tool call. Fragments with the same `index` belong
    /// to the same call; `id` and `name` usually arrive on the first one
    /// and `arguments` is a piece of a JSON string to be concatenated.
    ToolCall {
        index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        arguments: String,
    },

    /// End of stream, with usage if the provider reports it.
    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Receiving half of a completion stream.
pub type CompletionStream = mpsc::Receiver<Result<CompletionDelta, ProviderError>>;

/// The core CompletionProvider trait.
///
/// Every LLM backend implements this trait. The orchestration loop only ever
/// consumes the stream; it never knows which backend produced it.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "anthropic").
    fn name(&self) -> &str;

    /// Start a streaming completion.
    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;

    /// Drain a completion and return only its text.
    ///
    /// Used for auxiliary calls (query rewriting) that never request tools.
    async fn complete_text(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let mut rx = self.stream_completion(request).await?;
        let mut text = String::new();
        while let Some(delta) = rx.recv().await {
            match delta? {
                CompletionDelta::Text { content } => text.push_str(&content),
                CompletionDelta::Done { .. } => break,
                CompletionDelta::Thinking { .. } | CompletionDelta::ToolCall { .. } => {}
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedProvider;

    #[async_trait]
    impl CompletionProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn stream_completion(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionStream, ProviderError> {
            let (tx, rx) = mpsc::channel(8);
            for delta in [
                CompletionDelta::Thinking { content: "hmm".into() },
                CompletionDelta::Text { content: "Hello, ".into() },
                CompletionDelta::Text { content: "world".into() },
                CompletionDelta::Done { usage: None },
            ] {
                let _ = tx.send(Ok(delta)).await;
            }
            Ok(rx)
        }
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "mock-model".into(),
            system_prompt: String::new(),
            history: vec![],
            tools: vec![],
            temperature: default_temperature(),
        }
    }

    #[tokio::test]
    async fn complete_text_concatenates_text_deltas() {
        let text = CannedProvider.complete_text(request()).await.unwrap();
        assert_eq!(text, "Hello, world");
    }

    #[test]
    fn tool_call_delta_serialization() {
        let delta = CompletionDelta::ToolCall {
            index: 0,
            id: Some("call_1".into()),
            name: Some("memory_search".into()),
            arguments: "{\"query\":".into(),
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert!(json.contains(r#""kind":"tool_call""#));
        assert!(json.contains("memory_search"));
    }
}
