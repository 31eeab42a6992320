//! Shared test helpers: a provider that replays scripted streamed turns.

use async_trait::async_trait;
use skein_core::error::ProviderError;
use skein_core::provider::{
    CompletionDelta, CompletionProvider, CompletionRequest, CompletionStream, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// One scripted completion.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Stream these deltas, then `Done`
    Deltas(Vec<CompletionDelta>),
    /// Fail before streaming anything
    Fail(ProviderError),
}

impl ScriptedTurn {
    pub fn text(text: &str) -> Self {
        Self::Deltas(vec![CompletionDelta::Text {
            content: text.to_string(),
        }])
    }

    /// Optional text followed by complete tool calls, one delta each.
    pub fn tool_calls(text: &str, calls: &[(&str, &str, serde_json::Value)]) -> Self {
        let mut deltas = Vec::new();
        if !text.is_empty() {
            deltas.push(CompletionDelta::Text {
                content: text.to_string(),
            });
        }
        for (index, (id, name, args)) in calls.iter().enumerate() {
            deltas.push(CompletionDelta::ToolCall {
                index: index as u32,
                id: Some(id.to_string()),
                name: Some(name.to_string()),
                arguments: args.to_string(),
            });
        }
        Self::Deltas(deltas)
    }
}

/// A provider that returns scripted turns in order.
///
/// Runs out with a `StreamInterrupted` error rather than panicking so that a
/// test expecting fewer calls fails on its assertion, not here.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let turn = self.turns.lock().unwrap().pop_front();

        let deltas = match turn {
            Some(ScriptedTurn::Deltas(deltas)) => deltas,
            Some(ScriptedTurn::Fail(err)) => return Err(err),
            None => {
                return Err(ProviderError::StreamInterrupted(
                    "no more scripted turns".into(),
                ));
            }
        };

        let (tx, rx) = mpsc::channel(deltas.len() + 1);
        for delta in deltas {
            let _ = tx.send(Ok(delta)).await;
        }
        let _ = tx
            .send(Ok(CompletionDelta::Done {
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            }))
            .await;
        Ok(rx)
    }
}
