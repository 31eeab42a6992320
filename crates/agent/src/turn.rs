//! Accumulation of one streamed model completion into a turn.

use skein_core::event::{AgentEvent, EventEmitter};
use skein_core::message::MessageToolCall;
use skein_core::provider::{CompletionDelta, Usage};
use skein_core::tool::ToolCall;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Default)]
struct CallFragment {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Text and tool calls gathered from one completion.
#[derive(Debug, Default)]
pub struct Turn {
    pub text: String,
    pub usage: Option<Usage>,
    fragments: BTreeMap<u32, CallFragment>,
}

impl Turn {
    /// Fold one delta in, emitting live events for text and reasoning.
    /// Returns `true` once the stream reports it is done.
    pub fn apply(&mut self, delta: CompletionDelta, events: &EventEmitter) -> bool {
        match delta {
            CompletionDelta::Text { content } => {
                self.text.push_str(&content);
                events.emit(AgentEvent::TextDelta { content });
            }
            CompletionDelta::Thinking { content } => {
                events.emit(AgentEvent::Thinking { content });
            }
            CompletionDelta::ToolCall {
                index,
                id,
                name,
                arguments,
            } => {
                let fragment = self.fragments.entry(index).or_default();
                if id.is_some() {
                    fragment.id = id;
                }
                if name.is_some() {
                    fragment.name = name;
                }
                fragment.arguments.push_str(&arguments);
            }
            CompletionDelta::Done { usage } => {
                self.usage = usage;
                return true;
            }
        }
        false
    }

    /// Every named call the model requested, in stream order.
    ///
    /// Arguments that do not parse as JSON become `null`, which leaves the
    /// call incomplete.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.fragments
            .iter()
            .filter_map(|(index, fragment)| {
                let name = fragment.name.clone()?;
                let arguments = if fragment.arguments.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&fragment.arguments).unwrap_or_else(|e| {
                        debug!(tool = %name, error = %e, "Tool call arguments are not valid JSON yet");
                        serde_json::Value::Null
                    })
                };
                let id = fragment
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("call_{index}_{}", uuid::Uuid::new_v4().simple()));
                Some(ToolCall {
                    id,
                    name,
                    arguments,
                })
            })
            .collect()
    }

    /// The calls whose required arguments are all present. The rest are
    /// treated as unfinished fragments and dropped for this turn.
    pub fn complete_calls(&self) -> Vec<ToolCall> {
        self.tool_calls()
            .into_iter()
            .filter(|call| match call.missing_argument() {
                Some(argument) => {
                    debug!(call_id = %call.id, tool = %call.name, argument, "Dropping incomplete tool call");
                    false
                }
                None => !call.arguments.is_null(),
            })
            .collect()
    }
}

/// Convert executed calls into the assistant message's call list.
pub fn message_calls(calls: &[ToolCall]) -> Vec<MessageToolCall> {
    calls
        .iter()
        .map(|call| MessageToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        })
        .collect()
}
