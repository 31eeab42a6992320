//! Progress events surfaced to the caller while a run executes.
//!
//! Producers only ever append; the caller receives events in emission order
//! through an [`EventStream`]. Rendering happens at one consumer boundary,
//! [`AgentEvent::describe`], which matches every variant exhaustively.

use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Aggregate counters for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Loop iterations executed (model completions requested)
    pub iterations: u32,
    /// Tool calls executed, including subagent delegations
    pub tool_calls: u32,
    /// Tool calls that ended with an error result
    pub failed_tool_calls: u32,
    /// Nested subagent runs launched
    pub subagent_runs: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl RunStats {
    /// Fold a nested run's counters into this one.
    pub fn absorb(&mut self, nested: &RunStats) {
        self.iterations += nested.iterations;
        self.tool_calls += nested.tool_calls;
        self.failed_tool_calls += nested.failed_tool_calls;
        self.subagent_runs += nested.subagent_runs;
        self.prompt_tokens += nested.prompt_tokens;
        self.completion_tokens += nested.completion_tokens;
    }
}

/// Events emitted during one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A fragment of model reasoning.
    Thinking { content: String },

    /// A tool call is about to execute.
    ToolCallStart {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// A tool call resolved.
    ToolCallComplete {
        call_id: String,
        tool_name: String,
        success: bool,
        output: String,
    },

    /// A fragment of the assistant's visible text.
    TextDelta { content: String },

    /// A subagent run is starting.
    SubagentStart {
        call_id: String,
        subagent: String,
        depth: u32,
    },

    /// A subagent run returned.
    SubagentComplete {
        call_id: String,
        subagent: String,
        final_text: String,
    },

    /// Something went wrong. `recoverable == false` means the job needs
    /// external follow-up.
    Error { message: String, recoverable: bool },

    /// The top-level run finished.
    Complete { final_text: String, stats: RunStats },
}

impl AgentEvent {
    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thinking { .. } => "thinking",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallComplete { .. } => "tool_call_complete",
            Self::TextDelta { .. } => "text_delta",
            Self::SubagentStart { .. } => "subagent_start",
            Self::SubagentComplete { .. } => "subagent_complete",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// One-line human-readable rendering, for logs and terminal output.
    pub fn describe(&self) -> String {
        match self {
            Self::Thinking { content } => format!("thinking: {content}"),
            Self::ToolCallStart { call_id, tool_name, .. } => {
                format!("→ {tool_name} [{call_id}]")
            }
            Self::ToolCallComplete { call_id, tool_name, success, .. } => {
                let mark = if *success { "ok" } else { "failed" };
                format!("← {tool_name} [{call_id}] {mark}")
            }
            Self::TextDelta { content } => content.clone(),
            Self::SubagentStart { subagent, depth, .. } => {
                format!("subagent {subagent} started (depth {depth})")
            }
            Self::SubagentComplete { subagent, final_text, .. } => {
                format!("subagent {subagent} finished: {}", preview(final_text, 80))
            }
            Self::Error { message, recoverable: true } => format!("error: {message}"),
            Self::Error { message, recoverable: false } => {
                format!("error (needs attention): {message}")
            }
            Self::Complete { stats, .. } => format!(
                "complete after {} iteration(s), {} tool call(s)",
                stats.iterations, stats.tool_calls
            ),
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

/// Producer side of an invocation's event stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<AgentEvent>,
}

impl EventEmitter {
    /// Create a connected emitter/stream pair.
    pub fn channel() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, EventStream { receiver })
    }

    /// An emitter whose events go nowhere.
    pub fn detached() -> Self {
        let (emitter, _stream) = Self::channel();
        emitter
    }

    /// Append an event. A dropped stream is not an error.
    pub fn emit(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }
}

/// Consumer side of an invocation's event stream.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<AgentEvent>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<AgentEvent> {
        self.receiver.recv().await
    }

    /// Drain everything emitted so far without waiting.
    pub fn drain(&mut self) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl futures::Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
