//! Message types that make up a run's conversation history.
//!
//! The orchestration loop appends to a `Vec<Message>` as it alternates
//! between model turns and tool results; providers translate these into
//! their own wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The model
    Assistant,
    /// System instructions
    System,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// An assistant turn that requested tool calls.
    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<MessageToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = calls;
        msg
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// The most recent user message in a history, if any.
pub fn last_user_message(history: &[Message]) -> Option<&Message> {
    history.iter().rev().find(|m| m.role == Role::User)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_result_carries_call_id() {
        let msg = Message::tool_result("call_7", "{\"status\":\"success\"}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn assistant_with_calls_keeps_calls() {
        let msg = Message::assistant_with_calls(
            "Looking that up",
            vec![MessageToolCall {
                id: "c1".into(),
                name: "memory_search".into(),
                arguments: r#"{"query":"pricing"}"#.into(),
            }],
        );
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.role, Role::Assistant);
    }

    #[test]
    fn last_user_message_skips_later_turns() {
        let history = vec![
            Message::user("first"),
            Message::assistant("reply"),
            Message::user("second"),
            Message::assistant("another reply"),
        ];
        assert_eq!(last_user_message(&history).unwrap().content, "second");
        assert!(last_user_message(&[]).is_none());
    }
}
