//! Tool calls, the closed tool catalog, and the result envelope.
//!
//! The runtime knows a fixed set of tools. A raw [`ToolCall`] emitted by the
//! model is validated into a [`ToolInvocation`], a tagged variant with a typed
//! payload, so that dispatch is a total `match` rather than a string lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ToolError;
use crate::identity::CallerIdentity;

/// A request to execute a tool, as emitted by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON value
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// The first required argument this call lacks, if any.
    ///
    /// Unknown tool names have no requirements here; they are rejected by
    /// the gateway instead.
    pub fn missing_argument(&self) -> Option<&'static str> {
        let kind = ToolKind::from_name(&self.name)?;
        kind.required_arguments()
            .iter()
            .copied()
            .find(|arg| !argument_present(&self.arguments, arg))
    }

    /// Whether every required argument is present.
    ///
    /// Streamed calls that are still missing fields are treated as
    /// incomplete fragments and skipped by the loop.
    pub fn is_complete(&self) -> bool {
        self.missing_argument().is_none()
    }
}

fn argument_present(arguments: &serde_json::Value, name: &str) -> bool {
    match arguments.get(name) {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// The closed set of tools the gateway can execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Search the user's long-term memory
    MemorySearch,
    /// Search connected social accounts
    SocialSearch,
    /// Call an action on a connected third-party app
    AppIntegration,
    /// Delegate a sub-task to a named subagent
    Task,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::MemorySearch,
        ToolKind::SocialSearch,
        ToolKind::AppIntegration,
        ToolKind::Task,
    ];

    /// The wire name the model uses for this tool.
    pub fn name(self) -> &'static str {
        match self {
            Self::MemorySearch => "memory_search",
            Self::SocialSearch => "social_search",
            Self::AppIntegration => "app_integration",
            Self::Task => "task",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Arguments that must be present before the call may run.
    pub fn required_arguments(self) -> &'static [&'static str] {
        match self {
            Self::MemorySearch => &["query"],
            Self::SocialSearch => &["query"],
            Self::AppIntegration => &["app", "action"],
            Self::Task => &["subagent", "prompt"],
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A validated tool call with a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    MemorySearch {
        query: String,
        limit: Option<usize>,
    },
    SocialSearch {
        query: String,
        platform: Option<String>,
        limit: Option<usize>,
    },
    AppIntegration {
        app: String,
        action: String,
        params: serde_json::Value,
    },
    Task {
        subagent: String,
        prompt: String,
    },
}

impl ToolInvocation {
    /// Validate a raw call against the catalog and its required arguments.
    pub fn from_call(call: &ToolCall) -> Result<Self, ToolError> {
        let kind = ToolKind::from_name(&call.name)
            .ok_or_else(|| ToolError::UnknownTool(call.name.clone()))?;

        if let Some(argument) = call.missing_argument() {
            return Err(ToolError::MissingArgument {
                tool_name: call.name.clone(),
                argument: argument.to_string(),
            });
        }

        let args = &call.arguments;
        let invocation = match kind {
            ToolKind::MemorySearch => Self::MemorySearch {
                query: string_arg(args, kind, "query")?,
                limit: optional_limit(args),
            },
            ToolKind::SocialSearch => Self::SocialSearch {
                query: string_arg(args, kind, "query")?,
                platform: args
                    .get("platform")
                    .and_then(|v| v.as_str())
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty()),
                limit: optional_limit(args),
            },
            ToolKind::AppIntegration => Self::AppIntegration {
                app: string_arg(args, kind, "app")?,
                action: string_arg(args, kind, "action")?,
                params: args
                    .get("params")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({})),
            },
            ToolKind::Task => Self::Task {
                subagent: string_arg(args, kind, "subagent")?,
                prompt: string_arg(args, kind, "prompt")?,
            },
        };
        Ok(invocation)
    }

    /// The validated payload as JSON for a backend: strings trimmed,
    /// optional fields present only when set, unknown fields dropped.
    pub fn arguments(&self) -> serde_json::Value {
        let mut args = serde_json::Map::new();
        match self {
            Self::MemorySearch { query, limit } => {
                args.insert("query".into(), query.as_str().into());
                if let Some(limit) = limit {
                    args.insert("limit".into(), (*limit).into());
                }
            }
            Self::SocialSearch {
                query,
                platform,
                limit,
            } => {
                args.insert("query".into(), query.as_str().into());
                if let Some(platform) = platform {
                    args.insert("platform".into(), platform.as_str().into());
                }
                if let Some(limit) = limit {
                    args.insert("limit".into(), (*limit).into());
                }
            }
            Self::AppIntegration {
                app,
                action,
                params,
            } => {
                args.insert("app".into(), app.as_str().into());
                args.insert("action".into(), action.as_str().into());
                args.insert("params".into(), params.clone());
            }
            Self::Task { subagent, prompt } => {
                args.insert("subagent".into(), subagent.as_str().into());
                args.insert("prompt".into(), prompt.as_str().into());
            }
        }
        serde_json::Value::Object(args)
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Self::MemorySearch { .. } => ToolKind::MemorySearch,
            Self::SocialSearch { .. } => ToolKind::SocialSearch,
            Self::AppIntegration { .. } => ToolKind::AppIntegration,
            Self::Task { .. } => ToolKind::Task,
        }
    }
}

fn string_arg(args: &serde_json::Value, kind: ToolKind, name: &str) -> Result<String, ToolError> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| {
            ToolError::InvalidArguments(format!("'{name}' must be a string for tool {kind}"))
        })
}

fn optional_limit(args: &serde_json::Value) -> Option<usize> {
    args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize)
}

/// Which tools a run may offer to the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolPolicy {
    /// Every tool in the catalog
    #[default]
    All,
    /// No tools at all
    None,
    /// Only the listed tools
    Only(Vec<ToolKind>),
}

impl ToolPolicy {
    /// Map an optional list of tool names onto a policy.
    ///
    /// `None` means all tools, an empty list means no tools. Names outside
    /// the catalog are dropped with a warning.
    pub fn from_names(names: Option<&[String]>) -> Self {
        match names {
            None => Self::All,
            Some([]) => Self::None,
            Some(names) => {
                let kinds = names
                    .iter()
                    .filter_map(|n| {
                        let kind = ToolKind::from_name(n);
                        if kind.is_none() {
                            warn!(tool = %n, "Ignoring unknown tool name in allow-list");
                        }
                        kind
                    })
                    .collect();
                Self::Only(kinds)
            }
        }
    }

    pub fn allows(&self, kind: ToolKind) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Only(kinds) => kinds.contains(&kind),
        }
    }

    /// The catalog entries this policy lets through, in catalog order.
    pub fn allowed_kinds(&self) -> Vec<ToolKind> {
        ToolKind::ALL.into_iter().filter(|k| self.allows(*k)).collect()
    }
}

/// Typed success/error payload of one tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: serde_json::Value },
    Error { message: String, retryable: bool },
}

impl ToolOutcome {
    pub fn from_error(err: &ToolError) -> Self {
        Self::Error {
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// The result of one tool call, correlated to it by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// The tool that produced it
    pub tool_name: String,

    /// The envelope
    pub outcome: ToolOutcome,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: serde_json::Value) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::Success { payload },
        }
    }

    pub fn failure(call: &ToolCall, err: &ToolError) -> Self {
        Self {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            outcome: ToolOutcome::from_error(err),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Success { .. })
    }

    /// The error message, for failed results.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            ToolOutcome::Error { message, .. } => Some(message),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Plain-text view of the payload.
    ///
    /// String payloads are returned verbatim; anything else is rendered as
    /// JSON. Errors render their message.
    pub fn text(&self) -> String {
        match &self.outcome {
            ToolOutcome::Success { payload: serde_json::Value::String(s) } => s.clone(),
            ToolOutcome::Success { payload } => payload.to_string(),
            ToolOutcome::Error { message, .. } => message.clone(),
        }
    }

    /// The envelope serialized for a tool-result history message.
    pub fn history_content(&self) -> String {
        serde_json::to_string(&self.outcome).unwrap_or_else(|_| self.text())
    }
}

/// A backend that executes one kind of tool.
///
/// Backends receive the raw JSON arguments (already validated against the
/// tool's required set) and the identity of the caller.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    async fn invoke(
        &self,
        arguments: &serde_json::Value,
        caller: &CallerIdentity,
    ) -> Result<serde_json::Value, ToolError>;
}
