//! JSON schemas for the tool catalog, as offered to the model.

use serde_json::json;
use skein_core::provider::ToolSchema;
use skein_core::subagent::SubagentRegistry;
use skein_core::tool::{ToolKind, ToolPolicy};

/// The schema for one catalog entry.
///
/// The `task` description lists the registered subagents so the model
/// knows which names it may delegate to.
pub fn schema_for(kind: ToolKind, subagents: &SubagentRegistry) -> ToolSchema {
    let (description, properties) = match kind {
        ToolKind::MemorySearch => (
            "Search the user's long-term memory for relevant facts and past conversations. \
             Use this when you need to recall something you've been told before."
                .to_string(),
            json!({
                "query": {
                    "type": "string",
                    "description": "What to look for"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of facts to return (default 8)"
                }
            }),
        ),
        ToolKind::SocialSearch => (
            "Search the user's connected social accounts for posts and messages.".to_string(),
            json!({
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "platform": {
                    "type": "string",
                    "description": "Restrict to one platform (optional)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of results"
                }
            }),
        ),
        ToolKind::AppIntegration => (
            "Call an action on one of the user's connected apps (email, calendar, ...).".to_string(),
            json!({
                "app": {
                    "type": "string",
                    "description": "The connected app, e.g. \"gmail\""
                },
                "action": {
                    "type": "string",
                    "description": "The action to perform, e.g. \"list_messages\""
                },
                "params": {
                    "type": "object",
                    "description": "Action parameters"
                }
            }),
        ),
        ToolKind::Task => {
            let mut description =
                "Delegate a self-contained sub-task to a specialist subagent and wait for its answer."
                    .to_string();
            if !subagents.is_empty() {
                description.push_str("\nAvailable subagents:\n");
                description.push_str(&subagents.catalog());
            }
            (
                description,
                json!({
                    "subagent": {
                        "type": "string",
                        "description": "Name of the subagent to run"
                    },
                    "prompt": {
                        "type": "string",
                        "description": "The task for the subagent, with all context it needs"
                    }
                }),
            )
        }
    };

    ToolSchema {
        name: kind.name().to_string(),
        description,
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": kind.required_arguments(),
        }),
    }
}

/// Schemas for every tool the policy allows, in catalog order.
///
/// `task` is left out when no subagents are registered.
pub fn tool_schemas(policy: &ToolPolicy, subagents: &SubagentRegistry) -> Vec<ToolSchema> {
    policy
        .allowed_kinds()
        .into_iter()
        .filter(|kind| *kind != ToolKind::Task || !subagents.is_empty())
        .map(|kind| schema_for(kind, subagents))
        .collect()
}
