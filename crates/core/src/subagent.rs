//! Subagent definitions and the static registry they are looked up in.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tool::ToolPolicy;

/// Static configuration for a specialist agent reachable through `task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentDefinition {
    /// Name the model passes as the `subagent` argument
    pub name: String,

    /// What this subagent is good at (shown to the model)
    pub description: String,

    /// Tool names the subagent may use; `None` inherits the parent's set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,

    /// System prompt for the nested run. `{task}` is replaced with the
    /// delegated prompt.
    pub prompt_template: String,

    /// Model override; `None` inherits the parent's model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SubagentDefinition {
    pub fn render_prompt(&self, task: &str) -> String {
        self.prompt_template.replace("{task}", task)
    }

    /// The tool policy for a nested run, given the parent's.
    pub fn tool_policy(&self, parent: &ToolPolicy) -> ToolPolicy {
        match &self.allowed_tools {
            Some(names) => ToolPolicy::from_names(Some(names.as_slice())),
            None => parent.clone(),
        }
    }
}

/// Name-keyed lookup of subagent definitions. Built once, never mutated
/// while runs are in flight.
#[derive(Debug, Clone, Default)]
pub struct SubagentRegistry {
    definitions: HashMap<String, SubagentDefinition>,
}

impl SubagentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Replaces any existing one with the same name.
    pub fn register(&mut self, definition: SubagentDefinition) {
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn get(&self, name: &str) -> Option<&SubagentDefinition> {
        self.definitions.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// "- name: description" lines, sorted by name, for tool descriptions.
    pub fn catalog(&self) -> String {
        let mut names: Vec<&SubagentDefinition> = self.definitions.values().collect();
        names.sort_by(|a, b| a.name.cmp(&b.name));
        names
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<SubagentDefinition> for SubagentRegistry {
    fn from_iter<I: IntoIterator<Item = SubagentDefinition>>(iter: I) -> Self {
        let mut registry = Self::new();
        for definition in iter {
            registry.register(definition);
        }
        registry
    }
}
