//! Subagent dispatch: `task` calls become nested orchestration runs.
//!
//! A nested run shares the parent's job id, uses the subagent's prompt and
//! tool policy, and runs one level deeper with the subagent budget. Its
//! failures come back as an ordinary error result for the `task` call.

use async_trait::async_trait;
use skein_core::error::ToolError;
use skein_core::event::{AgentEvent, EventEmitter};
use skein_core::job::Artifact;
use skein_core::tool::ToolKind;
use tracing::{info, warn};

use crate::gateway::{CallFrame, SubagentLauncher, SubagentRun};
use crate::orchestrator::{Orchestrator, RunContext};

/// Artifact kind recorded for every successful subagent run.
pub const SUBAGENT_RESULT_KIND: &str = "subagent_result";

#[async_trait]
impl SubagentLauncher for Orchestrator {
    async fn launch(
        &self,
        call_id: &str,
        subagent: &str,
        prompt: &str,
        frame: &CallFrame,
        events: &EventEmitter,
    ) -> Result<SubagentRun, ToolError> {
        let definition = self
            .subagents
            .get(subagent)
            .ok_or_else(|| ToolError::UnknownSubagent(subagent.to_string()))?;

        let cap = self.settings.depth_cap();
        if frame.depth >= cap {
            return Err(ToolError::DepthExceeded {
                depth: frame.depth,
                max: cap,
            });
        }

        let depth = frame.depth + 1;
        info!(job_id = %frame.job_id, subagent, depth, "Delegating to subagent");
        events.emit(AgentEvent::SubagentStart {
            call_id: call_id.to_string(),
            subagent: subagent.to_string(),
            depth,
        });

        let ctx = RunContext {
            job_id: frame.job_id.clone(),
            user_message: prompt.to_string(),
            system_prompt: definition.render_prompt(prompt),
            history: Vec::new(),
            tools: definition.tool_policy(&frame.policy),
            max_iterations: Some(self.settings.subagent_max_iterations),
            depth,
            model: Some(definition.model.clone().unwrap_or_else(|| frame.model.clone())),
            caller: frame.caller.clone(),
        };

        let outcome = self
            .run(ctx, events)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: ToolKind::Task.name().to_string(),
                reason: format!("subagent {subagent} failed: {e}"),
            })?;

        let artifact = Artifact::new(
            SUBAGENT_RESULT_KIND,
            subagent,
            serde_json::json!({
                "call_id": call_id,
                "depth": depth,
                "final_text": outcome.final_text,
            }),
        );
        if let Err(e) = self
            .gateway()
            .store()
            .append_artifact(&frame.job_id, artifact)
            .await
        {
            warn!(job_id = %frame.job_id, subagent, error = %e, "Failed to store subagent artifact");
        }

        events.emit(AgentEvent::SubagentComplete {
            call_id: call_id.to_string(),
            subagent: subagent.to_string(),
            final_text: outcome.final_text.clone(),
        });

        Ok(SubagentRun {
            final_text: outcome.final_text,
            stats: outcome.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{ToolBackends, ToolGateway};
    use crate::orchestrator::RunSettings;
    use crate::test_helpers::{ScriptedProvider, ScriptedTurn};
    use skein_core::identity::CallerIdentity;
    use skein_core::job::{JobStatus, ProgressStore};
    use skein_core::subagent::{SubagentDefinition, SubagentRegistry};
    use skein_core::tool::{ToolKind, ToolPolicy};
    use skein_memory::InMemoryProgressStore;
    use std::sync::Arc;

    fn registry(allowed: Option<Vec<String>>) -> SubagentRegistry {
        [SubagentDefinition {
            name: "researcher".into(),
            description: "Digs through memory".into(),
            allowed_tools: allowed,
            prompt_template: "You research. Task: {task}".into(),
            model: Some("research-model".into()),
        }]
        .into_iter()
        .collect()
    }

    async fn setup(
        turns: Vec<ScriptedTurn>,
        allowed: Option<Vec<String>>,
    ) -> (Orchestrator, Arc<ScriptedProvider>, Arc<InMemoryProgressStore>) {
        let provider = Arc::new(ScriptedProvider::new(turns));
        let store = Arc::new(InMemoryProgressStore::new());
        store
            .upsert_job("job_1", JobStatus::Running, serde_json::Map::new())
            .await
            .unwrap();
        let gateway = ToolGateway::new(ToolBackends::new(), store.clone());
        let orch = Orchestrator::new(provider.clone(), gateway, RunSettings::default())
            .with_subagents(registry(allowed));
        (orch, provider, store)
    }

    fn frame(depth: u32) -> CallFrame {
        CallFrame {
            job_id: "job_1".into(),
            depth,
            policy: ToolPolicy::All,
            model: "parent-model".into(),
            caller: CallerIdentity::new("u1"),
        }
    }

    #[tokio::test]
    async fn nested_run_uses_definition_and_records_artifact() {
        let (orch, provider, store) = setup(
            vec![ScriptedTurn::text("Pricing is annual.")],
            Some(vec!["memory_search".into()]),
        )
        .await;
        let (events, mut stream) = EventEmitter::channel();

        let run = orch
            .launch("c1", "researcher", "find pricing", &frame(0), &events)
            .await
            .unwrap();
        assert_eq!(run.final_text, "Pricing is annual.");
        assert_eq!(run.stats.iterations, 1);

        let request = &provider.requests()[0];
        assert_eq!(request.model, "research-model");
        assert_eq!(request.system_prompt, "You research. Task: find pricing");
        let tools: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, vec![ToolKind::MemorySearch.name()]);

        let job = store.get_job("job_1").await.unwrap().unwrap();
        assert_eq!(job.artifacts.len(), 1);
        assert_eq!(job.artifacts[0].kind, SUBAGENT_RESULT_KIND);
        assert_eq!(job.status, JobStatus::Running);

        let types: Vec<_> = stream.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["subagent_start", "text_delta", "subagent_complete"]);
    }

    #[tokio::test]
    async fn unknown_subagent_is_rejected() {
        let (orch, provider, _store) = setup(vec![], None).await;
        let err = orch
            .launch("c1", "writer", "draft", &frame(0), &EventEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(&err, ToolError::UnknownSubagent(name) if name == "writer"));
        assert!(!err.is_retryable());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn depth_cap_blocks_launch_without_provider_call() {
        let (orch, provider, _store) = setup(vec![ScriptedTurn::text("never")], None).await;
        let err = orch
            .launch("c1", "researcher", "dig", &frame(3), &EventEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::DepthExceeded { depth: 3, max: 3 }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn depth_cap_holds_even_when_settings_ask_for_more() {
        let (mut orch, provider, _store) = setup(vec![ScriptedTurn::text("never")], None).await;
        orch.settings.max_depth = 10;
        let err = orch
            .launch("c1", "researcher", "dig", &frame(3), &EventEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::DepthExceeded { depth: 3, max: 3 }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn nested_provider_failure_is_a_tool_error() {
        let (orch, _provider, store) = setup(vec![], None).await;
        let err = orch
            .launch("c1", "researcher", "dig", &frame(0), &EventEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed { .. }));

        // Nested failures never mark the shared job failed.
        let job = store.get_job("job_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
    }
}
