//! The orchestration loop.
//!
//! Each iteration requests one streamed completion, then executes the tool
//! calls it asked for concurrently and folds the results back into the
//! conversation:
//!
//! 1. **Stream** a completion over the history, emitting text and reasoning live
//! 2. **Filter** tool calls still missing required arguments
//! 3. **Stop** if none remain; the turn's text is the final answer
//! 4. **Execute** the calls in parallel through the [`ToolGateway`]
//! 5. **Fold** the assistant turn and tool results into history, loop
//!
//! The loop ends when the model stops calling tools or the iteration budget
//! runs out. Subagent runs re-enter [`Orchestrator::run`] one level deeper.

use futures::future::join_all;
use skein_config::{AppConfig, MAX_RECURSION_DEPTH};
use skein_core::error::{Error, ProviderError, Result};
use skein_core::event::{AgentEvent, EventEmitter, RunStats};
use skein_core::identity::CallerIdentity;
use skein_core::job::JobStatus;
use skein_core::message::Message;
use skein_core::provider::{CompletionProvider, CompletionRequest};
use skein_core::subagent::SubagentRegistry;
use skein_core::tool::{ToolKind, ToolPolicy};
use skein_tools::tool_schemas;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::context::ContextRetriever;
use crate::gateway::{CallFrame, ToolExecution, ToolGateway};
use crate::turn::{Turn, message_calls};

/// Run-wide settings, resolved once from configuration.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub temperature: f32,
    /// Iteration budget for top-level runs
    pub max_iterations: u32,
    /// Iteration budget for subagent runs
    pub subagent_max_iterations: u32,
    /// Deepest allowed run; a run starting deeper is a configuration error
    pub max_depth: u32,
}

impl RunSettings {
    /// The nesting cap in force, never above [`MAX_RECURSION_DEPTH`].
    pub fn depth_cap(&self) -> u32 {
        self.max_depth.min(MAX_RECURSION_DEPTH)
    }
}

impl RunSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_iterations: config.agent.max_iterations,
            subagent_max_iterations: config.agent.subagent_max_iterations,
            max_depth: config.agent.max_recursion_depth,
        }
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Inputs for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub user_message: String,
    pub system_prompt: String,
    /// Earlier turns of the conversation, oldest first
    pub history: Vec<Message>,
    pub tools: ToolPolicy,
    /// Overrides the budget for this depth
    pub max_iterations: Option<u32>,
    pub depth: u32,
    /// Overrides the configured model
    pub model: Option<String>,
    pub caller: CallerIdentity,
}

impl RunContext {
    /// A top-level run with a fresh job id and every tool allowed.
    pub fn new(user_message: impl Into<String>, caller: CallerIdentity) -> Self {
        Self {
            job_id: format!("job_{}", uuid::Uuid::new_v4().simple()),
            user_message: user_message.into(),
            system_prompt: String::new(),
            history: Vec::new(),
            tools: ToolPolicy::All,
            max_iterations: None,
            depth: 0,
            model: None,
            caller,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = job_id.into();
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_tools(mut self, tools: ToolPolicy) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }
}

/// What a run returns.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub final_text: String,
    pub stats: RunStats,
}

/// Drives a model through tool-calling turns.
pub struct Orchestrator {
    provider: Arc<dyn CompletionProvider>,
    gateway: ToolGateway,
    pub(crate) subagents: SubagentRegistry,
    retriever: Option<ContextRetriever>,
    pub(crate) settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        gateway: ToolGateway,
        settings: RunSettings,
    ) -> Self {
        Self {
            provider,
            gateway,
            subagents: SubagentRegistry::new(),
            retriever: None,
            settings,
        }
    }

    /// Subagents reachable through `task`.
    pub fn with_subagents(mut self, subagents: SubagentRegistry) -> Self {
        self.subagents = subagents;
        self
    }

    /// Inject retrieved memory into top-level runs.
    pub fn with_retriever(mut self, retriever: ContextRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn gateway(&self) -> &ToolGateway {
        &self.gateway
    }

    /// Run to completion.
    ///
    /// Only a provider failure or a depth beyond the cap is an `Err`; tool
    /// failures become error results the model sees on its next turn.
    pub async fn run(&self, ctx: RunContext, events: &EventEmitter) -> Result<RunOutcome> {
        if ctx.depth > self.settings.depth_cap() {
            return Err(Error::Config {
                message: format!(
                    "recursion depth {} exceeds the limit of {}",
                    ctx.depth,
                    self.settings.depth_cap()
                ),
            });
        }

        let top_level = ctx.depth == 0;
        let model = ctx.model.clone().unwrap_or_else(|| self.settings.model.clone());
        let max_iterations = ctx.max_iterations.unwrap_or(if top_level {
            self.settings.max_iterations
        } else {
            self.settings.subagent_max_iterations
        });

        info!(
            job_id = %ctx.job_id,
            depth = ctx.depth,
            model = %model,
            max_iterations,
            "Starting run"
        );

        if top_level {
            let mut metadata = serde_json::Map::new();
            metadata.insert("user_id".into(), ctx.caller.user_id.clone().into());
            metadata.insert("model".into(), model.clone().into());
            self.gateway
                .store()
                .upsert_job(&ctx.job_id, JobStatus::Running, metadata)
                .await?;
        }

        let mut system_prompt = ctx.system_prompt.clone();
        let retriever = self.retriever.as_ref().filter(|_| top_level);
        if let Some(retriever) = retriever {
            if let Some(block) = retriever
                .context_for(&ctx.caller, &ctx.user_message, &ctx.history)
                .await
            {
                system_prompt.push_str(&block);
            }
        }

        let schemas = tool_schemas(&ctx.tools, &self.subagents);
        let frame = CallFrame {
            job_id: ctx.job_id.clone(),
            depth: ctx.depth,
            policy: ctx.tools.clone(),
            model: model.clone(),
            caller: ctx.caller.clone(),
        };

        let mut history = ctx.history;
        history.push(Message::user(&ctx.user_message));
        let mut stats = RunStats::default();
        let mut final_text = String::new();
        let mut finished = false;

        for iteration in 1..=max_iterations {
            stats.iterations += 1;
            debug!(job_id = %ctx.job_id, depth = ctx.depth, iteration, "Loop iteration");

            let request = CompletionRequest {
                model: model.clone(),
                system_prompt: system_prompt.clone(),
                history: history.clone(),
                tools: schemas.clone(),
                temperature: self.settings.temperature,
            };
            let turn = match self.stream_turn(request, events).await {
                Ok(turn) => turn,
                Err(e) => return Err(self.fail_run(&ctx.job_id, top_level, e, events).await),
            };
            if let Some(usage) = &turn.usage {
                stats.prompt_tokens += u64::from(usage.prompt_tokens);
                stats.completion_tokens += u64::from(usage.completion_tokens);
            }
            final_text = turn.text.clone();

            let calls = turn.complete_calls();
            if calls.is_empty() {
                finished = true;
                break;
            }

            debug!(job_id = %ctx.job_id, iteration, tool_count = calls.len(), "Executing tool calls");
            for call in &calls {
                events.emit(AgentEvent::ToolCallStart {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    arguments: call.arguments.clone(),
                });
            }

            let executions: Vec<ToolExecution> = join_all(
                calls
                    .iter()
                    .map(|call| self.gateway.execute(call, &frame, self, events)),
            )
            .await;

            for execution in &executions {
                stats.tool_calls += 1;
                if !execution.result.is_success() {
                    stats.failed_tool_calls += 1;
                }
                if let Some(run) = &execution.subagent {
                    stats.subagent_runs += 1;
                    stats.absorb(&run.stats);
                }
            }

            let all_delegations = calls.iter().all(|c| c.name == ToolKind::Task.name());
            if all_delegations {
                // The subagents' answers stand in for the assistant's turn.
                let answer = executions
                    .iter()
                    .map(|e| e.result.text())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                final_text = answer.clone();
                history.push(Message::assistant(answer));
            } else {
                history.push(Message::assistant_with_calls(&turn.text, message_calls(&calls)));
                for execution in &executions {
                    history.push(Message::tool_result(
                        &execution.result.call_id,
                        execution.result.history_content(),
                    ));
                }
            }
        }

        if !finished {
            warn!(
                job_id = %ctx.job_id,
                depth = ctx.depth,
                max_iterations,
                "Iteration budget exhausted"
            );
        }

        if top_level {
            // A blocked job keeps its status; the store enforces that.
            if let Err(e) = self
                .gateway
                .store()
                .upsert_job(&ctx.job_id, JobStatus::Completed, serde_json::Map::new())
                .await
            {
                warn!(job_id = %ctx.job_id, error = %e, "Failed to mark job completed");
            }
            events.emit(AgentEvent::Complete {
                final_text: final_text.clone(),
                stats: stats.clone(),
            });
        }

        info!(
            job_id = %ctx.job_id,
            depth = ctx.depth,
            iterations = stats.iterations,
            tool_calls = stats.tool_calls,
            "Run finished"
        );
        Ok(RunOutcome { final_text, stats })
    }

    async fn stream_turn(
        &self,
        request: CompletionRequest,
        events: &EventEmitter,
    ) -> std::result::Result<Turn, ProviderError> {
        let receiver = self.provider.stream_completion(request).await?;
        let mut stream = ReceiverStream::new(receiver);
        let mut turn = Turn::default();
        while let Some(delta) = stream.next().await {
            if turn.apply(delta?, events) {
                break;
            }
        }
        Ok(turn)
    }

    /// Mark a top-level job failed and surface the provider error.
    async fn fail_run(
        &self,
        job_id: &str,
        top_level: bool,
        err: ProviderError,
        events: &EventEmitter,
    ) -> Error {
        warn!(job_id, error = %err, "Completion failed");
        if top_level {
            if let Err(e) = self
                .gateway
                .store()
                .upsert_job(job_id, JobStatus::Failed, serde_json::Map::new())
                .await
            {
                warn!(job_id, error = %e, "Failed to mark job failed");
            }
            events.emit(AgentEvent::Error {
                message: format!("Completion failed: {err}"),
                recoverable: false,
            });
        }
        Error::Provider(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ToolBackends;
    use crate::test_helpers::{ScriptedProvider, ScriptedTurn};
    use serde_json::json;
    use skein_core::job::ProgressStore;
    use skein_memory::InMemoryProgressStore;
    use skein_tools::FnToolBackend;

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        backends: ToolBackends,
    ) -> (Orchestrator, Arc<InMemoryProgressStore>) {
        let store = Arc::new(InMemoryProgressStore::new());
        let gateway = ToolGateway::new(backends, store.clone());
        let settings = RunSettings {
            model: "mock-model".into(),
            ..RunSettings::default()
        };
        (Orchestrator::new(provider, gateway, settings), store)
    }

    fn echo_backends() -> ToolBackends {
        ToolBackends::new().with_memory_search(Arc::new(FnToolBackend::new(
            "memory",
            |args, _caller| async move { Ok(json!({"results": [args["query"]]})) },
        )))
    }

    #[tokio::test]
    async fn text_only_turn_finishes_immediately() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("Hello!")]));
        let (orch, store) = orchestrator(provider.clone(), ToolBackends::new());
        let (events, mut stream) = EventEmitter::channel();

        let ctx = RunContext::new("hi", CallerIdentity::new("u1")).with_job_id("job_a");
        let outcome = orch.run(ctx, &events).await.unwrap();

        assert_eq!(outcome.final_text, "Hello!");
        assert_eq!(outcome.stats.iterations, 1);
        assert_eq!(outcome.stats.prompt_tokens, 10);
        assert_eq!(provider.call_count(), 1);

        let job = store.get_job("job_a").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        let types: Vec<_> = stream.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec!["text_delta", "complete"]);
    }

    #[tokio::test]
    async fn tool_results_are_folded_into_history() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_calls(
                "Looking.",
                &[("c1", "memory_search", json!({"query": "pricing"}))],
            ),
            ScriptedTurn::text("Annual billing."),
        ]));
        let (orch, _store) = orchestrator(provider.clone(), echo_backends());

        let outcome = orch
            .run(RunContext::new("pricing?", CallerIdentity::new("u1")), &EventEmitter::detached())
            .await
            .unwrap();
        assert_eq!(outcome.final_text, "Annual billing.");
        assert_eq!(outcome.stats.tool_calls, 1);

        let second = &provider.requests()[1];
        assert_eq!(second.history.len(), 3);
        assert_eq!(second.history[1].tool_calls[0].id, "c1");
        assert_eq!(second.history[2].tool_call_id.as_deref(), Some("c1"));
        assert!(second.history[2].content.contains(r#""status":"success""#));
        assert_eq!(second.tools.len(), 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_returns_last_text() {
        let looping = |i: usize| {
            let id = format!("c{i}");
            ScriptedTurn::tool_calls(
                &format!("pass {i}"),
                &[(id.as_str(), "memory_search", json!({"query": "x"}))],
            )
        };
        let provider = Arc::new(ScriptedProvider::new((0..3).map(looping).collect()));
        let (orch, _store) = orchestrator(provider.clone(), echo_backends());

        let ctx = RunContext::new("go", CallerIdentity::new("u1")).with_max_iterations(2);
        let outcome = orch.run(ctx, &EventEmitter::detached()).await.unwrap();
        assert_eq!(outcome.final_text, "pass 1");
        assert_eq!(outcome.stats.iterations, 2);
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn provider_failure_marks_job_failed() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::Fail(
            ProviderError::RateLimited { retry_after_secs: 5 },
        )]));
        let (orch, store) = orchestrator(provider, ToolBackends::new());
        let (events, mut stream) = EventEmitter::channel();

        let ctx = RunContext::new("hi", CallerIdentity::new("u1")).with_job_id("job_f");
        let err = orch.run(ctx, &events).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ProviderError::RateLimited { .. })));

        let job = store.get_job("job_f").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(stream
            .drain()
            .iter()
            .any(|e| matches!(e, AgentEvent::Error { recoverable: false, .. })));
    }

    #[tokio::test]
    async fn depth_beyond_cap_is_config_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (orch, _store) = orchestrator(provider.clone(), ToolBackends::new());

        let ctx = RunContext::new("hi", CallerIdentity::new("u1")).with_depth(4);
        let err = orch.run(ctx, &EventEmitter::detached()).await.unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_policy_offers_no_tools() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text("ok")]));
        let (orch, _store) = orchestrator(provider.clone(), ToolBackends::new());

        let ctx = RunContext::new("hi", CallerIdentity::new("u1")).with_tools(ToolPolicy::None);
        orch.run(ctx, &EventEmitter::detached()).await.unwrap();
        assert!(provider.requests()[0].tools.is_empty());
    }
}
