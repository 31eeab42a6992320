//! Tool execution gateway.
//!
//! Validates one tool call, dispatches it to its backend (or to the
//! subagent launcher for `task`), retries retryable failures with linear
//! backoff, and records every call as a step in the job's scratchpad.
//! Repeated failures escalate the job to `blocked`.

use async_trait::async_trait;
use serde_json::json;
use skein_config::AgentConfig;
use skein_core::error::ToolError;
use skein_core::event::{AgentEvent, EventEmitter, RunStats};
use skein_core::identity::CallerIdentity;
use skein_core::job::{JobStatus, ProgressStore, Step};
use skein_core::tool::{ToolBackend, ToolCall, ToolInvocation, ToolPolicy, ToolResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a call is being made from.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub job_id: String,
    /// Depth of the run issuing the call
    pub depth: u32,
    /// Tools the issuing run may use
    pub policy: ToolPolicy,
    /// Model of the issuing run, inherited by subagents without an override
    pub model: String,
    pub caller: CallerIdentity,
}

/// What a finished subagent run hands back to the `task` call.
#[derive(Debug, Clone)]
pub struct SubagentRun {
    pub final_text: String,
    pub stats: RunStats,
}

/// Launches nested runs for `task` calls.
#[async_trait]
pub trait SubagentLauncher: Send + Sync {
    async fn launch(
        &self,
        call_id: &str,
        subagent: &str,
        prompt: &str,
        frame: &CallFrame,
        events: &EventEmitter,
    ) -> Result<SubagentRun, ToolError>;
}

/// The result of one gateway call.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub result: ToolResult,
    /// Attempts beyond the first
    pub retries: u32,
    /// Set when the call ran a subagent
    pub subagent: Option<SubagentRun>,
}

/// Caller-side retry settings.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff * n`
    pub backoff: Duration,
    /// Per-attempt timeout for backends
    pub timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry.backoff_ms),
            timeout: config.tool_timeout_secs.map(Duration::from_secs),
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

/// Backends for the non-delegating tools. A missing backend makes its tool
/// fail with a non-retryable error.
#[derive(Clone, Default)]
pub struct ToolBackends {
    pub memory_search: Option<Arc<dyn ToolBackend>>,
    pub social_search: Option<Arc<dyn ToolBackend>>,
    pub app_integration: Option<Arc<dyn ToolBackend>>,
}

impl ToolBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_search(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.memory_search = Some(backend);
        self
    }

    pub fn with_social_search(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.social_search = Some(backend);
        self
    }

    pub fn with_app_integration(mut self, backend: Arc<dyn ToolBackend>) -> Self {
        self.app_integration = Some(backend);
        self
    }
}

pub struct ToolGateway {
    backends: ToolBackends,
    store: Arc<dyn ProgressStore>,
    retry: RetryPolicy,
    escalation_threshold: usize,
}

impl ToolGateway {
    pub fn new(backends: ToolBackends, store: Arc<dyn ProgressStore>) -> Self {
        Self {
            backends,
            store,
            retry: RetryPolicy::default(),
            escalation_threshold: AgentConfig::default().escalation_threshold,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Failed steps in one job before it is blocked.
    pub fn with_escalation_threshold(mut self, threshold: usize) -> Self {
        self.escalation_threshold = threshold.max(1);
        self
    }

    /// Retry, timeout and escalation settings from config.
    pub fn configured(self, config: &AgentConfig) -> Self {
        self.with_retry(RetryPolicy::from_config(config))
            .with_escalation_threshold(config.escalation_threshold)
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Execute one call. Always yields exactly one result for it.
    pub async fn execute(
        &self,
        call: &ToolCall,
        frame: &CallFrame,
        launcher: &dyn SubagentLauncher,
        events: &EventEmitter,
    ) -> ToolExecution {
        let step = Step::new(
            uuid::Uuid::new_v4().to_string(),
            &call.name,
            &call.id,
            frame.depth,
        );
        self.record(&frame.job_id, step.clone().running(0)).await;

        let (outcome, retries, subagent) = match self.validate(call, &frame.policy) {
            Ok(invocation) => self.dispatch(invocation, call, frame, launcher, events, &step).await,
            Err(e) => (Err(e), 0, None),
        };

        let execution = match outcome {
            Ok(payload) => {
                debug!(call_id = %call.id, tool = %call.name, retries, "Tool call succeeded");
                self.record(&frame.job_id, step.running(retries).completed(payload.clone()))
                    .await;
                ToolExecution {
                    result: ToolResult::success(call, payload),
                    retries,
                    subagent,
                }
            }
            Err(e) => {
                warn!(call_id = %call.id, tool = %call.name, retries, error = %e, "Tool call failed");
                self.record(&frame.job_id, step.running(retries).failed(e.to_string()))
                    .await;
                events.emit(AgentEvent::Error {
                    message: format!("{} failed: {e}", call.name),
                    recoverable: true,
                });
                self.check_escalation(&frame.job_id, events).await;
                ToolExecution {
                    result: ToolResult::failure(call, &e),
                    retries,
                    subagent: None,
                }
            }
        };

        events.emit(AgentEvent::ToolCallComplete {
            call_id: call.id.clone(),
            tool_name: call.name.clone(),
            success: execution.result.is_success(),
            output: execution.result.text(),
        });
        execution
    }

    fn validate(&self, call: &ToolCall, policy: &ToolPolicy) -> Result<ToolInvocation, ToolError> {
        let invocation = ToolInvocation::from_call(call)?;
        if !policy.allows(invocation.kind()) {
            return Err(ToolError::NotAllowed(call.name.clone()));
        }
        Ok(invocation)
    }

    async fn dispatch(
        &self,
        invocation: ToolInvocation,
        call: &ToolCall,
        frame: &CallFrame,
        launcher: &dyn SubagentLauncher,
        events: &EventEmitter,
        step: &Step,
    ) -> (Result<serde_json::Value, ToolError>, u32, Option<SubagentRun>) {
        let backend = match &invocation {
            ToolInvocation::Task { subagent, prompt } => {
                // Nested runs carry their own retry budget.
                return match launcher.launch(&call.id, subagent, prompt, frame, events).await {
                    Ok(run) => (Ok(json!(run.final_text)), 0, Some(run)),
                    Err(e) => (Err(e), 0, None),
                };
            }
            ToolInvocation::MemorySearch { .. } => &self.backends.memory_search,
            ToolInvocation::SocialSearch { .. } => &self.backends.social_search,
            ToolInvocation::AppIntegration { .. } => &self.backends.app_integration,
        };

        let Some(backend) = backend else {
            return (
                Err(ToolError::BackendUnavailable(call.name.clone())),
                0,
                None,
            );
        };

        // Backends get the validated payload, not the model's raw JSON.
        let arguments = invocation.arguments();
        let mut attempt = 1;
        loop {
            match self
                .attempt(backend.as_ref(), call, &arguments, &frame.caller)
                .await
            {
                Ok(payload) => return (Ok(payload), attempt - 1, None),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    if self.is_blocked(&frame.job_id).await {
                        debug!(job_id = %frame.job_id, call_id = %call.id, "Job is blocked; not retrying");
                        return (Err(e), attempt - 1, None);
                    }
                    let delay = self.retry.delay(attempt);
                    debug!(call_id = %call.id, attempt, ?delay, error = %e, "Retrying tool call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    self.record(&frame.job_id, step.clone().running(attempt - 1))
                        .await;
                }
                Err(e) => return (Err(e), attempt - 1, None),
            }
        }
    }

    async fn attempt(
        &self,
        backend: &dyn ToolBackend,
        call: &ToolCall,
        arguments: &serde_json::Value,
        caller: &CallerIdentity,
    ) -> Result<serde_json::Value, ToolError> {
        let invoke = backend.invoke(arguments, caller);
        match self.retry.timeout {
            Some(limit) => tokio::time::timeout(limit, invoke)
                .await
                .map_err(|_| ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: limit.as_secs(),
                })?,
            None => invoke.await,
        }
    }

    async fn record(&self, job_id: &str, step: Step) {
        if let Err(e) = self.store.record_step(job_id, step).await {
            warn!(job_id, error = %e, "Failed to record step");
        }
    }

    async fn is_blocked(&self, job_id: &str) -> bool {
        matches!(
            self.store.get_job(job_id).await,
            Ok(Some(job)) if job.status == JobStatus::Blocked
        )
    }

    /// Block the job once its failed steps reach the threshold. Only the
    /// transition emits the non-recoverable error.
    async fn check_escalation(&self, job_id: &str, events: &EventEmitter) {
        let failed = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job.failed_steps(),
            Ok(None) => return,
            Err(e) => {
                warn!(job_id, error = %e, "Could not read job for escalation check");
                return;
            }
        };
        if failed < self.escalation_threshold {
            return;
        }

        let reason = format!("{failed} failed tool steps");
        match self.store.block_job(job_id, &reason).await {
            Ok(true) => {
                info!(job_id, failed, "Escalating job after repeated tool failures");
                events.emit(AgentEvent::Error {
                    message: format!(
                        "Job {job_id} blocked after {failed} failed tool calls; needs follow-up"
                    ),
                    recoverable: false,
                });
            }
            Ok(false) => {}
            Err(e) => warn!(job_id, error = %e, "Failed to block job"),
        }
    }
}
