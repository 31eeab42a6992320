//! Scratchpad jobs: the durable record of one orchestration run.
//!
//! A job collects the steps (one per tool call) and artifacts a run
//! produces. Nested subagent runs share their parent's job and add their
//! own steps to it. Steps are upserted by id, so parallel tool calls never
//! clobber each other's records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    /// Escalated after repeated tool failures. Only an explicit resume
    /// moves a job out of this state.
    Blocked,
}

/// Lifecycle of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One recorded unit of work (a tool call or subagent delegation).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub tool_name: String,
    pub call_id: String,
    /// Recursion depth of the run that issued the call
    pub depth: u32,
    pub status: StepStatus,
    /// Attempts beyond the first
    #[serde(default)]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        depth: u32,
    ) -> Self {
        Self {
            id: id.into(),
            tool_name: tool_name.into(),
            call_id: call_id.into(),
            depth,
            status: StepStatus::Pending,
            retries: 0,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn running(mut self, retries: u32) -> Self {
        self.status = StepStatus::Running;
        self.retries = retries;
        self
    }

    pub fn completed(mut self, result: serde_json::Value) -> Self {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
        self
    }
}

/// Something a run produced that outlives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: String,
    pub name: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScratchpadJob {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScratchpadJob {
    pub fn new(job_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            status: JobStatus::Running,
            steps: Vec::new(),
            artifacts: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of steps that ended in failure. Never decreases: a later
    /// success does not cancel an earlier failure.
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .count()
    }

    /// Insert or replace a step by id.
    pub fn upsert_step(&mut self, step: Step) {
        match self.steps.iter_mut().find(|s| s.id == step.id) {
            Some(existing) => *existing = step,
            None => self.steps.push(step),
        }
        self.updated_at = Utc::now();
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// Persistence for scratchpad jobs.
///
/// Implementations must apply concurrent step writes for the same job
/// without losing any of them.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Create the job or update its status and merge metadata.
    ///
    /// A `Blocked` job keeps its status; use [`ProgressStore::resume_job`].
    async fn upsert_job(
        &self,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ScratchpadJob, StoreError>;

    /// Insert or replace a step by id. Creates the job if needed.
    async fn record_step(&self, job_id: &str, step: Step) -> Result<(), StoreError>;

    async fn append_artifact(&self, job_id: &str, artifact: Artifact) -> Result<(), StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<ScratchpadJob>, StoreError>;

    /// Move a job to `Blocked`. Returns `true` only for the call that
    /// performed the transition.
    async fn block_job(&self, job_id: &str, reason: &str) -> Result<bool, StoreError>;

    /// Explicit external resumption of a blocked job.
    async fn resume_job(&self, job_id: &str) -> Result<ScratchpadJob, StoreError>;
}
