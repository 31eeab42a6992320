//! In-memory progress store for scratchpad jobs.
//!
//! Every mutation is a read-modify-write under one write lock, so parallel
//! step updates for the same job are applied without lost updates.

use async_trait::async_trait;
use chrono::Utc;
use skein_core::error::StoreError;
use skein_core::job::{Artifact, JobStatus, ProgressStore, ScratchpadJob, Step};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone, Default)]
pub struct InMemoryProgressStore {
    jobs: Arc<RwLock<HashMap<String, ScratchpadJob>>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn upsert_job(
        &self,
        job_id: &str,
        status: JobStatus,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) -> Result<ScratchpadJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .entry(job_id.to_string())
            .or_insert_with(|| ScratchpadJob::new(job_id));

        if job.status == JobStatus::Blocked && status != JobStatus::Blocked {
            debug!(job_id, requested = ?status, "Job is blocked; keeping status");
        } else {
            job.status = status;
        }
        job.metadata.extend(metadata);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn record_step(&self, job_id: &str, step: Step) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job_id.to_string())
            .or_insert_with(|| ScratchpadJob::new(job_id))
            .upsert_step(step);
        Ok(())
    }

    async fn append_artifact(&self, job_id: &str, artifact: Artifact) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        job.artifacts.push(artifact);
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ScratchpadJob>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn block_job(&self, job_id: &str, reason: &str) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if job.status == JobStatus::Blocked {
            return Ok(false);
        }
        job.status = JobStatus::Blocked;
        job.metadata
            .insert("blocked_reason".into(), serde_json::Value::String(reason.to_string()));
        job.updated_at = Utc::now();
        info!(job_id, reason, "Job escalated to blocked");
        Ok(true)
    }

    async fn resume_job(&self, job_id: &str) -> Result<ScratchpadJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        if job.status == JobStatus::Blocked {
            job.status = JobStatus::Running;
            job.metadata.remove("blocked_reason");
            job.updated_at = Utc::now();
            info!(job_id, "Blocked job resumed");
        }
        Ok(job.clone())
    }
}
