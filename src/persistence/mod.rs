//! Persistence layer for pipeline execution history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::{JobState, Pipeline, RefContext};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final outcome of one job in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub name: String,
    pub stage: String,

    /// `succeeded`, `failed`, `allowed-failure`, `skipped` or `pending`
    pub outcome: String,

    /// Failure message or skip reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Summary of a pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Pipeline name
    pub pipeline_name: String,

    /// Branch or tag the run was for
    pub ref_name: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    pub succeeded_jobs: usize,
    pub failed_jobs: usize,
    pub skipped_jobs: usize,
    pub total_jobs: usize,

    /// Per-job outcomes in stage order
    #[serde(default)]
    pub jobs: Vec<JobRecord>,
}

impl ExecutionSummary {
    /// Fraction of jobs that reached a terminal state
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 1.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.skipped_jobs) as f64 / self.total_jobs as f64
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a pipeline execution
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load an execution by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// List all executions for a pipeline, newest first
    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>>;

    /// Most recent execution of a pipeline
    async fn latest_execution(&self, pipeline_name: &str) -> Result<Option<ExecutionSummary>> {
        Ok(self.list_executions(pipeline_name).await?.into_iter().next())
    }

    /// Remove an execution
    async fn delete_execution(&self, execution_id: Uuid) -> Result<()>;

    /// List all pipeline names
    async fn list_pipelines(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: tokio::sync::RwLock<std::collections::HashMap<Uuid, ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.insert(execution.execution_id, execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.get(&execution_id).cloned())
    }

    async fn list_executions(&self, pipeline_name: &str) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .values()
            .filter(|e| e.pipeline_name == pipeline_name)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn delete_execution(&self, execution_id: Uuid) -> Result<()> {
        self.executions.write().await.remove(&execution_id);
        Ok(())
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.values().map(|e| e.pipeline_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// Create a summary from a pipeline run
pub fn create_summary(pipeline: &Pipeline, refs: &RefContext) -> ExecutionSummary {
    let jobs = pipeline
        .stages
        .iter()
        .flat_map(|stage| stage.jobs.iter())
        .filter_map(|name| pipeline.job(name))
        .map(|job| {
            let (outcome, detail) = match &job.state {
                JobState::Pending | JobState::Running { .. } => ("pending", None),
                JobState::Succeeded { .. } => ("succeeded", None),
                JobState::Failed { error, allowed: true, .. } => {
                    ("allowed-failure", Some(error.clone()))
                }
                JobState::Failed { error, .. } => ("failed", Some(error.clone())),
                JobState::Skipped { reason } => ("skipped", Some(reason.clone())),
            };
            JobRecord {
                name: job.name.clone(),
                stage: job.stage.clone(),
                outcome: outcome.to_string(),
                detail,
            }
        })
        .collect();

    ExecutionSummary {
        execution_id: pipeline.state.execution_id,
        pipeline_name: pipeline.name.clone(),
        ref_name: refs.name.clone(),
        status: pipeline.state.status,
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        succeeded_jobs: pipeline.state.succeeded_jobs,
        failed_jobs: pipeline.state.failed_jobs,
        skipped_jobs: pipeline.state.skipped_jobs,
        total_jobs: pipeline.state.total_jobs,
        jobs,
    }
}

#[cfg(test)]
pub(crate) fn sample_summary(pipeline: &str, status: ExecutionStatus) -> ExecutionSummary {
    ExecutionSummary {
        execution_id: Uuid::new_v4(),
        pipeline_name: pipeline.to_string(),
        ref_name: "master".to_string(),
        status,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
        succeeded_jobs: 2,
        failed_jobs: 1,
        skipped_jobs: 1,
        total_jobs: 4,
        jobs: vec![JobRecord {
            name: "unittest".to_string(),
            stage: "test".to_string(),
            outcome: "failed".to_string(),
            detail: Some("script command `pytest` exited with code 1".to_string()),
        }],
    }
}
