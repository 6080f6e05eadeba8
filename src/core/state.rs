//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every included job succeeded (or was allowed to fail)
    Completed,
    /// At least one blocking job failed
    Failed,
}

/// State of a single job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobState {
    /// Job has not been scheduled yet
    Pending,
    /// Job is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Every command exited 0
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        /// Artifact files kept for this job
        artifacts: Vec<PathBuf>,
    },
    /// A command failed, the job timed out, or publishing failed
    Failed {
        error: String,
        /// `allow_failure` was set, so the stage was not blocked
        allowed: bool,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Job never ran (excluded by `only`/`except`, or an earlier stage failed)
    Skipped {
        reason: String,
    },
}

impl JobState {
    /// Check if job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. } | JobState::Failed { .. } | JobState::Skipped { .. }
        )
    }

    /// Failed and not allowed to fail
    pub fn is_blocking_failure(&self) -> bool {
        matches!(self, JobState::Failed { allowed: false, .. })
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of jobs defined
    pub total_jobs: usize,

    /// Number of succeeded jobs
    pub succeeded_jobs: usize,

    /// Number of failed jobs (allowed failures included)
    pub failed_jobs: usize,

    /// Number of skipped jobs
    pub skipped_jobs: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_jobs: 0,
            succeeded_jobs: 0,
            failed_jobs: 0,
            skipped_jobs: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_jobs: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_jobs = total_jobs;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Recount jobs from their states
    pub fn update_counts<'a>(&mut self, states: impl Iterator<Item = &'a JobState>) {
        let (mut succeeded, mut failed, mut skipped) = (0, 0, 0);
        for state in states {
            match state {
                JobState::Succeeded { .. } => succeeded += 1,
                JobState::Failed { .. } => failed += 1,
                JobState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }
        self.succeeded_jobs = succeeded;
        self.failed_jobs = failed;
        self.skipped_jobs = skipped;
    }

    /// Calculate progress percentage (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_jobs == 0 {
            return 0.0;
        }
        (self.succeeded_jobs + self.failed_jobs + self.skipped_jobs) as f64 / self.total_jobs as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
