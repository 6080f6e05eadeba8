//! Execution scheduler - decides which jobs of a stage run and how many at once

use crate::core::{Pipeline, RefContext, Stage};

/// Strategy for running the jobs of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One job at a time, in definition order
    Sequential,

    /// All jobs of the stage at once
    #[default]
    Parallel,

    /// At most N jobs at once
    LimitedParallel(usize),
}

/// The jobs of a stage split by the selector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePlan {
    /// Jobs to run, in definition order
    pub runnable: Vec<String>,

    /// Jobs excluded for this ref, with the reason
    pub excluded: Vec<(String, String)>,
}

impl StagePlan {
    pub fn is_empty(&self) -> bool {
        self.runnable.is_empty()
    }
}

/// Scheduler for determining which jobs to run
#[derive(Debug, Clone, Default)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Split a stage's pending jobs into runnable and excluded
    pub fn plan_stage(&self, pipeline: &Pipeline, stage: &Stage, refs: &RefContext) -> StagePlan {
        let mut plan = StagePlan::default();
        for job in pipeline.stage_jobs(stage) {
            match job.selector.exclusion_reason(refs) {
                None => plan.runnable.push(job.name.clone()),
                Some(reason) => plan.excluded.push((job.name.clone(), reason)),
            }
        }
        plan
    }

    /// How many of `job_count` jobs may run at once (never 0)
    pub fn concurrency(&self, job_count: usize) -> usize {
        let limit = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => job_count,
            SchedulingStrategy::LimitedParallel(max) => max.min(job_count),
        };
        limit.max(1)
    }
}
