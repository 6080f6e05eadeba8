//! Main execution engine - runs stages in order and the jobs of a stage concurrently

use crate::{
    cache::CacheManager,
    core::{ExecutionStatus, JobState, Pipeline, RefContext},
    execution::{
        EnvironmentPreparer, ExecutionResult, ExecutionScheduler, JobExecutor, SchedulingStrategy,
    },
    publish::{target_for, PublishReport, PublishTarget},
    runner::{CommandOutput, CommandRunner},
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Reason recorded for jobs after a failed stage
pub const SKIPPED_AFTER_FAILURE: &str = "a previous stage failed";

/// Errors that stop the engine before or outside job execution
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline {0} has already been executed")]
    AlreadyExecuted(Uuid),

    #[error("Stage '{stage}' lists unknown job '{job}'")]
    UnknownJob { stage: String, job: String },
}

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
        refs: RefContext,
    },
    StageStarted {
        stage: String,
        jobs: Vec<String>,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    JobSkipped {
        job: String,
        reason: String,
    },
    JobStarted {
        job: String,
        stage: String,
    },
    JobOutput {
        job: String,
        command: String,
        output: CommandOutput,
    },
    JobSucceeded {
        job: String,
        artifacts: Vec<PathBuf>,
        publish: Option<PublishReport>,
    },
    JobFailed {
        job: String,
        error: String,
        allowed: bool,
    },
    StageCompleted {
        stage: String,
        success: bool,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to every registered handler
#[derive(Clone, Default)]
pub struct EventSink {
    handlers: Vec<EventHandler>,
}

impl EventSink {
    pub fn emit(&self, event: ExecutionEvent) {
        for handler in &self.handlers {
            handler(event.clone());
        }
    }
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    runner: Arc<R>,
    scheduler: ExecutionScheduler,
    cache: Option<CacheManager>,
    artifact_root: Option<PathBuf>,
    targets: HashMap<String, Arc<dyn PublishTarget>>,
    events: EventSink,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self {
            runner: Arc::new(runner),
            scheduler: ExecutionScheduler::new(strategy),
            cache: None,
            artifact_root: None,
            targets: HashMap::new(),
            events: EventSink::default(),
        }
    }

    /// Enable the keyed cache
    pub fn with_cache(mut self, cache: CacheManager) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Copy artifacts under `<root>/<execution_id>/<job>/`
    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = Some(root.into());
        self
    }

    /// Use `target` for the endpoint `name` instead of the one built from config
    pub fn with_publish_target(mut self, name: impl Into<String>, target: Arc<dyn PublishTarget>) -> Self {
        self.targets.insert(name.into(), target);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.events.handlers.push(Arc::new(handler));
    }

    /// Execute the entire pipeline for a ref
    ///
    /// Job failures do not produce an `Err`; they are recorded in job states
    /// and the pipeline status.
    pub async fn execute(&self, pipeline: &mut Pipeline, refs: &RefContext) -> Result<(), PipelineError> {
        let execution_id = pipeline.state.execution_id;
        if pipeline.state.status != ExecutionStatus::Pending {
            return Err(PipelineError::AlreadyExecuted(execution_id));
        }
        for stage in &pipeline.stages {
            if let Some(job) = stage.jobs.iter().find(|j| !pipeline.jobs.contains_key(*j)) {
                return Err(PipelineError::UnknownJob {
                    stage: stage.name.clone(),
                    job: job.clone(),
                });
            }
        }

        info!("Starting pipeline execution: {} ({}) on {}", pipeline.name, execution_id, refs);
        self.events.emit(ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline.name.clone(),
            refs: refs.clone(),
        });
        pipeline.state.start(pipeline.jobs.len());

        let executor = Arc::new(self.build_executor(pipeline));
        let stages = pipeline.stages.clone();
        let mut blocked = false;

        for stage in &stages {
            if blocked {
                self.skip_stage(pipeline, &stage.name, &stage.jobs, SKIPPED_AFTER_FAILURE);
                continue;
            }

            let plan = self.scheduler.plan_stage(pipeline, stage, refs);
            for (job, reason) in &plan.excluded {
                self.skip_job(pipeline, job, reason);
            }
            if plan.is_empty() {
                info!("No jobs of stage '{}' run for {}", stage.name, refs);
                self.events.emit(ExecutionEvent::StageSkipped {
                    stage: stage.name.clone(),
                    reason: format!("no jobs selected for {}", refs),
                });
                continue;
            }

            let success = self
                .run_stage(pipeline, refs, &stage.name, &plan.runnable, executor.clone())
                .await;
            self.events.emit(ExecutionEvent::StageCompleted {
                stage: stage.name.clone(),
                success,
            });
            if !success {
                warn!("Stage '{}' failed; later stages will not run", stage.name);
                blocked = true;
            }
        }

        pipeline.update_counts();
        let status = if pipeline.has_failed() {
            pipeline.state.fail();
            ExecutionStatus::Failed
        } else {
            pipeline.state.complete();
            ExecutionStatus::Completed
        };

        info!("Pipeline execution finished: {} - {:?}", pipeline.name, status);
        self.events.emit(ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });
        Ok(())
    }

    fn build_executor(&self, pipeline: &Pipeline) -> JobExecutor<Arc<R>> {
        let mut targets: HashMap<String, Arc<dyn PublishTarget>> = pipeline
            .endpoints
            .iter()
            .map(|(name, endpoint)| (name.clone(), target_for(name, endpoint)))
            .collect();
        targets.extend(self.targets.iter().map(|(k, v)| (k.clone(), v.clone())));

        JobExecutor::new(self.runner.clone())
            .with_preparer(EnvironmentPreparer::new(pipeline.before_script.clone()))
            .with_cache(self.cache.clone())
            .with_targets(targets)
            .with_artifact_root(self.artifact_root.clone())
    }

    /// Run the selected jobs of one stage; returns false if a blocking job failed
    async fn run_stage(
        &self,
        pipeline: &mut Pipeline,
        refs: &RefContext,
        stage: &str,
        jobs: &[String],
        executor: Arc<JobExecutor<Arc<R>>>,
    ) -> bool {
        info!("Starting stage '{}' ({} jobs)", stage, jobs.len());
        self.events.emit(ExecutionEvent::StageStarted {
            stage: stage.to_string(),
            jobs: jobs.to_vec(),
        });

        let context = Arc::new(pipeline.create_context(refs));
        let semaphore = Arc::new(Semaphore::new(self.scheduler.concurrency(jobs.len())));
        let mut tasks = JoinSet::new();

        for name in jobs {
            let Some(job) = pipeline.job_mut(name) else {
                continue;
            };
            // Acquire before spawning so jobs start in definition order
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let started_at = Utc::now();
            job.state = JobState::Running { started_at };
            let job = job.clone();

            self.events.emit(ExecutionEvent::JobStarted {
                job: job.name.clone(),
                stage: stage.to_string(),
            });

            let executor = executor.clone();
            let context = context.clone();
            let events = self.events.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let job_name = job.name.clone();
                let on_output = |command: &str, output: &CommandOutput| {
                    events.emit(ExecutionEvent::JobOutput {
                        job: job_name.clone(),
                        command: command.to_string(),
                        output: output.clone(),
                    });
                };
                let result = executor.execute(&job, &context, &on_output).await;
                (job.name, started_at, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, started_at, result)) => self.record_result(pipeline, &name, started_at, result),
                Err(e) => error!("Job task in stage '{}' ended abnormally: {}", stage, e),
            }
        }

        // A task that panicked never reported back
        for name in jobs {
            if let Some(job) = pipeline.job_mut(name) {
                if let JobState::Running { started_at } = job.state {
                    let error = "job task ended without a result".to_string();
                    job.state = JobState::Failed {
                        error: error.clone(),
                        allowed: job.allow_failure,
                        started_at,
                        failed_at: Utc::now(),
                    };
                    self.events.emit(ExecutionEvent::JobFailed {
                        job: name.clone(),
                        error,
                        allowed: job.allow_failure,
                    });
                }
            }
        }

        pipeline.update_counts();
        !jobs.iter().any(|name| {
            pipeline
                .job(name)
                .is_some_and(|job| job.state.is_blocking_failure())
        })
    }

    fn record_result(
        &self,
        pipeline: &mut Pipeline,
        name: &str,
        started_at: chrono::DateTime<Utc>,
        result: ExecutionResult,
    ) {
        let Some(job) = pipeline.job_mut(name) else {
            return;
        };

        match result {
            ExecutionResult::Success { artifacts, publish } => {
                job.state = JobState::Succeeded {
                    started_at,
                    finished_at: Utc::now(),
                    artifacts: artifacts.clone(),
                };
                self.events.emit(ExecutionEvent::JobSucceeded {
                    job: name.to_string(),
                    artifacts,
                    publish,
                });
            }
            ExecutionResult::Failed { failure } => {
                let allowed = job.allow_failure;
                if allowed {
                    warn!("Job {} failed but is allowed to fail: {}", name, failure);
                }
                job.state = JobState::Failed {
                    error: failure.to_string(),
                    allowed,
                    started_at,
                    failed_at: Utc::now(),
                };
                self.events.emit(ExecutionEvent::JobFailed {
                    job: name.to_string(),
                    error: failure.to_string(),
                    allowed,
                });
            }
        }
    }

    fn skip_job(&self, pipeline: &mut Pipeline, name: &str, reason: &str) {
        if let Some(job) = pipeline.job_mut(name) {
            info!("Skipping job {}: {}", name, reason);
            job.state = JobState::Skipped {
                reason: reason.to_string(),
            };
            self.events.emit(ExecutionEvent::JobSkipped {
                job: name.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    fn skip_stage(&self, pipeline: &mut Pipeline, stage: &str, jobs: &[String], reason: &str) {
        for name in jobs {
            self.skip_job(pipeline, name, reason);
        }
        self.events.emit(ExecutionEvent::StageSkipped {
            stage: stage.to_string(),
            reason: reason.to_string(),
        });
    }
}
