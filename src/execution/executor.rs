//! Job executor - runs a single job's setup, script, cache and publish phases

use crate::{
    cache::{CacheManager, CacheRestore},
    core::{expand_variables, Job, PipelineContext},
    execution::artifacts::{self, ArtifactError},
    publish::{ArtifactPublisher, PublishError, PublishReport, PublishTarget},
    runner::{CommandOutput, CommandRunner, RunnerError, ShellScript},
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Why a job failed
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("before_script command `{command}` exited with code {code}")]
    SetupFailed { command: String, code: i32 },

    #[error("script command `{command}` exited with code {code}")]
    ScriptFailed { command: String, code: i32 },

    #[error(transparent)]
    Spawn(#[from] RunnerError),

    #[error("Timeout after {0} seconds")]
    TimedOut(u64),

    #[error("Publishing to '{endpoint}' failed: {source}")]
    PublishFailed {
        endpoint: String,
        #[source]
        source: PublishError,
    },

    #[error("Collecting artifacts failed: {0}")]
    Artifacts(#[from] ArtifactError),
}

/// Result of executing a job
#[derive(Debug)]
pub enum ExecutionResult {
    /// Every command exited 0 and any publish step succeeded
    Success {
        artifacts: Vec<PathBuf>,
        publish: Option<PublishReport>,
    },
    /// The job failed
    Failed { failure: JobFailure },
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }
}

/// Receives each finished command: (command line, output)
pub type OutputHandler<'a> = &'a (dyn Fn(&str, &CommandOutput) + Send + Sync);

/// Runs the fixed `before_script` ahead of every job
#[derive(Debug, Clone, Default)]
pub struct EnvironmentPreparer {
    before_script: Vec<String>,
}

impl EnvironmentPreparer {
    pub fn new(before_script: Vec<String>) -> Self {
        Self { before_script }
    }

    /// The job's shell session: setup lines, then the job's own script
    pub fn script(
        &self,
        job_script: &[String],
        context: &PipelineContext,
        env: &[(String, String)],
    ) -> ShellScript {
        ShellScript {
            lines: self.before_script.iter().chain(job_script).cloned().collect(),
            working_dir: context.project_dir.clone(),
            env: env.to_vec(),
        }
    }

    /// Classify the failure of line `index` of a script built by [`Self::script`]
    pub fn failure(&self, script: &ShellScript, index: usize, code: i32) -> JobFailure {
        let command = script.lines.get(index).cloned().unwrap_or_default();
        if index < self.before_script.len() {
            JobFailure::SetupFailed { command, code }
        } else {
            JobFailure::ScriptFailed { command, code }
        }
    }
}

/// Executes a single job
pub struct JobExecutor<R> {
    runner: R,
    preparer: EnvironmentPreparer,
    cache: Option<CacheManager>,
    targets: HashMap<String, Arc<dyn PublishTarget>>,
    artifact_root: Option<PathBuf>,
}

impl<R: CommandRunner> JobExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            preparer: EnvironmentPreparer::default(),
            cache: None,
            targets: HashMap::new(),
            artifact_root: None,
        }
    }

    pub fn with_preparer(mut self, preparer: EnvironmentPreparer) -> Self {
        self.preparer = preparer;
        self
    }

    pub fn with_cache(mut self, cache: Option<CacheManager>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_targets(mut self, targets: HashMap<String, Arc<dyn PublishTarget>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_artifact_root(mut self, root: Option<PathBuf>) -> Self {
        self.artifact_root = root;
        self
    }

    /// Execute a job and return the result
    ///
    /// Order: cache restore, before_script, script (under the job timeout),
    /// cache save, artifact collection, publish.
    pub async fn execute(
        &self,
        job: &Job,
        context: &PipelineContext,
        on_output: OutputHandler<'_>,
    ) -> ExecutionResult {
        info!("Executing job: {}", job.name);

        let env = context.job_variables(&job.name, &job.stage, &job.variables);
        let lookup: HashMap<String, String> = env.iter().cloned().collect();
        let cache_key = job
            .cache
            .as_ref()
            .map(|cache| expand_variables(cache.key_template(), &lookup));

        if let (Some(cache), Some(manager), Some(key)) = (&job.cache, &self.cache, &cache_key) {
            if cache.policy.restores() {
                match manager.restore(key, &cache.paths, &context.project_dir).await {
                    Ok(CacheRestore::Hit { files }) => {
                        debug!("Job {} restored {} files from cache '{}'", job.name, files, key)
                    }
                    Ok(CacheRestore::Miss) => debug!("Job {} had no cache for '{}'", job.name, key),
                    Err(e) => warn!("Cache restore for job {} failed: {}", job.name, e),
                }
            }
        }

        let outcome = match timeout(
            Duration::from_secs(job.timeout_secs),
            self.run_commands(job, context, &env, on_output),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!("Timeout for job {} after {}s", job.name, job.timeout_secs);
                Err(JobFailure::TimedOut(job.timeout_secs))
            }
        };

        if let (Some(cache), Some(manager), Some(key)) = (&job.cache, &self.cache, &cache_key) {
            if cache.policy.saves() && cache.when.applies(outcome.is_ok()) {
                if let Err(e) = manager.save(key, &cache.paths, &context.project_dir).await {
                    warn!("Cache save for job {} failed: {}", job.name, e);
                }
            }
        }

        if let Err(failure) = outcome {
            error!("Job {} failed: {}", job.name, failure);
            return ExecutionResult::Failed { failure };
        }

        let artifacts = match self.collect_artifacts(job, context).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                return ExecutionResult::Failed {
                    failure: JobFailure::Artifacts(e),
                }
            }
        };

        let publish = match self.publish(job, context).await {
            Ok(report) => report,
            Err(failure) => {
                error!("Job {} failed: {}", job.name, failure);
                return ExecutionResult::Failed { failure };
            }
        };

        info!("Job {} succeeded", job.name);
        ExecutionResult::Success { artifacts, publish }
    }

    async fn run_commands(
        &self,
        job: &Job,
        context: &PipelineContext,
        env: &[(String, String)],
        on_output: OutputHandler<'_>,
    ) -> Result<(), JobFailure> {
        let script = self.preparer.script(&job.script, context, env);
        for line in &script.lines {
            debug!("$ {}", line);
        }

        let output = self.runner.run_script(&script).await?;
        for (line, result) in script.lines.iter().zip(&output.lines) {
            on_output(line, result);
        }

        match output.failure() {
            Some((index, result)) => Err(self.preparer.failure(&script, index, result.exit_code)),
            None => Ok(()),
        }
    }

    async fn collect_artifacts(
        &self,
        job: &Job,
        context: &PipelineContext,
    ) -> Result<Vec<PathBuf>, ArtifactError> {
        if job.artifacts.is_empty() {
            return Ok(Vec::new());
        }

        let matches = artifacts::resolve_patterns(&context.project_dir, &job.artifacts)?;
        match &self.artifact_root {
            Some(root) => {
                let dest = root
                    .join(context.execution_id.to_string())
                    .join(&job.name);
                artifacts::collect(&context.project_dir, &matches, &dest).await
            }
            None => Ok(matches),
        }
    }

    async fn publish(
        &self,
        job: &Job,
        context: &PipelineContext,
    ) -> Result<Option<PublishReport>, JobFailure> {
        let Some(publish) = &job.publish else {
            return Ok(None);
        };

        let failed = |source: PublishError| JobFailure::PublishFailed {
            endpoint: publish.endpoint.clone(),
            source,
        };

        let target = self
            .targets
            .get(&publish.endpoint)
            .cloned()
            .ok_or_else(|| failed(PublishError::Transport("endpoint not configured".to_string())))?;

        let files = artifacts::resolve_patterns(&context.project_dir, &publish.paths)
            .map_err(|e| failed(PublishError::Transport(e.to_string())))?;

        let report = ArtifactPublisher::new(target, publish.skip_existing)
            .publish(&files)
            .await
            .map_err(failed)?;

        info!(
            "Job {} published {} artifacts to {} ({} skipped)",
            job.name,
            report.uploaded.len(),
            report.endpoint,
            report.skipped.len()
        );
        Ok(Some(report))
    }
}
