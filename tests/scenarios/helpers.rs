//! Test utility functions for stagehand scenarios

use async_trait::async_trait;
use stagehand::core::config::PipelineConfig;
use stagehand::core::{ExecutionStatus, JobState, Pipeline, RefContext};
use stagehand::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use stagehand::runner::{CommandOutput, CommandRunner, RunnerError, ShellCommand};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One command the mock runner saw
#[derive(Debug, Clone)]
pub struct RecordedCommand {
    pub job: String,
    pub line: String,
    pub env: HashMap<String, String>,
    /// Logical clock tick when the command started
    pub started: usize,
    /// Logical clock tick when the command finished
    pub finished: usize,
}

/// Mock runner with scripted exit codes and delays per command line
///
/// Clones share their log, so a test can keep a handle after giving the
/// runner to the engine.
#[derive(Clone, Default)]
pub struct MockRunner {
    exit_codes: Arc<HashMap<String, i32>>,
    delays: Arc<HashMap<String, Duration>>,
    log: Arc<Mutex<Vec<RecordedCommand>>>,
    clock: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `line` exit with `code`
    pub fn fail(mut self, line: &str, code: i32) -> Self {
        Arc::make_mut(&mut self.exit_codes).insert(line.to_string(), code);
        self
    }

    /// Make `line` take `millis` to finish
    pub fn delay(mut self, line: &str, millis: u64) -> Self {
        Arc::make_mut(&mut self.delays).insert(line.to_string(), Duration::from_millis(millis));
        self
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.log.lock().unwrap().clone()
    }

    /// Highest number of commands that were running at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, command: &ShellCommand) -> Result<CommandOutput, RunnerError> {
        let started = self.clock.fetch_add(1, Ordering::SeqCst);
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(&command.line) {
            tokio::time::sleep(*delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        let finished = self.clock.fetch_add(1, Ordering::SeqCst);

        let env: HashMap<String, String> = command.env.iter().cloned().collect();
        self.log.lock().unwrap().push(RecordedCommand {
            job: env.get("CI_JOB_NAME").cloned().unwrap_or_default(),
            line: command.line.clone(),
            env,
            started,
            finished,
        });

        match self.exit_codes.get(&command.line) {
            Some(&code) => Ok(CommandOutput::failed(code, format!("{} failed", command.line))),
            None => Ok(CommandOutput::ok(format!("ran {}", command.line))),
        }
    }
}

/// Everything a scenario may want to inspect after a run
pub struct PipelineTestResult {
    pub pipeline: Pipeline,
    pub events: Vec<ExecutionEvent>,
    pub commands: Vec<RecordedCommand>,
}

impl PipelineTestResult {
    pub fn is_success(&self) -> bool {
        self.pipeline.state.status == ExecutionStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.pipeline.state.status == ExecutionStatus::Failed
    }

    pub fn job_state(&self, job: &str) -> &JobState {
        &self
            .pipeline
            .job(job)
            .unwrap_or_else(|| panic!("no job named {}", job))
            .state
    }

    /// Command lines run on behalf of `job`, in order
    pub fn commands_of(&self, job: &str) -> Vec<String> {
        self.commands
            .iter()
            .filter(|c| c.job == job)
            .map(|c| c.line.clone())
            .collect()
    }

    pub fn ran(&self, job: &str) -> bool {
        self.commands.iter().any(|c| c.job == job)
    }

    /// Environment of the first command of `job`
    pub fn env_of(&self, job: &str) -> HashMap<String, String> {
        self.commands
            .iter()
            .find(|c| c.job == job)
            .map(|c| c.env.clone())
            .unwrap_or_default()
    }

    /// (first start, last finish) clock ticks over the commands of `jobs`
    pub fn span_of(&self, jobs: &[&str]) -> Option<(usize, usize)> {
        let commands: Vec<&RecordedCommand> = self
            .commands
            .iter()
            .filter(|c| jobs.contains(&c.job.as_str()))
            .collect();
        let start = commands.iter().map(|c| c.started).min()?;
        let end = commands.iter().map(|c| c.finished).max()?;
        Some((start, end))
    }
}

pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .expect("valid pipeline")
        .to_pipeline()
        .expect("valid selectors")
}

/// Run a pipeline with the mock runner and the default (parallel) strategy
pub async fn run_pipeline(yaml: &str, refs: RefContext, runner: &MockRunner) -> PipelineTestResult {
    run_with(
        pipeline_from_yaml(yaml),
        refs,
        runner,
        SchedulingStrategy::Parallel,
        |engine| engine,
    )
    .await
}

/// Run a pipeline with full control over strategy and engine setup
pub async fn run_with<F>(
    mut pipeline: Pipeline,
    refs: RefContext,
    runner: &MockRunner,
    strategy: SchedulingStrategy,
    configure: F,
) -> PipelineTestResult
where
    F: FnOnce(ExecutionEngine<MockRunner>) -> ExecutionEngine<MockRunner>,
{
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut engine = configure(ExecutionEngine::new(runner.clone(), strategy));
    let sink = events.clone();
    engine.add_event_handler(move |event| sink.lock().unwrap().push(event));

    engine
        .execute(&mut pipeline, &refs)
        .await
        .expect("engine error");

    let events = events.lock().unwrap().clone();
    PipelineTestResult {
        pipeline,
        events,
        commands: runner.commands(),
    }
}

pub fn assert_job_succeeded(result: &PipelineTestResult, job: &str) {
    assert!(
        matches!(result.job_state(job), JobState::Succeeded { .. }),
        "expected {} to succeed, got {:?}",
        job,
        result.job_state(job)
    );
}

pub fn assert_job_failed(result: &PipelineTestResult, job: &str, error_contains: &str) {
    match result.job_state(job) {
        JobState::Failed { error, .. } => assert!(
            error.contains(error_contains),
            "expected {} error to contain '{}', got '{}'",
            job,
            error_contains,
            error
        ),
        other => panic!("expected {} to fail, got {:?}", job, other),
    }
}

pub fn assert_job_skipped(result: &PipelineTestResult, job: &str) {
    assert!(
        matches!(result.job_state(job), JobState::Skipped { .. }),
        "expected {} to be skipped, got {:?}",
        job,
        result.job_state(job)
    );
    assert!(!result.ran(job), "skipped job {} ran commands", job);
}

/// The Python library pipeline used across scenarios
pub const LIBRARY_PIPELINE: &str = r#"
name: lightnet
project: lightnet
image: python:3.6
variables:
  PIP_CACHE_DIR: "$CI_PROJECT_DIR/.cache"
cache:
  paths:
    - .cache/
before_script:
  - python -V
  - pip install -r requirements.txt
stages:
  - test
  - deploy
lint:
  stage: test
  script:
    - pycodestyle lightnet
unittest:
  stage: test
  only: [tags, master, develop]
  script:
    - python -m pytest tests
doctest:
  stage: test
  only: [tags, master, develop]
  script:
    - make -C docs doctest
pypi:
  stage: deploy
  only: [tags]
  script:
    - python setup.py sdist bdist_wheel
    - twine upload --skip-existing dist/*
"#;
