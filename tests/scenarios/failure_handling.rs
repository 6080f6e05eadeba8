//! Test: Failure Handling - first failing command ends the job, failed stages block later ones

use crate::helpers::*;
use stagehand::core::{JobState, RefContext};
use stagehand::execution::SchedulingStrategy;

/// The first non-zero exit fails the job and nothing after it runs
#[tokio::test]
async fn test_failing_command_stops_job() {
    let runner = MockRunner::new().fail("python -m pytest tests", 1);
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::tag("v1.0"), &runner).await;

    assert!(result.is_failed());
    assert_job_failed(&result, "unittest", "python -m pytest tests");
    assert_eq!(result.commands_of("unittest").last().unwrap(), "python -m pytest tests");

    // Sibling jobs of the stage still ran to completion
    assert_job_succeeded(&result, "lint");
    assert_job_succeeded(&result, "doctest");

    // The deploy stage never ran
    assert_job_skipped(&result, "pypi");
}

/// A script with several lines stops at the failing one
#[tokio::test]
async fn test_no_command_after_failure() {
    let yaml = r#"
build:
  script: ["step one", "step two", "step three"]
"#;
    let runner = MockRunner::new().fail("step two", 2);
    let result = run_pipeline(yaml, RefContext::branch("master"), &runner).await;

    assert_eq!(result.commands_of("build"), vec!["step one", "step two"]);
    assert_job_failed(&result, "build", "exited with code 2");
}

/// A failing before_script aborts the job before its script
#[tokio::test]
async fn test_setup_failure() {
    let runner = MockRunner::new().fail("pip install -r requirements.txt", 1);
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::branch("feature/x"), &runner).await;

    assert!(result.is_failed());
    assert_job_failed(&result, "lint", "before_script");
    assert_eq!(
        result.commands_of("lint"),
        vec!["python -V", "pip install -r requirements.txt"]
    );
}

/// allow_failure jobs fail without blocking the next stage
#[tokio::test]
async fn test_allow_failure() {
    let yaml = r#"
stages: [test, deploy]
flaky:
  stage: test
  allow_failure: true
  script: ["flaky test"]
publish:
  stage: deploy
  script: ["publish"]
"#;
    let runner = MockRunner::new().fail("flaky test", 1);
    let result = run_pipeline(yaml, RefContext::branch("master"), &runner).await;

    assert!(result.is_success());
    assert!(matches!(
        result.job_state("flaky"),
        JobState::Failed { allowed: true, .. }
    ));
    assert_job_succeeded(&result, "publish");
}

/// Jobs that exceed their timeout fail
#[tokio::test]
async fn test_timeout() {
    let yaml = r#"
stages: [test, deploy]
hang:
  stage: test
  timeout: 1
  script: ["sleep forever"]
release:
  stage: deploy
  script: ["release"]
"#;
    let runner = MockRunner::new().delay("sleep forever", 3_000);
    let result = run_with(
        pipeline_from_yaml(yaml),
        RefContext::branch("master"),
        &runner,
        SchedulingStrategy::Parallel,
        |engine| engine,
    )
    .await;

    assert!(result.is_failed());
    assert_job_failed(&result, "hang", "Timeout");
    assert_job_skipped(&result, "release");
}

/// Counts line up with job states
#[tokio::test]
async fn test_state_counts() {
    let runner = MockRunner::new().fail("python -m pytest tests", 1);
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::tag("v1.0"), &runner).await;

    let state = &result.pipeline.state;
    assert_eq!(state.total_jobs, 4);
    assert_eq!(state.succeeded_jobs, 2);
    assert_eq!(state.failed_jobs, 1);
    assert_eq!(state.skipped_jobs, 1);
    assert!(state.completed_at.is_some());
}
