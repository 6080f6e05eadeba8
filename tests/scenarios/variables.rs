//! Test: Variables - each job gets a fresh, fully expanded environment

use crate::helpers::*;
use stagehand::core::RefContext;
use stagehand::execution::SchedulingStrategy;

/// Predefined CI variables and expanded pipeline variables reach the job
#[tokio::test]
async fn test_predefined_and_pipeline_variables() {
    let runner = MockRunner::new();
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::branch("master"), &runner).await;

    let env = result.env_of("unittest");
    assert_eq!(env["CI"], "true");
    assert_eq!(env["CI_PROJECT_NAME"], "lightnet");
    assert_eq!(env["CI_COMMIT_REF_NAME"], "master");
    assert_eq!(env["CI_COMMIT_BRANCH"], "master");
    assert_eq!(env["CI_JOB_NAME"], "unittest");
    assert_eq!(env["CI_JOB_STAGE"], "test");
    assert_eq!(env["CI_JOB_IMAGE"], "python:3.6");
    assert_eq!(env["PIP_CACHE_DIR"], format!("{}/.cache", env["CI_PROJECT_DIR"]));
    assert!(!env.contains_key("CI_COMMIT_TAG"));
}

/// Job variables override pipeline ones for that job only
#[tokio::test]
async fn test_job_variables_do_not_leak() {
    let yaml = r#"
variables:
  MODE: release
  TARGET: "out/$MODE"
stages: [build, test]
debug-build:
  stage: build
  variables:
    MODE: debug
  script: ["build"]
check:
  stage: test
  script: ["check"]
"#;
    let runner = MockRunner::new();
    let result = run_with(
        pipeline_from_yaml(yaml),
        RefContext::branch("master"),
        &runner,
        SchedulingStrategy::Sequential,
        |engine| engine,
    )
    .await;

    let build = result.env_of("debug-build");
    assert_eq!(build["MODE"], "debug");
    // Pipeline variables are expanded before job overrides apply
    assert_eq!(build["TARGET"], "out/release");

    let check = result.env_of("check");
    assert_eq!(check["MODE"], "release");
    assert_eq!(check["TARGET"], "out/release");
}

/// Run overrides (as `--variable` sets them) win over the file
#[tokio::test]
async fn test_variable_override() {
    let mut pipeline = pipeline_from_yaml(LIBRARY_PIPELINE);
    pipeline.override_variable("PIP_CACHE_DIR", "/tmp/pip");
    pipeline.override_variable("EXTRA", "1");

    let runner = MockRunner::new();
    let result = run_with(
        pipeline,
        RefContext::branch("feature/x"),
        &runner,
        SchedulingStrategy::Parallel,
        |engine| engine,
    )
    .await;

    let env = result.env_of("lint");
    assert_eq!(env["PIP_CACHE_DIR"], "/tmp/pip");
    assert_eq!(env["EXTRA"], "1");
}

/// A run override also beats a job-level variable of the same name
#[tokio::test]
async fn test_override_beats_job_variable() {
    let yaml = r#"
variables:
  MODE: file
stages: [build]
compile:
  stage: build
  variables:
    MODE: job
    OUT: "out/$MODE"
  script: ["make"]
"#;
    let mut pipeline = pipeline_from_yaml(yaml);
    pipeline.override_variable("MODE", "cli");

    let runner = MockRunner::new();
    let result = run_with(
        pipeline,
        RefContext::branch("master"),
        &runner,
        SchedulingStrategy::Parallel,
        |engine| engine,
    )
    .await;

    let env = result.env_of("compile");
    assert_eq!(env["MODE"], "cli");
    // Job values are expanded before the override lands
    assert_eq!(env["OUT"], "out/job");
}
