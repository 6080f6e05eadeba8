//! Test: Stage Ordering - a stage starts only after the previous one finished

use crate::helpers::*;
use stagehand::core::RefContext;
use stagehand::execution::SchedulingStrategy;

const THREE_STAGES: &str = r#"
stages: [build, test, deploy]
compile:
  stage: build
  script: ["slow compile"]
assets:
  stage: build
  script: ["assets"]
unit:
  stage: test
  script: ["unit"]
integration:
  stage: test
  script: ["slow integration"]
release:
  stage: deploy
  script: ["release"]
"#;

fn slow_runner() -> MockRunner {
    MockRunner::new()
        .delay("slow compile", 50)
        .delay("slow integration", 50)
}

/// No job of stage i+1 starts before every job of stage i finished
#[tokio::test]
async fn test_stages_do_not_overlap() {
    let runner = slow_runner();
    let result = run_pipeline(THREE_STAGES, RefContext::branch("master"), &runner).await;
    assert!(result.is_success());

    let (_, build_end) = result.span_of(&["compile", "assets"]).unwrap();
    let (test_start, test_end) = result.span_of(&["unit", "integration"]).unwrap();
    let (deploy_start, _) = result.span_of(&["release"]).unwrap();

    assert!(build_end < test_start, "test stage started before build finished");
    assert!(test_end < deploy_start, "deploy stage started before test finished");
}

/// Jobs of one stage overlap under the parallel strategy
#[tokio::test]
async fn test_parallel_jobs_overlap() {
    let runner = slow_runner();
    run_pipeline(THREE_STAGES, RefContext::branch("master"), &runner).await;
    assert!(runner.max_concurrency() >= 2);
}

/// Sequential strategy runs one job at a time, in definition order
#[tokio::test]
async fn test_sequential_strategy() {
    let runner = slow_runner();
    let result = run_with(
        pipeline_from_yaml(THREE_STAGES),
        RefContext::branch("master"),
        &runner,
        SchedulingStrategy::Sequential,
        |engine| engine,
    )
    .await;

    assert!(result.is_success());
    assert_eq!(runner.max_concurrency(), 1);
    let order: Vec<String> = result.commands.iter().map(|c| c.job.clone()).collect();
    assert_eq!(order, vec!["compile", "assets", "unit", "integration", "release"]);
}

/// Limited parallelism caps concurrent jobs
#[tokio::test]
async fn test_limited_parallel_strategy() {
    let yaml = r#"
matrix-1:
  script: ["slow a"]
matrix-2:
  script: ["slow b"]
matrix-3:
  script: ["slow c"]
matrix-4:
  script: ["slow d"]
"#;
    let runner = MockRunner::new()
        .delay("slow a", 30)
        .delay("slow b", 30)
        .delay("slow c", 30)
        .delay("slow d", 30);
    let result = run_with(
        pipeline_from_yaml(yaml),
        RefContext::branch("master"),
        &runner,
        SchedulingStrategy::LimitedParallel(2),
        |engine| engine,
    )
    .await;

    assert!(result.is_success());
    assert!(runner.max_concurrency() <= 2);
    assert_eq!(result.commands.len(), 4);
}
