//! Test: Job Selection - only/except decide which jobs run for a ref

use crate::helpers::*;
use stagehand::core::RefContext;
use stagehand::execution::ExecutionEvent;

/// Feature branches only get the unrestricted lint job
#[tokio::test]
async fn test_feature_branch_runs_lint_only() {
    let runner = MockRunner::new();
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::branch("feature/x"), &runner).await;

    assert!(result.is_success());
    assert_job_succeeded(&result, "lint");
    assert_job_skipped(&result, "unittest");
    assert_job_skipped(&result, "doctest");
    assert_job_skipped(&result, "pypi");

    // before_script ran for lint only
    assert_eq!(
        result.commands_of("lint"),
        vec!["python -V", "pip install -r requirements.txt", "pycodestyle lightnet"]
    );
    assert_eq!(result.commands.len(), 3);
}

/// master runs every test job but does not deploy
#[tokio::test]
async fn test_master_runs_tests_without_deploy() {
    let runner = MockRunner::new();
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::branch("master"), &runner).await;

    assert!(result.is_success());
    for job in ["lint", "unittest", "doctest"] {
        assert_job_succeeded(&result, job);
    }
    assert_job_skipped(&result, "pypi");

    let deploy_skipped = result.events.iter().any(|e| {
        matches!(e, ExecutionEvent::StageSkipped { stage, .. } if stage == "deploy")
    });
    assert!(deploy_skipped);
}

/// A tag runs everything, including the upload
#[tokio::test]
async fn test_tag_runs_every_job() {
    let runner = MockRunner::new();
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::tag("v0.3.0"), &runner).await;

    assert!(result.is_success());
    for job in ["lint", "unittest", "doctest", "pypi"] {
        assert_job_succeeded(&result, job);
    }
    assert_eq!(
        result.commands_of("pypi")[2..],
        ["python setup.py sdist bdist_wheel", "twine upload --skip-existing dist/*"]
    );
    assert_eq!(result.env_of("pypi").get("CI_COMMIT_TAG").map(String::as_str), Some("v0.3.0"));
}

/// Skip reasons name the ref
#[tokio::test]
async fn test_skip_reason_mentions_ref() {
    let runner = MockRunner::new();
    let result = run_pipeline(LIBRARY_PIPELINE, RefContext::branch("feature/x"), &runner).await;

    let reason = result
        .events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::JobSkipped { job, reason } if job == "unittest" => Some(reason.clone()),
            _ => None,
        })
        .expect("unittest skip event");
    assert!(reason.contains("feature/x"), "reason was: {}", reason);
}

/// except and regex matchers
#[tokio::test]
async fn test_except_and_regex_matchers() {
    let yaml = r#"
stages: [build]
nightly:
  stage: build
  only: ["/^release-.*$/"]
  script: ["build release"]
docs:
  stage: build
  except: [tags, "/^wip-/"]
  script: ["build docs"]
"#;
    let runner = MockRunner::new();
    let result = run_pipeline(yaml, RefContext::branch("release-1.2"), &runner).await;
    assert_job_succeeded(&result, "nightly");
    assert_job_succeeded(&result, "docs");

    let runner = MockRunner::new();
    let result = run_pipeline(yaml, RefContext::branch("wip-parser"), &runner).await;
    assert_job_skipped(&result, "nightly");
    assert_job_skipped(&result, "docs");
    assert!(result.is_success());

    let runner = MockRunner::new();
    let result = run_pipeline(yaml, RefContext::tag("release-2.0"), &runner).await;
    assert_job_succeeded(&result, "nightly");
    assert_job_skipped(&result, "docs");
}
