//! Test: Publish Rerun - publishing the same artifacts twice does not fail

use crate::helpers::*;
use stagehand::core::RefContext;
use stagehand::execution::{ExecutionEvent, SchedulingStrategy};
use stagehand::publish::{DirectoryTarget, PublishTarget};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const DEPLOY_PIPELINE: &str = r#"
name: lightnet
stages: [test, deploy]
endpoints:
  index:
    kind: directory
    path: /unused
lint:
  script: ["pycodestyle lightnet"]
pypi:
  stage: deploy
  only: [tags]
  script: ["python setup.py sdist bdist_wheel"]
  publish:
    endpoint: index
    paths: ["dist/*"]
"#;

fn project_with_dist() -> TempDir {
    let project = TempDir::new().unwrap();
    fs::create_dir_all(project.path().join("dist")).unwrap();
    fs::write(project.path().join("dist/lightnet-0.3.0.tar.gz"), "sdist").unwrap();
    fs::write(project.path().join("dist/lightnet-0.3.0-py3-none-any.whl"), "wheel").unwrap();
    project
}

async fn deploy(yaml: &str, project: &Path, index: &Path) -> PipelineTestResult {
    let target: Arc<dyn PublishTarget> = Arc::new(DirectoryTarget::new("index", index));
    run_with(
        pipeline_from_yaml(yaml).with_project_dir(project),
        RefContext::tag("v0.3.0"),
        &MockRunner::new(),
        SchedulingStrategy::Parallel,
        move |engine| engine.with_publish_target("index", target),
    )
    .await
}

fn publish_report(result: &PipelineTestResult) -> (Vec<String>, Vec<String>) {
    result
        .events
        .iter()
        .find_map(|e| match e {
            ExecutionEvent::JobSucceeded {
                job,
                publish: Some(report),
                ..
            } if job == "pypi" => Some((report.uploaded.clone(), report.skipped.clone())),
            _ => None,
        })
        .expect("pypi publish report")
}

/// A rerun of the deploy stage skips what is already on the index
#[tokio::test]
async fn test_rerun_skips_existing_artifacts() {
    let project = project_with_dist();
    let index = TempDir::new().unwrap();

    let first = deploy(DEPLOY_PIPELINE, project.path(), index.path()).await;
    assert!(first.is_success());
    let (uploaded, skipped) = publish_report(&first);
    assert_eq!(uploaded.len(), 2);
    assert!(skipped.is_empty());
    assert!(index.path().join("lightnet-0.3.0.tar.gz").exists());

    let second = deploy(DEPLOY_PIPELINE, project.path(), index.path()).await;
    assert!(second.is_success());
    assert_job_succeeded(&second, "pypi");
    let (uploaded, skipped) = publish_report(&second);
    assert!(uploaded.is_empty());
    assert_eq!(skipped.len(), 2);
}

/// Partially published releases only upload what is missing
#[tokio::test]
async fn test_partial_publish_is_completed() {
    let project = project_with_dist();
    let index = TempDir::new().unwrap();
    fs::write(index.path().join("lightnet-0.3.0.tar.gz"), "sdist").unwrap();

    let result = deploy(DEPLOY_PIPELINE, project.path(), index.path()).await;
    let (uploaded, skipped) = publish_report(&result);
    assert_eq!(uploaded, vec!["lightnet-0.3.0-py3-none-any.whl"]);
    assert_eq!(skipped, vec!["lightnet-0.3.0.tar.gz"]);
}

/// Without skip_existing a conflict fails the job
#[tokio::test]
async fn test_conflict_without_skip_existing() {
    let yaml = DEPLOY_PIPELINE.replace(
        "    paths: [\"dist/*\"]\n",
        "    paths: [\"dist/*\"]\n    skip_existing: false\n",
    );
    let project = project_with_dist();
    let index = TempDir::new().unwrap();

    assert!(deploy(&yaml, project.path(), index.path()).await.is_success());
    let rerun = deploy(&yaml, project.path(), index.path()).await;
    assert!(rerun.is_failed());
    assert_job_failed(&rerun, "pypi", "already exists");
}

/// A failing build publishes nothing
#[tokio::test]
async fn test_failed_script_publishes_nothing() {
    let project = project_with_dist();
    let index = TempDir::new().unwrap();
    let target: Arc<dyn PublishTarget> = Arc::new(DirectoryTarget::new("index", index.path()));

    let runner = MockRunner::new().fail("python setup.py sdist bdist_wheel", 1);
    let result = run_with(
        pipeline_from_yaml(DEPLOY_PIPELINE).with_project_dir(project.path()),
        RefContext::tag("v0.3.0"),
        &runner,
        SchedulingStrategy::Parallel,
        move |engine| engine.with_publish_target("index", target),
    )
    .await;

    assert_job_failed(&result, "pypi", "exited with code 1");
    assert_eq!(fs::read_dir(index.path()).unwrap().count(), 0);
}
