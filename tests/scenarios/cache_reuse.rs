//! Test: Cache Reuse - a cache saved in one run is restored in the next

use crate::helpers::*;
use stagehand::cache::CacheManager;
use stagehand::core::RefContext;
use stagehand::execution::SchedulingStrategy;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

async fn run_in(project: &Path, cache: &CacheManager, yaml: &str, runner: &MockRunner) -> PipelineTestResult {
    let cache = cache.clone();
    run_with(
        pipeline_from_yaml(yaml).with_project_dir(project),
        RefContext::branch("feature/x"),
        runner,
        SchedulingStrategy::Parallel,
        move |engine| engine.with_cache(cache),
    )
    .await
}

/// Run 1 saves `.cache/`, run 2 in a fresh checkout gets it back
#[tokio::test]
async fn test_cache_survives_between_runs() {
    let cache_root = TempDir::new().unwrap();
    let cache = CacheManager::new(cache_root.path());

    let run1 = TempDir::new().unwrap();
    fs::create_dir_all(run1.path().join(".cache/pip")).unwrap();
    fs::write(run1.path().join(".cache/pip/pycodestyle.whl"), "wheel").unwrap();

    let result = run_in(run1.path(), &cache, LIBRARY_PIPELINE, &MockRunner::new()).await;
    assert!(result.is_success());
    assert_eq!(cache.list().await.unwrap()[0].key, "lightnet");

    let run2 = TempDir::new().unwrap();
    let result = run_in(run2.path(), &cache, LIBRARY_PIPELINE, &MockRunner::new()).await;
    assert!(result.is_success());
    assert_eq!(
        fs::read_to_string(run2.path().join(".cache/pip/pycodestyle.whl")).unwrap(),
        "wheel"
    );
}

/// With the default `when: on_success`, a failed job leaves the slot alone
#[tokio::test]
async fn test_failed_job_does_not_save() {
    let cache_root = TempDir::new().unwrap();
    let cache = CacheManager::new(cache_root.path());
    let project = TempDir::new().unwrap();
    fs::create_dir_all(project.path().join(".cache")).unwrap();
    fs::write(project.path().join(".cache/partial"), "x").unwrap();

    let runner = MockRunner::new().fail("pycodestyle lightnet", 1);
    let result = run_in(project.path(), &cache, LIBRARY_PIPELINE, &runner).await;

    assert!(result.is_failed());
    assert!(cache.list().await.unwrap().is_empty());
}

/// Jobs with `cache: false` neither restore nor save; custom keys get their own slot
#[tokio::test]
async fn test_cache_overrides() {
    let yaml = r#"
project: lightnet
cache:
  paths: [.cache/]
stages: [test]
nocache:
  cache: false
  script: ["run"]
deps:
  cache:
    key: "deps-$CI_COMMIT_REF_NAME"
    paths: [vendor/]
  script: ["vendor"]
"#;
    let cache_root = TempDir::new().unwrap();
    let cache = CacheManager::new(cache_root.path());
    let project = TempDir::new().unwrap();
    fs::create_dir_all(project.path().join(".cache")).unwrap();
    fs::create_dir_all(project.path().join("vendor")).unwrap();
    fs::write(project.path().join("vendor/lib"), "lib").unwrap();

    run_in(project.path(), &cache, yaml, &MockRunner::new()).await;

    let keys: Vec<String> = cache.list().await.unwrap().into_iter().map(|e| e.key).collect();
    assert_eq!(keys, vec!["deps-feature/x"]);
    assert!(cache.slot_dir("deps-feature/x").join("vendor/lib").exists());
}

/// lint, unittest and doctest run side by side on a tag and all save the
/// project key; exactly one slot survives and nothing is left behind
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_jobs_share_one_slot() {
    let cache_root = TempDir::new().unwrap();
    let cache = CacheManager::new(cache_root.path());
    let project = TempDir::new().unwrap();
    fs::create_dir_all(project.path().join(".cache/pip")).unwrap();
    fs::write(project.path().join(".cache/pip/torch.whl"), "torch").unwrap();

    let runner = MockRunner::new()
        .delay("pycodestyle lightnet", 20)
        .delay("python -m pytest tests", 20)
        .delay("make -C docs doctest", 20);
    let cache_for_engine = cache.clone();
    let result = run_with(
        pipeline_from_yaml(LIBRARY_PIPELINE).with_project_dir(project.path()),
        RefContext::tag("v0.3.0"),
        &runner,
        SchedulingStrategy::Parallel,
        move |engine| engine.with_cache(cache_for_engine),
    )
    .await;

    assert!(result.is_success());
    assert!(runner.max_concurrency() >= 2);

    let entries = cache.list().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].key, "lightnet");
    assert!(cache.slot_dir("lightnet").join(".cache/pip/torch.whl").exists());

    let names: Vec<String> = fs::read_dir(cache_root.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["lightnet"]);
}
