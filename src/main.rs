use anyhow::{Context, Result};
use stagehand::cache::CacheManager;
use stagehand::cli::commands::{
    CacheAction, CacheCommand, HistoryCommand, JobsCommand, ListCommand, RefArgs, RunCommand,
    ValidateCommand,
};
use stagehand::cli::output::*;
use stagehand::cli::{Cli, Command};
use stagehand::core::config::PipelineConfig;
use stagehand::core::{ExecutionStatus, JobState, Pipeline, RefContext};
use stagehand::execution::{ExecutionEngine, ExecutionEvent, ExecutionScheduler};
use stagehand::persistence::{
    create_summary, ExecutionSummary, InMemoryPersistence, PersistenceBackend,
};
use stagehand::runner::ShellRunner;
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "sqlite")]
use stagehand::persistence::SqliteExecutionStore;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Jobs(cmd) => show_jobs(cmd).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Cache(cmd) => manage_cache(cmd).await?,
    }

    Ok(())
}

async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(SqliteExecutionStore::with_default_path().await?))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn resolve_ref(args: &RefArgs, dir: &Path) -> Result<RefContext> {
    match args.explicit() {
        Some(refs) => Ok(refs),
        None => RefContext::detect(dir).await,
    }
}

fn cache_manager(dir: Option<&Path>) -> Result<CacheManager> {
    match dir {
        Some(dir) => Ok(CacheManager::new(dir)),
        None => CacheManager::with_default_path().context("Failed to locate cache directory"),
    }
}

async fn run_pipeline(cmd: &RunCommand, stream: bool) -> Result<()> {
    // Load pipeline config
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let project_dir = cmd.resolved_project_dir();
    let mut pipeline = config.to_pipeline()?.with_project_dir(&project_dir);

    // Apply variable overrides
    for (key, value) in &cmd.variable {
        pipeline.override_variable(key, value);
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let refs = resolve_ref(&cmd.refs, &project_dir).await?;
    if let Some(image) = &pipeline.image {
        println!("{} Image {} (jobs run on the host shell)", INFO, style(image).dim());
    }

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_store().await?
    };

    let mut engine = ExecutionEngine::new(ShellRunner::default(), cmd.scheduling_strategy());
    if !cmd.no_cache {
        engine = engine.with_cache(cache_manager(cmd.cache_dir.as_deref())?);
    }
    if let Some(dir) = &cmd.artifact_dir {
        engine = engine.with_artifact_root(dir);
    }

    // Set up event handler for console output
    let progress = create_progress_bar(pipeline.jobs.len());
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let Some(line) = format_execution_event(&event) {
            bar.println(line);
        }
        match &event {
            ExecutionEvent::JobOutput { command, output, .. } if stream || !output.success() => {
                bar.println(format!("  {} {}", style("$").dim(), command));
                let text = output.combined();
                if !text.is_empty() {
                    let shown = if stream { text } else { format_output(&text, 20) };
                    for line in shown.lines() {
                        bar.println(format!("    {}", line));
                    }
                }
            }
            ExecutionEvent::JobStarted { job, .. } => bar.set_message(job.clone()),
            ExecutionEvent::JobSucceeded { .. }
            | ExecutionEvent::JobFailed { .. }
            | ExecutionEvent::JobSkipped { .. } => bar.inc(1),
            _ => {}
        }
    });

    // Execute pipeline
    println!();
    let result = engine.execute(&mut pipeline, &refs).await;
    progress.finish_and_clear();
    result?;

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&pipeline, &refs);
        store.save_execution(&summary).await?;
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(&summary.execution_id.to_string()[..8]).dim()
        );
    }

    print_job_table(&pipeline);

    // Print final status
    if pipeline.has_failed() {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            style("failed").red()
        );
        for name in pipeline.jobs_where(JobState::is_blocking_failure) {
            if let Some(JobState::Failed { error, .. }) = pipeline.job(&name).map(|j| &j.state) {
                error!("{}: {}", name, error);
            }
        }
        std::process::exit(1);
    }

    println!(
        "\n{} {} completed {}",
        CHECK,
        style(&pipeline.name).bold(),
        style("successfully").green()
    );
    Ok(())
}

fn print_job_table(pipeline: &Pipeline) {
    println!();
    for stage in &pipeline.stages {
        println!("  {}", style(&stage.name).bold());
        for job in pipeline.stage_jobs(stage) {
            println!("    {:<24} {}", job.name, format_job_state(&job.state));
        }
    }
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.join(" → ")).cyan());
            println!("  Jobs: {}", style(config.jobs.len()).cyan());
            println!("  Variables: {}", style(config.get_variables().len()).cyan());
            if let Some(image) = &config.image {
                println!("  Image: {}", style(image).dim());
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_jobs(cmd: &JobsCommand) -> Result<()> {
    let config = PipelineConfig::from_file(&cmd.file).context("Failed to load pipeline config")?;
    let pipeline = config.to_pipeline()?;
    let dir = match Path::new(&cmd.file).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    let refs = resolve_ref(&cmd.refs, &dir).await?;
    let scheduler = ExecutionScheduler::default();

    println!("{} Jobs of {} for {}", INFO, style(&pipeline.name).bold(), refs);
    for stage in &pipeline.stages {
        let plan = scheduler.plan_stage(&pipeline, stage, &refs);
        println!("  {}", style(&stage.name).bold());
        for job in &plan.runnable {
            println!("    {} {}", CHECK, style(job).green());
        }
        for (job, reason) in &plan.excluded {
            println!("    {} {} ({})", SKIP, style(job).dim(), style(reason).dim());
        }
    }
    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len()
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let completed = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Completed)
                .count();
            let failed = executions
                .iter()
                .filter(|e| e.status == ExecutionStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store().await?;

    // If specific execution ID is requested
    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.full)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_executions(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, full: bool) -> Result<()> {
    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Ref: {}", style(&summary.ref_name).cyan());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Jobs: {} succeeded, {} failed, {} skipped of {} ({})",
        style(summary.succeeded_jobs).green(),
        style(summary.failed_jobs).red(),
        style(summary.skipped_jobs).dim(),
        summary.total_jobs,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    );
    for job in &summary.jobs {
        match &job.detail {
            Some(detail) => println!("    {}/{}: {} ({})", job.stage, job.name, job.outcome, style(detail).dim()),
            None => println!("    {}/{}: {}", job.stage, job.name, job.outcome),
        }
    }

    if full {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}

async fn manage_cache(cmd: &CacheCommand) -> Result<()> {
    let cache = cache_manager(cmd.cache_dir.as_deref())?;

    match &cmd.action {
        CacheAction::List => {
            let entries = cache.list().await?;
            if entries.is_empty() {
                println!("{} No cache entries in {}", INFO, cache.root().display());
                return Ok(());
            }
            println!("{} Cache entries in {}:", INFO, style(cache.root().display()).dim());
            for entry in entries {
                println!("  {} ({} files)", style(&entry.key).bold(), style(entry.files).cyan());
            }
        }
        CacheAction::Clear { key } => {
            let removed = cache.clear(key.as_deref()).await?;
            println!("{} Removed {} cache entries", CHECK, style(removed).cyan());
        }
    }

    Ok(())
}
