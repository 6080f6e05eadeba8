//! CLI output formatting

use crate::{
    core::{ExecutionStatus, JobState},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "* ");

/// Create a progress bar counting finished jobs
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} jobs {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// A horizontal rule as wide as the terminal
pub fn separator() -> String {
    let width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80).min(100);
    style("─".repeat(width)).dim().to_string()
}

/// Format a job state for display
pub fn format_job_state(state: &JobState) -> String {
    match state {
        JobState::Pending => style("PENDING").dim().to_string(),
        JobState::Running { .. } => style("RUNNING").yellow().to_string(),
        JobState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        JobState::Failed { allowed: true, .. } => style("FAILED (allowed)").yellow().to_string(),
        JobState::Failed { .. } => style("FAILED").red().to_string(),
        JobState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} @ {} - {} ({} ok, {} failed, {} skipped of {}) - {}",
        status_icon,
        style(short_id(&summary.execution_id)).dim(),
        style(&summary.pipeline_name).bold(),
        style(&summary.ref_name).cyan(),
        format_status(summary.status),
        summary.succeeded_jobs,
        summary.failed_jobs,
        summary.skipped_jobs,
        summary.total_jobs,
        style(summary.started_at.format("%Y-%m-%d %H:%M")).dim()
    )
}

/// Format an execution event for display
///
/// Returns `None` for events that have no line of their own.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            refs,
        } => format!(
            "{} Starting pipeline {} for {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            refs,
            style(short_id(execution_id)).dim()
        ),
        ExecutionEvent::StageStarted { stage, jobs } => format!(
            "{}\n{} Stage {} ({})",
            separator(),
            INFO,
            style(stage).bold(),
            jobs.join(", ")
        ),
        ExecutionEvent::StageSkipped { stage, reason } => format!(
            "{} Stage {} skipped: {}",
            SKIP,
            style(stage).dim(),
            style(reason).dim()
        ),
        ExecutionEvent::JobSkipped { job, reason } => {
            format!("{} {} ({})", SKIP, style(job).dim(), style(reason).dim())
        }
        ExecutionEvent::JobStarted { job, .. } => format!("{} {}", SPINNER, style(job).cyan()),
        ExecutionEvent::JobOutput { .. } => return None,
        ExecutionEvent::JobSucceeded { job, publish, .. } => match publish {
            Some(report) => format!(
                "{} {} {} {} uploaded, {} skipped on {}",
                CHECK,
                style(job).green(),
                PACKAGE,
                report.uploaded.len(),
                report.skipped.len(),
                style(&report.endpoint).cyan()
            ),
            None => format!("{} {}", CHECK, style(job).green()),
        },
        ExecutionEvent::JobFailed {
            job,
            error,
            allowed: true,
        } => format!("{} {} (allowed to fail): {}", WARN, style(job).yellow(), style(error).dim()),
        ExecutionEvent::JobFailed { job, error, .. } => {
            format!("{} {}: {}", CROSS, style(job).red(), style(error).dim())
        }
        ExecutionEvent::StageCompleted { stage, success } => {
            if *success {
                format!("{} Stage {} passed", CHECK, style(stage).green())
            } else {
                format!("{} Stage {} failed", CROSS, style(stage).red())
            }
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                other => format!("{:?}", other),
            };
            format!(
                "{}\n{} Pipeline ({}) {}",
                separator(),
                INFO,
                style(short_id(execution_id)).dim(),
                status_str
            )
        }
    };
    Some(line)
}

/// Format command output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
