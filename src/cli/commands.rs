//! CLI command definitions

use crate::core::RefContext;
use crate::execution::SchedulingStrategy;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Pipeline file used when `-f` is not given
pub const DEFAULT_PIPELINE_FILE: &str = ".gitlab-ci.yml";

/// Branch or tag to evaluate `only`/`except` against
#[derive(Debug, Args, Clone, Default)]
pub struct RefArgs {
    /// Run as if on this branch (default: detected from git)
    #[arg(long, conflicts_with = "tag")]
    pub branch: Option<String>,

    /// Run as if on this tag
    #[arg(long)]
    pub tag: Option<String>,
}

impl RefArgs {
    /// The ref given on the command line, if any
    pub fn explicit(&self) -> Option<RefContext> {
        match (&self.branch, &self.tag) {
            (_, Some(tag)) => Some(RefContext::tag(tag)),
            (Some(branch), None) => Some(RefContext::branch(branch)),
            (None, None) => None,
        }
    }
}

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long, default_value = DEFAULT_PIPELINE_FILE, env = "STAGEHAND_FILE")]
    pub file: String,

    #[command(flatten)]
    pub refs: RefArgs,

    /// Directory jobs run in (default: the pipeline file's directory)
    #[arg(long)]
    pub project_dir: Option<PathBuf>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy for the jobs of a stage
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Parallel)]
    pub strategy: SchedulingStrategyArg,

    /// Job limit for the parallel-limited strategy
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Cache root (default: the platform cache dir)
    #[arg(long, env = "STAGEHAND_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Do not restore or save caches
    #[arg(long)]
    pub no_cache: bool,

    /// Keep artifacts under this directory
    #[arg(long, env = "STAGEHAND_ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        match self.strategy {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => {
                SchedulingStrategy::LimitedParallel(self.max_parallel)
            }
        }
    }

    /// Where jobs run
    pub fn resolved_project_dir(&self) -> PathBuf {
        if let Some(dir) = &self.project_dir {
            return dir.clone();
        }
        match Path::new(&self.file).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long, default_value = DEFAULT_PIPELINE_FILE, env = "STAGEHAND_FILE")]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show the jobs selected for a ref
#[derive(Debug, Args, Clone)]
pub struct JobsCommand {
    /// Path to pipeline YAML file
    #[arg(short, long, default_value = DEFAULT_PIPELINE_FILE, env = "STAGEHAND_FILE")]
    pub file: String,

    #[command(flatten)]
    pub refs: RefArgs,
}

/// List available pipelines
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show execution counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub full: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Inspect or clear the job cache
#[derive(Debug, Args, Clone)]
pub struct CacheCommand {
    /// Cache root (default: the platform cache dir)
    #[arg(long, global = true, env = "STAGEHAND_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub action: CacheAction,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CacheAction {
    /// List cache keys
    List,

    /// Remove one key, or every key
    Clear {
        /// Key to remove (as written in the pipeline, after expansion)
        #[arg(long)]
        key: Option<String>,
    },
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
