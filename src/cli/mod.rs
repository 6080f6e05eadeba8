//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CacheCommand, HistoryCommand, JobsCommand, ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Stage-based CI pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "stagehand")]
#[command(version)]
#[command(about = "Run GitLab-style CI pipelines locally, stage by stage", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print every command's output as jobs run
    #[arg(short, long, global = true)]
    pub stream: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Show which jobs run for a branch or tag
    Jobs(JobsCommand),

    /// List pipelines in history
    List(ListCommand),

    /// Show execution history
    History(HistoryCommand),

    /// Inspect or clear the job cache
    Cache(CacheCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
