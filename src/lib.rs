//! stagehand - a stage-based CI pipeline runner

pub mod cache;
pub mod cli;
pub mod core;
pub mod execution;
pub mod files;
pub mod persistence;
pub mod publish;
pub mod runner;

// Re-export commonly used types
pub use cache::{CacheError, CacheManager};
pub use core::{ExecutionStatus, Job, JobState, Pipeline, PipelineContext, RefContext};
pub use execution::{ExecutionEngine, ExecutionEvent, JobFailure, PipelineError, SchedulingStrategy};
pub use publish::{PublishError, PublishTarget};
pub use runner::{CommandRunner, RunnerError, ShellRunner};
