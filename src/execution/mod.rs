//! Pipeline execution engine

pub mod artifacts;
pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{EventHandler, EventSink, ExecutionEngine, ExecutionEvent, PipelineError};
pub use executor::{EnvironmentPreparer, ExecutionResult, JobExecutor, JobFailure, OutputHandler};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy, StagePlan};
