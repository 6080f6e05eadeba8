//! Scenario-based tests for stagehand

mod helpers;

mod cache_reuse;
mod failure_handling;
mod job_selection;
mod publish_rerun;
mod stage_ordering;
mod variables;
