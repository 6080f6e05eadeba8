//! Job domain model

use crate::core::{
    config::{CacheConfig, JobConfig, PublishConfig, DEFAULT_TIMEOUT_SECS},
    context::RefContext,
    selector::JobSelector,
    state::JobState,
};

/// A single job in a pipeline
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job name
    pub name: String,

    /// Owning stage
    pub stage: String,

    /// Shell commands, run in order
    pub script: Vec<String>,

    /// `only` / `except` gate
    pub selector: JobSelector,

    /// Artifact glob patterns
    pub artifacts: Vec<String>,

    /// Job-level variables, in declaration order
    pub variables: Vec<(String, String)>,

    /// Effective cache block (job override or global)
    pub cache: Option<CacheConfig>,

    /// Publish block
    pub publish: Option<PublishConfig>,

    /// Failure does not block later stages
    pub allow_failure: bool,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Runtime state
    pub state: JobState,
}

impl Job {
    /// Create a job from its config and the pipeline's global cache block
    pub fn from_config(
        config: &JobConfig,
        global_cache: Option<&CacheConfig>,
    ) -> Result<Self, regex::Error> {
        Ok(Job {
            name: config.name.clone(),
            stage: config.stage.clone(),
            script: config.script.clone(),
            selector: JobSelector::from_patterns(&config.only, &config.except)?,
            artifacts: config
                .artifacts
                .as_ref()
                .map(|a| a.paths.clone())
                .unwrap_or_default(),
            variables: config.get_variables(),
            cache: config.effective_cache(global_cache),
            publish: config.publish.clone(),
            allow_failure: config.allow_failure,
            timeout_secs: config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            state: JobState::Pending,
        })
    }

    /// Check if the job runs for this ref
    pub fn is_selected(&self, refs: &RefContext) -> bool {
        self.selector.includes(refs)
    }
}
