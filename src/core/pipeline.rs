//! Pipeline domain model

use crate::core::{
    config::{EndpointConfig, PipelineConfig},
    context::{PipelineContext, RefContext},
    job::Job,
    state::{ExecutionStatus, JobState, PipelineState},
};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// A named stage and its jobs in definition order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub jobs: Vec<String>,
}

/// A pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Project identifier; falls back to the project dir name
    pub project: Option<String>,

    /// Base execution image identifier
    pub image: Option<String>,

    /// Global variables, in declaration order
    pub variables: Vec<(String, String)>,

    /// Commands run before every job
    pub before_script: Vec<String>,

    /// Stages in execution order
    pub stages: Vec<Stage>,

    /// Jobs by name
    pub jobs: HashMap<String, Job>,

    /// Named publish destinations
    pub endpoints: BTreeMap<String, EndpointConfig>,

    /// Directory the jobs run in
    pub project_dir: PathBuf,

    /// Variables forced for this run; they beat pipeline and job values
    pub overrides: Vec<(String, String)>,

    /// Execution state
    pub state: PipelineState,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let mut jobs = HashMap::new();
        for job_config in &config.jobs {
            let job = Job::from_config(job_config, config.cache.as_ref())
                .with_context(|| format!("Invalid only/except in job '{}'", job_config.name))?;
            jobs.insert(job.name.clone(), job);
        }

        let stages = config
            .stages
            .iter()
            .map(|stage| Stage {
                name: stage.clone(),
                jobs: config.jobs_in_stage(stage).map(|j| j.name.clone()).collect(),
            })
            .collect();

        Ok(Pipeline {
            name: config.name.clone(),
            project: config.project.clone(),
            image: config.image.clone(),
            variables: config.get_variables(),
            before_script: config.before_script.clone(),
            stages,
            jobs,
            endpoints: config.endpoints.clone(),
            project_dir: PathBuf::from("."),
            overrides: Vec::new(),
            state: PipelineState::new(),
        })
    }

    /// Set the directory jobs run in
    pub fn with_project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.project_dir = dir.into();
        self
    }

    /// Force a variable for every job of this run
    pub fn override_variable(&mut self, key: &str, value: &str) {
        match self.overrides.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.overrides.push((key.to_string(), value.to_string())),
        }
    }

    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.get(name)
    }

    /// Get a mutable job by name
    pub fn job_mut(&mut self, name: &str) -> Option<&mut Job> {
        self.jobs.get_mut(name)
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Jobs of a stage, in definition order
    pub fn stage_jobs(&self, stage: &Stage) -> Vec<&Job> {
        stage.jobs.iter().filter_map(|name| self.jobs.get(name)).collect()
    }

    /// Project identifier used for `CI_PROJECT_NAME`
    pub fn project_name(&self) -> String {
        if let Some(project) = &self.project {
            return project.clone();
        }
        project_dir_name(&self.project_dir).unwrap_or_else(|| self.name.clone())
    }

    /// Check if every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.jobs.values().all(|j| j.state.is_terminal())
    }

    /// Check if a blocking job failed
    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
            || self.jobs.values().any(|j| j.state.is_blocking_failure())
    }

    /// Recount job states into the pipeline state
    pub fn update_counts(&mut self) {
        let jobs = &self.jobs;
        self.state.update_counts(jobs.values().map(|j| &j.state));
    }

    /// Names of jobs in a given state class, in stage order
    pub fn jobs_where(&self, predicate: impl Fn(&JobState) -> bool) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|s| s.jobs.iter())
            .filter(|name| self.jobs.get(*name).is_some_and(|j| predicate(&j.state)))
            .cloned()
            .collect()
    }

    /// Create execution context for a run on the given ref
    pub fn create_context(&self, refs: &RefContext) -> PipelineContext {
        PipelineContext {
            execution_id: self.state.execution_id,
            project_name: self.project_name(),
            project_dir: self.project_dir.clone(),
            refs: refs.clone(),
            image: self.image.clone(),
            variables: self.variables.clone(),
            overrides: self.overrides.clone(),
        }
    }
}

fn project_dir_name(dir: &Path) -> Option<String> {
    let absolute = dir.canonicalize().ok()?;
    absolute.file_name()?.to_str().map(str::to_string)
}
