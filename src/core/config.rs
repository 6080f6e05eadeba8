//! Pipeline configuration from YAML
//!
//! The file follows the GitLab CI layout: a handful of reserved top-level keys
//! (`image`, `variables`, `cache`, `before_script`, `stages`, ...) and one
//! mapping per job. Keys starting with `.` are hidden templates and ignored.

use crate::core::selector::JobSelector;
use crate::core::Pipeline;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

/// Stages used when the file declares none
pub const DEFAULT_STAGES: [&str; 3] = ["build", "test", "deploy"];

/// Stage a job lands in when it declares none
pub const DEFAULT_STAGE: &str = "test";

/// Default per-job timeout (one hour)
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Cache key used when the cache block sets none
pub const DEFAULT_CACHE_KEY: &str = "$CI_PROJECT_NAME";

/// The file as written, before jobs are split out of the top-level mapping
#[derive(Debug, Deserialize)]
struct RawPipelineFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    variables: Mapping,
    #[serde(default)]
    cache: Option<CacheConfig>,
    #[serde(default)]
    before_script: Vec<String>,
    #[serde(default)]
    stages: Option<Vec<String>>,
    #[serde(default)]
    endpoints: BTreeMap<String, EndpointConfig>,
    #[serde(flatten)]
    jobs: Mapping,
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Project identifier (feeds `CI_PROJECT_NAME` and the default cache key)
    pub project: Option<String>,

    /// Base execution image identifier
    pub image: Option<String>,

    /// Global variables, in declaration order
    variables: Mapping,

    /// Global cache block
    pub cache: Option<CacheConfig>,

    /// Commands run before every job's script
    pub before_script: Vec<String>,

    /// Ordered stage names
    pub stages: Vec<String>,

    /// Named publish destinations
    pub endpoints: BTreeMap<String, EndpointConfig>,

    /// Jobs in definition order
    pub jobs: Vec<JobConfig>,

    /// Whether `name` came from the file
    #[serde(skip)]
    named: bool,
}

/// Job configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name (the top-level key)
    #[serde(skip_deserializing)]
    pub name: String,

    /// Owning stage
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Shell commands, run in order
    #[serde(default)]
    pub script: Vec<String>,

    /// Ref matchers that must match for the job to run
    #[serde(default)]
    pub only: Vec<String>,

    /// Ref matchers that exclude the job
    #[serde(default)]
    pub except: Vec<String>,

    /// Files kept after a successful run
    #[serde(default)]
    pub artifacts: Option<ArtifactsConfig>,

    /// Job-level variables (override global ones)
    #[serde(default)]
    variables: Mapping,

    /// Per-job cache override (`false` disables the global cache)
    #[serde(default)]
    pub cache: Option<JobCacheConfig>,

    /// Upload build outputs to a named endpoint after the script succeeds
    #[serde(default)]
    pub publish: Option<PublishConfig>,

    /// A failure of this job does not block later stages
    #[serde(default)]
    pub allow_failure: bool,

    /// Timeout for this job in seconds
    #[serde(default, alias = "timeout")]
    pub timeout_secs: Option<u64>,
}

fn default_stage() -> String {
    DEFAULT_STAGE.to_string()
}

/// Cache block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache key, may reference variables
    #[serde(default)]
    pub key: Option<String>,

    /// Directories to persist, relative to the project dir
    #[serde(default)]
    pub paths: Vec<String>,

    /// Whether the job restores, saves, or both
    #[serde(default)]
    pub policy: CachePolicy,

    /// When the save happens
    #[serde(default)]
    pub when: CacheWhen,
}

impl CacheConfig {
    /// The raw (unexpanded) key
    pub fn key_template(&self) -> &str {
        self.key.as_deref().unwrap_or(DEFAULT_CACHE_KEY)
    }
}

/// Restore/save policy for a cache block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    #[default]
    PullPush,
    Pull,
    Push,
}

impl CachePolicy {
    pub fn restores(&self) -> bool {
        matches!(self, CachePolicy::PullPush | CachePolicy::Pull)
    }

    pub fn saves(&self) -> bool {
        matches!(self, CachePolicy::PullPush | CachePolicy::Push)
    }
}

/// When a cache save happens relative to the job outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheWhen {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
}

impl CacheWhen {
    pub fn applies(&self, job_succeeded: bool) -> bool {
        match self {
            CacheWhen::OnSuccess => job_succeeded,
            CacheWhen::OnFailure => !job_succeeded,
            CacheWhen::Always => true,
        }
    }
}

/// Job-level cache setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobCacheConfig {
    /// `cache: false` disables, `cache: true` inherits the global block
    Enabled(bool),
    /// A job-specific cache block replaces the global one
    Custom(CacheConfig),
}

/// Artifacts block
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Glob patterns relative to the project dir
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Publish block of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Name of an entry under `endpoints`
    pub endpoint: String,

    /// Glob patterns of the files to upload
    pub paths: Vec<String>,

    /// Skip artifacts that already exist remotely instead of failing
    #[serde(default = "default_true")]
    pub skip_existing: bool,
}

fn default_true() -> bool {
    true
}

/// A named publish destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default)]
    pub kind: EndpointKind,

    /// Root of the destination
    pub path: String,
}

/// Transport used by an endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// A filesystem root (local or mounted package index / site host)
    #[default]
    Directory,
}

impl JobConfig {
    /// Job variables in declaration order
    pub fn get_variables(&self) -> Vec<(String, String)> {
        mapping_to_pairs(&self.variables)
    }

    /// Resolve the effective cache block given the global one
    pub fn effective_cache(&self, global: Option<&CacheConfig>) -> Option<CacheConfig> {
        match &self.cache {
            None | Some(JobCacheConfig::Enabled(true)) => global.cloned(),
            Some(JobCacheConfig::Enabled(false)) => None,
            Some(JobCacheConfig::Custom(custom)) => Some(custom.clone()),
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    ///
    /// When the file sets no `name`, the file stem is used.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut config = Self::parse(&content)?;
        if !config.named {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                config.name = stem.trim_start_matches('.').to_string();
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config = Self::parse(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating
    pub fn parse(yaml: &str) -> Result<Self> {
        let raw: RawPipelineFile = serde_yaml::from_str(yaml)?;

        let mut jobs = Vec::new();
        for (key, value) in raw.jobs {
            let name = match key {
                Value::String(name) => name,
                other => anyhow::bail!("Job names must be strings, got {:?}", other),
            };
            if name.starts_with('.') {
                continue;
            }
            let mut job: JobConfig = serde_yaml::from_value(value)
                .with_context(|| format!("Invalid job '{}'", name))?;
            job.name = name;
            jobs.push(job);
        }

        Ok(PipelineConfig {
            named: raw.name.is_some(),
            name: raw.name.unwrap_or_else(default_name),
            project: raw.project,
            image: raw.image,
            variables: raw.variables,
            cache: raw.cache,
            before_script: raw.before_script,
            stages: raw
                .stages
                .unwrap_or_else(|| DEFAULT_STAGES.iter().map(|s| s.to_string()).collect()),
            endpoints: raw.endpoints,
            jobs,
        })
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.jobs.is_empty() {
            anyhow::bail!("Pipeline '{}' defines no jobs", self.name);
        }

        let mut seen_stages = HashSet::new();
        for stage in &self.stages {
            if !seen_stages.insert(stage) {
                anyhow::bail!("Duplicate stage: {}", stage);
            }
        }

        if let Some(cache) = &self.cache {
            validate_cache(cache, "global cache")?;
        }

        for job in &self.jobs {
            if !seen_stages.contains(&job.stage) {
                anyhow::bail!(
                    "Job '{}' uses stage '{}' which is not declared in stages",
                    job.name,
                    job.stage
                );
            }

            if job.script.is_empty() {
                anyhow::bail!("Job '{}' has an empty script", job.name);
            }

            JobSelector::from_patterns(&job.only, &job.except).with_context(|| {
                format!("Job '{}' has an invalid only/except pattern", job.name)
            })?;

            if let Some(JobCacheConfig::Custom(cache)) = &job.cache {
                validate_cache(cache, &format!("cache of job '{}'", job.name))?;
            }

            if let Some(publish) = &job.publish {
                if !self.endpoints.contains_key(&publish.endpoint) {
                    anyhow::bail!(
                        "Job '{}' publishes to unknown endpoint '{}'",
                        job.name,
                        publish.endpoint
                    );
                }
                if publish.paths.is_empty() {
                    anyhow::bail!("Job '{}' has a publish block with no paths", job.name);
                }
            }
        }

        Ok(())
    }

    /// Global variables in declaration order
    pub fn get_variables(&self) -> Vec<(String, String)> {
        mapping_to_pairs(&self.variables)
    }

    /// Jobs belonging to a stage, in definition order
    pub fn jobs_in_stage<'a>(&'a self, stage: &'a str) -> impl Iterator<Item = &'a JobConfig> {
        self.jobs.iter().filter(move |j| j.stage == stage)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}

fn default_name() -> String {
    "pipeline".to_string()
}

fn validate_cache(cache: &CacheConfig, what: &str) -> Result<()> {
    for path in &cache.paths {
        let p = Path::new(path);
        let escapes = p.is_absolute()
            || p.components().any(|c| matches!(c, Component::ParentDir));
        if escapes {
            anyhow::bail!("Path '{}' in {} must stay inside the project dir", path, what);
        }
    }
    Ok(())
}

/// Flatten a YAML mapping of scalars into ordered string pairs
fn mapping_to_pairs(mapping: &Mapping) -> Vec<(String, String)> {
    mapping
        .iter()
        .filter_map(|(key, value)| {
            let key = key.as_str()?.to_string();
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                other => serde_yaml::to_string(other)
                    .unwrap_or_default()
                    .trim_end()
                    .to_string(),
            };
            Some((key, value))
        })
        .collect()
}
