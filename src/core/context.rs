//! Run context - the ref being built and the variables each job sees

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Kind of git ref a pipeline runs for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

/// The branch or tag that triggered the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefContext {
    pub kind: RefKind,
    pub name: String,
}

impl RefContext {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Branch,
            name: name.into(),
        }
    }

    pub fn tag(name: impl Into<String>) -> Self {
        Self {
            kind: RefKind::Tag,
            name: name.into(),
        }
    }

    /// Detect the current ref from the git checkout in `dir`
    ///
    /// A tag pointing exactly at HEAD wins over the branch name.
    pub async fn detect(dir: &Path) -> anyhow::Result<Self> {
        if let Some(tag) = git_output(dir, &["describe", "--tags", "--exact-match"]).await {
            debug!("Detected tag ref: {}", tag);
            return Ok(Self::tag(tag));
        }

        match git_output(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).await {
            Some(branch) if branch != "HEAD" => {
                debug!("Detected branch ref: {}", branch);
                Ok(Self::branch(branch))
            }
            _ => anyhow::bail!(
                "Could not detect a branch or tag in {}; pass --branch or --tag",
                dir.display()
            ),
        }
    }

    /// Predefined variables describing this ref
    pub fn variables(&self) -> Vec<(String, String)> {
        let mut vars = vec![("CI_COMMIT_REF_NAME".to_string(), self.name.clone())];
        match self.kind {
            RefKind::Branch => vars.push(("CI_COMMIT_BRANCH".to_string(), self.name.clone())),
            RefKind::Tag => vars.push(("CI_COMMIT_TAG".to_string(), self.name.clone())),
        }
        vars
    }
}

impl fmt::Display for RefContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            RefKind::Branch => write!(f, "branch '{}'", self.name),
            RefKind::Tag => write!(f, "tag '{}'", self.name),
        }
    }
}

async fn git_output(dir: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Execution context for a pipeline run
///
/// Holds everything needed to build the fresh environment of each job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub execution_id: Uuid,
    pub project_name: String,
    pub project_dir: PathBuf,
    pub refs: RefContext,
    pub image: Option<String>,

    /// Pipeline-level variables in declaration order (not yet expanded)
    pub variables: Vec<(String, String)>,

    /// Run-level overrides (`--variable`), applied after job variables
    #[serde(default)]
    pub overrides: Vec<(String, String)>,
}

impl PipelineContext {
    /// Predefined CI variables for the run
    pub fn predefined_variables(&self) -> Vec<(String, String)> {
        let mut vars = vec![
            ("CI".to_string(), "true".to_string()),
            ("CI_PIPELINE_ID".to_string(), self.execution_id.to_string()),
            ("CI_PROJECT_NAME".to_string(), self.project_name.clone()),
            ("CI_PROJECT_DIR".to_string(), self.project_dir.display().to_string()),
        ];
        vars.extend(self.refs.variables());
        if let Some(image) = &self.image {
            vars.push(("CI_JOB_IMAGE".to_string(), image.clone()));
        }
        vars
    }

    /// Build the full, expanded variable set for one job
    ///
    /// Order of precedence (later wins): predefined, pipeline, job, overrides.
    /// Each value may reference anything defined before it.
    pub fn job_variables(
        &self,
        job_name: &str,
        stage: &str,
        job_vars: &[(String, String)],
    ) -> Vec<(String, String)> {
        let mut resolved: Vec<(String, String)> = self.predefined_variables();
        resolved.push(("CI_JOB_NAME".to_string(), job_name.to_string()));
        resolved.push(("CI_JOB_STAGE".to_string(), stage.to_string()));

        let mut lookup: HashMap<String, String> = resolved.iter().cloned().collect();
        let layers = self
            .variables
            .iter()
            .chain(job_vars.iter())
            .chain(self.overrides.iter());
        for (key, raw) in layers {
            let value = expand_variables(raw, &lookup);
            lookup.insert(key.clone(), value.clone());
            match resolved.iter_mut().find(|(k, _)| k == key) {
                Some(entry) => entry.1 = value,
                None => resolved.push((key.clone(), value)),
            }
        }
        resolved
    }
}

/// Expand `$NAME` and `${NAME}` references; `$$` is a literal `$`
///
/// Unknown names expand to an empty string, as a shell would.
pub fn expand_variables(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if closed {
                    out.push_str(vars.get(&name).map(String::as_str).unwrap_or(""));
                } else {
                    out.push_str("${");
                    out.push_str(&name);
                }
            }
            Some(n) if n.is_ascii_alphabetic() || n == '_' => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(vars.get(&name).map(String::as_str).unwrap_or(""));
            }
            _ => out.push('$'),
        }
    }

    out
}
