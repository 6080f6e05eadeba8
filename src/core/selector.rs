//! Job selection by git ref (`only` / `except`)

use crate::core::context::{RefContext, RefKind};
use regex::Regex;

/// A single ref matcher as written in `only` or `except`
#[derive(Debug, Clone)]
pub enum RefMatcher {
    /// `tags`: any tag
    Tags,
    /// `branches`: any branch
    Branches,
    /// `/pattern/`: regular expression on the ref name
    Pattern(Regex),
    /// Anything else: exact ref name
    Exact(String),
}

impl RefMatcher {
    /// Parse a matcher from its YAML spelling
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let pattern = pattern.trim();
        match pattern {
            "tags" => Ok(RefMatcher::Tags),
            "branches" => Ok(RefMatcher::Branches),
            _ if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') => {
                Regex::new(&pattern[1..pattern.len() - 1]).map(RefMatcher::Pattern)
            }
            _ => Ok(RefMatcher::Exact(pattern.to_string())),
        }
    }

    /// Check if the matcher accepts the given ref
    pub fn matches(&self, refs: &RefContext) -> bool {
        match self {
            RefMatcher::Tags => refs.kind == RefKind::Tag,
            RefMatcher::Branches => refs.kind == RefKind::Branch,
            RefMatcher::Pattern(regex) => regex.is_match(&refs.name),
            RefMatcher::Exact(name) => refs.name == *name,
        }
    }
}

/// Decides whether a job runs for the current ref
#[derive(Debug, Clone, Default)]
pub struct JobSelector {
    only: Vec<RefMatcher>,
    except: Vec<RefMatcher>,
}

impl JobSelector {
    /// Build a selector from the raw `only` and `except` lists
    pub fn from_patterns(only: &[String], except: &[String]) -> Result<Self, regex::Error> {
        let only = only.iter().map(|s| RefMatcher::parse(s)).collect::<Result<_, _>>()?;
        let except = except.iter().map(|s| RefMatcher::parse(s)).collect::<Result<_, _>>()?;
        Ok(Self { only, except })
    }

    /// Selector with no restriction
    pub fn always() -> Self {
        Self::default()
    }

    /// Check if the job is included for this ref
    pub fn includes(&self, refs: &RefContext) -> bool {
        self.exclusion_reason(refs).is_none()
    }

    /// Why the job is excluded for this ref, if it is
    pub fn exclusion_reason(&self, refs: &RefContext) -> Option<String> {
        if !self.only.is_empty() && !self.only.iter().any(|m| m.matches(refs)) {
            return Some(format!("'only' does not match {}", refs));
        }
        if self.except.iter().any(|m| m.matches(refs)) {
            return Some(format!("'except' matches {}", refs));
        }
        None
    }
}
