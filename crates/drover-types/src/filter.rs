//! Per-image path exclusion filters.
//!
//! A filter is a list of anchored regular expressions over full
//! pathnames. A matched path is invisible to reconciliation: never
//! deleted, created, changed, or compared. Filters protect node-local
//! paths (logs, local configuration) from being overwritten by an image.

use regex::Regex;
use thiserror::Error;

/// Filter construction errors.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// A compiled path exclusion filter.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<Regex>,
}

impl PathFilter {
    /// A filter matching nothing: every path participates in
    /// reconciliation.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compile a list of patterns. Each pattern is implicitly anchored to
    /// the whole pathname.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, FilterError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let anchored = format!("^(?:{pattern})$");
            let regex = Regex::new(&anchored).map_err(|source| FilterError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            })?;
            compiled.push(regex);
        }
        Ok(Self { patterns: compiled })
    }

    /// Whether the path is excluded from reconciliation.
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(path))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
