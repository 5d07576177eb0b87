use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{NuggetError, Result};
use crate::types::{AssignMode, NuggetMode};

pub use crate::retry::{Backoff, RetryPolicy};

/// Pipeline configuration shared read-only by every query evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NuggetizerConfig {
    pub creator_mode: NuggetMode,
    pub assign_mode: AssignMode,
    /// Documents per creation window; also the creation stride.
    pub creator_window_size: usize,
    pub scorer_window_size: usize,
    pub assigner_window_size: usize,
    pub creator_max_nuggets: usize,
    pub scorer_max_nuggets: usize,
    /// Overrides all three per-stage window sizes when set.
    pub window_size: Option<usize>,
    /// Overrides both per-stage nugget caps when set.
    pub max_nuggets: Option<usize>,
    /// Queries evaluated concurrently by the batch helpers.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for NuggetizerConfig {
    fn default() -> Self {
        Self {
            creator_mode: NuggetMode::Atomic,
            assign_mode: AssignMode::SupportGrade3,
            creator_window_size: 10,
            scorer_window_size: 10,
            assigner_window_size: 10,
            creator_max_nuggets: 30,
            scorer_max_nuggets: 30,
            window_size: None,
            max_nuggets: None,
            concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl NuggetizerConfig {
    /// Reads a JSON config; fields it omits keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let cfg: Self = serde_json::from_str(&raw)?;
        cfg.resolved()
    }

    /// Applies the global overrides and validates the result.
    pub fn resolved(mut self) -> Result<Self> {
        if let Some(w) = self.window_size.take() {
            self.creator_window_size = w;
            self.scorer_window_size = w;
            self.assigner_window_size = w;
        }
        if let Some(m) = self.max_nuggets.take() {
            self.creator_max_nuggets = m;
            self.scorer_max_nuggets = m;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, size) in [
            ("creator_window_size", self.creator_window_size),
            ("scorer_window_size", self.scorer_window_size),
            ("assigner_window_size", self.assigner_window_size),
        ] {
            if size == 0 {
                return Err(NuggetError::InvalidWindowConfig(format!("{name} must be positive")));
            }
        }
        if self.concurrency == 0 {
            return Err(NuggetError::Configuration("concurrency must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(NuggetError::Configuration("retry.max_attempts must be positive".into()));
        }
        Ok(())
    }
}
