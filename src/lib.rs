//! Nugget-based evaluation of generated answers.
//!
//! A [`pipeline::Nuggetizer`] extracts atomic facts ("nuggets") from a query's
//! documents, labels each as `vital` or `okay`, and judges how well candidate
//! answers support them. [`metrics`] turns those judgments into per-query
//! scores.

pub mod assigner;
pub mod config;
pub mod creator;
pub mod error;
pub mod io;
pub mod llm;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod scorer;
pub mod server;
pub mod types;
pub mod window;

pub use config::NuggetizerConfig;
pub use error::{NuggetError, Result};
pub use llm::{Llm, Prompt};
pub use metrics::{evaluate, Measure, Metric, MetricConfig, NuggetMetrics, ScoreKind};
pub use pipeline::{AssignItem, Nuggetizer, QueryAssignments, QueryNuggets};
pub use retry::CancelSignal;
pub use types::{
    AssignMode, AssignedScoredNugget, Assignment, Document, Importance, Nugget, NuggetMode, Query, Request,
    ScoredNugget, StageOutput,
};
