use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::assigner::NuggetAssigner;
use crate::config::NuggetizerConfig;
use crate::creator::NuggetCreator;
use crate::error::{NuggetError, Result};
use crate::llm::Llm;
use crate::metrics::{judgments_from_assigned, QueryJudgments};
use crate::retry::CancelSignal;
use crate::scorer::NuggetScorer;
use crate::types::{AssignedScoredNugget, Importance, Request, ScoredNugget, StageOutput};

/// Creation plus scoring output for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryNuggets {
    pub qid: String,
    pub query: String,
    pub nuggets: Vec<ScoredNugget>,
}

/// One answer to assign: the query it answers and the nuggets to judge it by.
#[derive(Debug, Clone)]
pub struct AssignItem {
    pub qid: String,
    pub query: String,
    pub answer: String,
    pub nuggets: Vec<ScoredNugget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAssignments {
    pub qid: String,
    pub nuggets: Vec<AssignedScoredNugget>,
}

impl QueryAssignments {
    pub fn judgments(&self, cfg: &NuggetizerConfig, skip_degraded: bool) -> QueryJudgments {
        judgments_from_assigned(&self.nuggets, cfg.assign_mode, skip_degraded)
    }
}

/// Creator, scorer and assigner sharing one backend handle and configuration.
///
/// Windows of a single query run strictly in sequence; the batch helpers run
/// independent queries concurrently.
#[derive(Clone)]
pub struct Nuggetizer {
    llm: Arc<dyn Llm>,
    cfg: Arc<NuggetizerConfig>,
}

impl Nuggetizer {
    pub fn new(llm: Arc<dyn Llm>, cfg: NuggetizerConfig) -> Result<Self> {
        let cfg = cfg.resolved()?;
        Ok(Self { llm, cfg: Arc::new(cfg) })
    }

    pub fn config(&self) -> &NuggetizerConfig {
        &self.cfg
    }

    /// Creates and scores nuggets for one request.
    ///
    /// Window counts cover both stages. Degraded nuggets skip the scorer and
    /// come back last with `Importance::Failed`.
    pub async fn create(&self, request: &Request, cancel: &CancelSignal) -> Result<StageOutput<ScoredNugget>> {
        let created = NuggetCreator::new(self.llm.as_ref(), &self.cfg).create(request, cancel).await?;
        let StageOutput { items, windows_completed, windows_total } = created;
        let unscored = |nugget| ScoredNugget { nugget, importance: Importance::Failed };
        if windows_completed < windows_total {
            // interrupted before scoring: nuggets carry no importance
            return Ok(StageOutput { items: items.into_iter().map(unscored).collect(), windows_completed, windows_total });
        }

        let (degraded, live): (Vec<_>, Vec<_>) = items.into_iter().partition(|n| n.is_degraded());
        if !degraded.is_empty() {
            warn!(qid = %request.query.id, degraded = degraded.len(), "degraded nuggets left unscored");
        }
        let scored = NuggetScorer::new(self.llm.as_ref(), &self.cfg)
            .score(&request.query.text, live, cancel)
            .await?;
        let mut items = scored.items;
        items.extend(degraded.into_iter().map(unscored));
        Ok(StageOutput {
            items,
            windows_completed: windows_completed + scored.windows_completed,
            windows_total: windows_total + scored.windows_total,
        })
    }

    pub async fn assign(
        &self,
        query: &str,
        answer: &str,
        nuggets: &[ScoredNugget],
        cancel: &CancelSignal,
    ) -> Result<StageOutput<AssignedScoredNugget>> {
        NuggetAssigner::new(self.llm.as_ref(), &self.cfg).assign(query, answer, nuggets, cancel).await
    }

    /// One result per request, in input order. A query interrupted by
    /// cancellation yields `Cancelled`; finished queries are kept.
    pub async fn create_batch(&self, requests: &[Request], cancel: &CancelSignal) -> Vec<Result<QueryNuggets>> {
        let tasks = requests.iter().enumerate().map(|(idx, req)| async move {
            let out = self.create(req, cancel).await.and_then(|out| {
                if out.is_complete() {
                    Ok(QueryNuggets { qid: req.query.id.clone(), query: req.query.text.clone(), nuggets: out.items })
                } else {
                    Err(NuggetError::Cancelled)
                }
            });
            (idx, out)
        }).collect::<Vec<_>>();
        let results = self.run_ordered(tasks.into_iter()).await;
        info!(queries = results.len(), "batch creation finished");
        results
    }

    pub async fn assign_batch(&self, items: &[AssignItem], cancel: &CancelSignal) -> Vec<Result<QueryAssignments>> {
        let tasks = items.iter().enumerate().map(|(idx, item)| async move {
            let out = self.assign(&item.query, &item.answer, &item.nuggets, cancel).await.and_then(|out| {
                if out.is_complete() {
                    Ok(QueryAssignments { qid: item.qid.clone(), nuggets: out.items })
                } else {
                    Err(NuggetError::Cancelled)
                }
            });
            (idx, out)
        }).collect::<Vec<_>>();
        let results = self.run_ordered(tasks.into_iter()).await;
        info!(answers = results.len(), "batch assignment finished");
        results
    }

    async fn run_ordered<T, I, F>(&self, tasks: I) -> Vec<T>
    where
        I: Iterator<Item = F>,
        F: std::future::Future<Output = (usize, T)>,
    {
        let mut out = stream::iter(tasks).buffer_unordered(self.cfg.concurrency).collect::<Vec<_>>().await;
        out.sort_by_key(|(i, _)| *i);
        out.into_iter().map(|(_, r)| r).collect()
    }
}
