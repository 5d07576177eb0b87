use tracing::{debug, error, info, warn};

use crate::config::{NuggetizerConfig, RetryPolicy};
use crate::error::{NuggetError, Result};
use crate::llm::Llm;
use crate::parser::extract_labels;
use crate::prompts::{render, PromptContext, Template};
use crate::retry::{generate_parsed, CancelSignal};
use crate::types::{Importance, Nugget, ScoredNugget, StageOutput};
use crate::window::windows;

/// Labels nuggets `vital` or `okay` in fixed, non-overlapping windows.
pub struct NuggetScorer<'a> {
    llm: &'a dyn Llm,
    window_size: usize,
    max_nuggets: usize,
    retry: &'a RetryPolicy,
}

impl<'a> NuggetScorer<'a> {
    pub fn new(llm: &'a dyn Llm, cfg: &'a NuggetizerConfig) -> Self {
        Self {
            llm,
            window_size: cfg.scorer_window_size,
            max_nuggets: cfg.scorer_max_nuggets,
            retry: &cfg.retry,
        }
    }

    /// Returns vital nuggets first, then the rest, each group in creation
    /// order, capped at the scorer's nugget limit.
    pub async fn score(
        &self,
        query: &str,
        nuggets: Vec<Nugget>,
        cancel: &CancelSignal,
    ) -> Result<StageOutput<ScoredNugget>> {
        if nuggets.is_empty() {
            return Ok(StageOutput::complete(Vec::new(), 0));
        }

        let plan: Vec<_> = windows(nuggets.len(), self.window_size, self.window_size)?.collect();
        let total = plan.len();
        let mut labels: Vec<Option<Importance>> = vec![None; nuggets.len()];
        let mut done = 0;

        for win in &plan {
            if cancel.is_cancelled() {
                warn!(done, total, "scoring cancelled between windows");
                break;
            }
            let texts: Vec<String> = nuggets[win.start..win.end].iter().map(|n| n.text.clone()).collect();
            let prompt = render(Template::Scorer, &PromptContext { query, nuggets: &texts, ..Default::default() });
            let expected = win.len;
            debug!(start = win.start, end = win.end, "scoring nugget window");

            match generate_parsed(self.llm, &prompt, self.retry, cancel, |out| extract_labels(out, expected)).await {
                Ok(found) => {
                    for (slot, label) in labels[win.start..win.end].iter_mut().zip(&found) {
                        *slot = Some(Importance::from_label(label));
                    }
                }
                Err(NuggetError::ExhaustedRetries { attempts, last_error }) => {
                    error!(start = win.start, attempts, %last_error, "scoring window exhausted retries");
                    labels[win.start..win.end].fill(Some(Importance::Failed));
                }
                Err(NuggetError::Cancelled) => {
                    warn!(done, total, "scoring cancelled during retries");
                    break;
                }
                Err(e) => return Err(e),
            }
            done += 1;
        }

        let mut scored: Vec<ScoredNugget> = nuggets
            .into_iter()
            .zip(labels)
            .filter_map(|(nugget, importance)| importance.map(|importance| ScoredNugget { nugget, importance }))
            .collect();
        // stable: creation order survives within each group
        scored.sort_by_key(|s| s.importance != Importance::Vital);
        scored.truncate(self.max_nuggets);

        info!(scored = scored.len(), windows = done, "nugget scoring finished");
        Ok(StageOutput { items: scored, windows_completed: done, windows_total: total })
    }
}
