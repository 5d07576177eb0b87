use tracing::{debug, error, info, warn};

use crate::config::{NuggetizerConfig, RetryPolicy};
use crate::error::{NuggetError, Result};
use crate::llm::Llm;
use crate::parser::extract_labels;
use crate::prompts::{render, PromptContext, Template};
use crate::retry::{generate_parsed, CancelSignal};
use crate::types::{AssignMode, Assignment, AssignedScoredNugget, ScoredNugget, StageOutput};
use crate::window::windows;

/// Judges how well one candidate answer supports each scored nugget.
pub struct NuggetAssigner<'a> {
    llm: &'a dyn Llm,
    mode: AssignMode,
    window_size: usize,
    retry: &'a RetryPolicy,
}

impl<'a> NuggetAssigner<'a> {
    pub fn new(llm: &'a dyn Llm, cfg: &'a NuggetizerConfig) -> Self {
        Self {
            llm,
            mode: cfg.assign_mode,
            window_size: cfg.assigner_window_size,
            retry: &cfg.retry,
        }
    }

    /// A blank answer supports nothing and never reaches the backend.
    /// Degraded nuggets are never sent to the model and stay `Failed`.
    pub async fn assign(
        &self,
        query: &str,
        answer: &str,
        nuggets: &[ScoredNugget],
        cancel: &CancelSignal,
    ) -> Result<StageOutput<AssignedScoredNugget>> {
        if answer.trim().is_empty() {
            debug!(nuggets = nuggets.len(), "empty answer, assigning not_support");
            let items = nuggets.iter().map(|n| with_assignment(n, blank_grade(n))).collect();
            return Ok(StageOutput::complete(items, 0));
        }

        let live: Vec<usize> = (0..nuggets.len()).filter(|&i| !nuggets[i].is_degraded()).collect();
        let mut grades: Vec<Option<Assignment>> =
            nuggets.iter().map(|n| n.is_degraded().then_some(Assignment::Failed)).collect();
        if live.is_empty() {
            let items = nuggets.iter().zip(grades).filter_map(|(n, g)| g.map(|g| with_assignment(n, g))).collect();
            return Ok(StageOutput::complete(items, 0));
        }

        let plan: Vec<_> = windows(live.len(), self.window_size, self.window_size)?.collect();
        let total = plan.len();
        let mut done = 0;

        for win in &plan {
            if cancel.is_cancelled() {
                warn!(done, total, "assignment cancelled between windows");
                break;
            }
            let slots = &live[win.start..win.end];
            let texts: Vec<String> = slots.iter().map(|&i| nuggets[i].nugget.text.clone()).collect();
            let prompt = render(
                Template::Assigner(self.mode),
                &PromptContext { query, context: answer, nuggets: &texts, max_nuggets: 0 },
            );
            let expected = win.len;
            debug!(start = win.start, end = win.end, "assigning nugget window");

            match generate_parsed(self.llm, &prompt, self.retry, cancel, |out| extract_labels(out, expected)).await {
                Ok(found) => {
                    for (&i, label) in slots.iter().zip(&found) {
                        grades[i] = Some(Assignment::from_label(label, self.mode));
                    }
                }
                Err(NuggetError::ExhaustedRetries { attempts, last_error }) => {
                    error!(start = win.start, attempts, %last_error, "assignment window exhausted retries");
                    for &i in slots {
                        grades[i] = Some(Assignment::Failed);
                    }
                }
                Err(NuggetError::Cancelled) => {
                    warn!(done, total, "assignment cancelled during retries");
                    break;
                }
                Err(e) => return Err(e),
            }
            done += 1;
        }

        let items: Vec<_> = nuggets
            .iter()
            .zip(grades)
            .filter_map(|(n, grade)| grade.map(|g| with_assignment(n, g)))
            .collect();
        info!(assigned = items.len(), windows = done, "nugget assignment finished");
        Ok(StageOutput { items, windows_completed: done, windows_total: total })
    }
}

fn blank_grade(nugget: &ScoredNugget) -> Assignment {
    if nugget.is_degraded() {
        Assignment::Failed
    } else {
        Assignment::NotSupport
    }
}

fn with_assignment(nugget: &ScoredNugget, assignment: Assignment) -> AssignedScoredNugget {
    AssignedScoredNugget { scored: nugget.clone(), assignment }
}
