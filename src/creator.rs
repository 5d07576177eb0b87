use tracing::{debug, error, info, warn};

use crate::config::{NuggetizerConfig, RetryPolicy};
use crate::error::{NuggetError, Result};
use crate::llm::Llm;
use crate::parser::extract_list;
use crate::prompts::{render, PromptContext, Template};
use crate::retry::{generate_parsed, CancelSignal};
use crate::types::{Document, Nugget, NuggetMode, Request, StageOutput, FAILED};
use crate::window::windows;

/// Builds the nugget list for one request by refining it window by window.
pub struct NuggetCreator<'a> {
    llm: &'a dyn Llm,
    mode: NuggetMode,
    window_size: usize,
    max_nuggets: usize,
    retry: &'a RetryPolicy,
}

fn build_context(docs: &[Document]) -> String {
    docs.iter()
        .enumerate()
        .map(|(i, d)| match &d.title {
            Some(title) => format!("[{}] {}: {}", i + 1, title, d.text),
            None => format!("[{}] {}", i + 1, d.text),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn is_failed(nuggets: &[String]) -> bool {
    matches!(nuggets, [only] if only == FAILED)
}

impl<'a> NuggetCreator<'a> {
    pub fn new(llm: &'a dyn Llm, cfg: &'a NuggetizerConfig) -> Self {
        Self {
            llm,
            mode: cfg.creator_mode,
            window_size: cfg.creator_window_size,
            max_nuggets: cfg.creator_max_nuggets,
            retry: &cfg.retry,
        }
    }

    /// Each window replaces the running list with the model's revision of it.
    ///
    /// A window that exhausts its retry budget leaves the single sentinel
    /// nugget `failed`; the next window is prompted with an empty list and
    /// may recover.
    pub async fn create(&self, request: &Request, cancel: &CancelSignal) -> Result<StageOutput<Nugget>> {
        let qid = &request.query.id;
        if request.documents.is_empty() {
            debug!(qid = %qid, "no documents, nothing to create");
            return Ok(StageOutput::complete(Vec::new(), 0));
        }

        let plan: Vec<_> = windows(request.documents.len(), self.window_size, self.window_size)?.collect();
        let total = plan.len();
        let mut running: Vec<String> = Vec::new();

        for (done, win) in plan.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(qid = %qid, done, total, "creation cancelled between windows");
                return Ok(self.finish(qid, running, done, total));
            }
            debug!(qid = %qid, start = win.start, end = win.end, "creating nuggets for document window");

            let context = build_context(&request.documents[win.start..win.end]);
            let current: &[String] = if is_failed(&running) { &[] } else { &running };
            let prompt = render(
                Template::Creator(self.mode),
                &PromptContext {
                    query: &request.query.text,
                    context: &context,
                    nuggets: current,
                    max_nuggets: self.max_nuggets,
                },
            );

            match generate_parsed(self.llm, &prompt, self.retry, cancel, extract_list).await {
                Ok(mut nuggets) => {
                    nuggets.truncate(self.max_nuggets);
                    running = nuggets;
                }
                Err(NuggetError::ExhaustedRetries { attempts, last_error }) => {
                    error!(qid = %qid, start = win.start, attempts, %last_error, "creation window exhausted retries");
                    running = vec![FAILED.to_string()];
                }
                Err(NuggetError::Cancelled) => {
                    warn!(qid = %qid, done, total, "creation cancelled during retries");
                    return Ok(self.finish(qid, running, done, total));
                }
                Err(e) => return Err(e),
            }
        }

        info!(qid = %qid, nuggets = running.len(), windows = total, "nugget creation finished");
        Ok(self.finish(qid, running, total, total))
    }

    fn finish(&self, qid: &str, texts: Vec<String>, done: usize, total: usize) -> StageOutput<Nugget> {
        let items = texts.into_iter().enumerate().map(|(i, t)| Nugget::new(qid, i, t)).collect();
        StageOutput { items, windows_completed: done, windows_total: total }
    }
}
