#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use nuggetizer_rs::llm::{Llm, Prompt};
use nuggetizer_rs::parser::extract_list;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Stage a prompt was rendered for, recovered from its system message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Create,
    Score,
    Assign,
}

pub fn stage(p: &Prompt) -> Stage {
    if p.system.contains("NuggetizeScoreLLM") {
        Stage::Score
    } else if p.system.contains("NuggetizeAssignerLLM") {
        Stage::Assign
    } else {
        Stage::Create
    }
}

/// Value of the first `label: value` line of the user message.
pub fn field<'a>(p: &'a Prompt, label: &str) -> &'a str {
    let prefix = format!("{label}: ");
    p.user.lines().find_map(|l| l.strip_prefix(prefix.as_str())).unwrap_or("")
}

pub fn nugget_list(p: &Prompt) -> Vec<String> {
    extract_list(field(p, "Nugget List")).unwrap_or_default()
}

pub fn labels(labels: impl IntoIterator<Item = &'static str>) -> String {
    let quoted: Vec<String> = labels.into_iter().map(|l| format!("'{l}'")).collect();
    format!("[{}]", quoted.join(", "))
}

pub struct FakeLlm {
    // maps each prompt to a completion
    pub handler: Box<dyn Fn(&Prompt) -> String + Send + Sync>,
    pub delay_ms: u64,
    pub fail_transport: bool,
    pub calls: AtomicUsize,
}

impl FakeLlm {
    pub fn new(handler: impl Fn(&Prompt) -> String + Send + Sync + 'static) -> Self {
        Self { handler: Box::new(handler), delay_ms: 0, fail_transport: false, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Llm for FakeLlm {
    async fn chat_many(&self, prompts: Vec<Prompt>, _temperature: f32) -> Result<Vec<String>> {
        use tokio::time::{sleep, Duration};
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transport {
            bail!("connection refused");
        }
        let mut outs = Vec::with_capacity(prompts.len());
        for p in prompts.iter() {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            outs.push((self.handler)(p));
        }
        Ok(outs)
    }
}

/// Creates two fixed nuggets, marks nuggets mentioning "capital" vital, and
/// supports a nugget when the answer contains its last word.
pub fn capital_judge() -> FakeLlm {
    FakeLlm::new(|p| match stage(p) {
        Stage::Create => r#"["Paris is the capital of France", "France borders Spain"]"#.to_string(),
        Stage::Score => {
            let ls: Vec<&'static str> =
                nugget_list(p).iter().map(|n| if n.contains("capital") { "vital" } else { "okay" }).collect();
            labels(ls)
        }
        Stage::Assign => {
            let passage = field(p, "Passage").to_lowercase();
            let ls: Vec<&'static str> = nugget_list(p)
                .iter()
                .map(|n| {
                    let last = n.split_whitespace().last().unwrap_or("").to_lowercase();
                    if passage.contains(&last) {
                        "support"
                    } else {
                        "not_support"
                    }
                })
                .collect();
            labels(ls)
        }
    })
}
