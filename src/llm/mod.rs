pub mod openai;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A rendered chat prompt: one system message and one user message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Generation backend. Returns one completion per prompt, in prompt order.
#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    async fn chat_many(&self, prompts: Vec<Prompt>, temperature: f32) -> Result<Vec<String>>;
}
