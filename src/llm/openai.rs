use anyhow::{anyhow, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use futures::{stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{Llm, Prompt};

/// Connection settings for an OpenAI-compatible chat endpoint (OpenAI, vLLM, ...).
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_concurrency: usize,
    pub requests_per_second: Option<u32>,
    pub timeout_ms: u64,
    pub max_tokens: u32,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            model: "mistralai/Mistral-7B-Instruct-v0.3".to_string(),
            base_url: None,
            api_key: None,
            max_concurrency: 16,
            requests_per_second: None,
            timeout_ms: 60_000,
            max_tokens: 2048,
        }
    }
}

#[derive(Clone)]
pub struct LlmClient {
    client: Client<OpenAIConfig>,
    model: String,
    max_concurrency: usize,
    max_tokens: u32,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl LlmClient {
    pub fn new(cfg: LlmClientConfig) -> Result<Self> {
        let mut oa = OpenAIConfig::default();
        if let Some(url) = cfg.base_url {
            oa = oa.with_api_base(url);
        }
        if let Some(key) = cfg.api_key {
            oa = oa.with_api_key(key);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()?;
        let client = Client::with_config(oa).with_http_client(http);
        let limiter = cfg
            .requests_per_second
            .and_then(NonZeroU32::new)
            .map(|qps| Arc::new(RateLimiter::direct(Quota::per_second(qps))));
        Ok(Self {
            client,
            model: cfg.model,
            max_concurrency: cfg.max_concurrency.max(1),
            max_tokens: cfg.max_tokens,
            limiter,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages(prompt: Prompt) -> Result<Vec<ChatCompletionRequestMessage>> {
        let sys = ChatCompletionRequestSystemMessageArgs::default()
            .content(prompt.system)
            .build()?
            .into();
        let usr = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.user)
            .build()?
            .into();
        Ok(vec![sys, usr])
    }

    async fn complete(&self, prompt: Prompt, temperature: f32) -> Result<String> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
        let req = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .messages(Self::messages(prompt)?)
            .temperature(temperature)
            .max_tokens(self.max_tokens)
            .build()?;
        let resp = self.client.chat().create(req).await?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("completion returned no choices"))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Llm for LlmClient {
    async fn chat_many(&self, prompts: Vec<Prompt>, temperature: f32) -> Result<Vec<String>> {
        let reqs = prompts.into_iter().enumerate().map(|(idx, prompt)| async move {
            let text = self.complete(prompt, temperature).await?;
            Ok::<_, anyhow::Error>((idx, text))
        });

        let mut out = stream::iter(reqs)
            .buffer_unordered(self.max_concurrency)
            .collect::<Vec<_>>()
            .await;

        out.sort_by_key(|r| r.as_ref().map(|(i, _)| *i).unwrap_or(usize::MAX));
        let mut texts = Vec::with_capacity(out.len());
        for r in out {
            let (_, t) = r?;
            texts.push(t);
        }
        Ok(texts)
    }
}
