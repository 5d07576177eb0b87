use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{NuggetError, Result};
use crate::llm::{Llm, Prompt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    Fixed,
    Exponential,
}

/// Bounded retry budget for one window's generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_temperature: f32,
    /// Temperature used for every attempt after the first failure.
    pub fallback_temperature: f32,
    pub backoff: Backoff,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_temperature: 0.0,
            fallback_temperature: 0.2,
            backoff: Backoff::Exponential,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            call_timeout_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` is 1-based.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
                self.base_delay_ms.saturating_mul(factor)
            }
        };
        Duration::from_millis(ms.min(self.max_delay_ms))
    }

    pub fn temperature_for(&self, attempt: u32) -> f32 {
        if attempt <= 1 {
            self.initial_temperature
        } else {
            self.fallback_temperature
        }
    }
}

/// Cooperative cancellation checked between windows and between attempts.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Option<watch::Receiver<bool>>);

impl CancelSignal {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self(Some(rx))
    }

    /// A signal plus the sender that fires it.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(Some(rx)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.as_ref().is_some_and(|rx| *rx.borrow())
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(NuggetError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<()> {
        let Some(rx) = &self.0 else {
            tokio::time::sleep(delay).await;
            return Ok(());
        };
        let mut rx = rx.clone();
        let fired = tokio::select! {
            _ = tokio::time::sleep(delay) => return Ok(()),
            fired = rx.wait_for(|c| *c) => fired.is_ok(),
        };
        if fired {
            return Err(NuggetError::Cancelled);
        }
        // sender dropped: nobody can cancel any more
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

/// Calls the backend with `prompt` until `parse` accepts the completion.
///
/// The first attempt runs at the policy's initial temperature and every retry
/// at the fallback temperature. Transport errors and timeouts consume attempts
/// like parse failures do.
pub async fn generate_parsed<T, F>(
    llm: &dyn Llm,
    prompt: &Prompt,
    policy: &RetryPolicy,
    cancel: &CancelSignal,
    parse: F,
) -> Result<T>
where
    F: Fn(&str) -> Result<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = Duration::from_millis(policy.call_timeout_ms);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        cancel.check()?;
        let temperature = policy.temperature_for(attempt);
        debug!(attempt, temperature, "calling generation backend");

        let outcome = match tokio::time::timeout(timeout, llm.chat_many(vec![prompt.clone()], temperature)).await {
            Err(_) => Err(NuggetError::Backend(format!("call timed out after {}ms", policy.call_timeout_ms))),
            Ok(Err(e)) => Err(NuggetError::Backend(e.to_string())),
            Ok(Ok(mut texts)) if texts.len() == 1 => parse(&texts.remove(0)),
            Ok(Ok(texts)) => Err(NuggetError::Backend(format!("expected 1 completion, got {}", texts.len()))),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt, max_attempts, error = %e, "generation attempt failed");
                last_error = e.to_string();
            }
        }
        if attempt < max_attempts {
            cancel.sleep(policy.delay_after(attempt)).await?;
        }
    }

    Err(NuggetError::ExhaustedRetries { attempts: max_attempts, last_error })
}
