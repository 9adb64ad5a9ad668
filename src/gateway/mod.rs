//! Model gateway: OpenRouter chat completions with retry, per-call timeout
//! and model fallback.

pub mod client;
pub mod error;
pub mod openrouter;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{sleep, timeout};

use openrouter::{ChatProvider, OpenRouterAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use client::{ModelClient, ModelHint, ModelRoster};
pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{MemoryUsageSink, NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Hard ceiling on a single attempt.
    pub call_timeout: Duration,
    /// Model tried once when the requested one is reported unavailable.
    pub fallback_model: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_base_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(60),
            fallback_model: None,
        }
    }
}

pub struct ProviderGateway<U: UsageSinkTrait> {
    openrouter: OpenRouterAdapter,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    pub fn from_env(usage_sink: Arc<U>, config: GatewayConfig) -> Result<Self, ProviderError> {
        let openrouter = OpenRouterAdapter::from_env()?;
        Ok(Self {
            openrouter,
            usage_sink,
            config,
        })
    }

    pub fn with_config(
        openrouter: OpenRouterAdapter,
        usage_sink: Arc<U>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            openrouter,
            usage_sink,
            config,
        }
    }

    /// Run a request, switching once to the fallback model if the requested
    /// model is unavailable.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        match self.chat_with_retries(&req).await {
            Err(ProviderError::ModelUnavailable { model, context }) => {
                let Some(fallback) = self
                    .config
                    .fallback_model
                    .as_deref()
                    .filter(|f| *f != req.model.model_id())
                else {
                    return Err(ProviderError::ModelUnavailable { model, context });
                };

                tracing::warn!(
                    unavailable = %model,
                    fallback = fallback,
                    caller = req.attribution.caller,
                    "model unavailable, switching to fallback"
                );
                let req = req.with_model(ChatModel::openrouter(fallback));
                self.chat_with_retries(&req).await
            }
            other => other,
        }
    }

    async fn chat_with_retries(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            let started = Instant::now();
            let result = match timeout(self.config.call_timeout, self.openrouter.chat(req)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.config.call_timeout)),
            };

            match result {
                Ok(resp) => {
                    self.record_success(req, &resp, attempt).await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_failure(req, &err, attempt, started.elapsed())
                        .await;

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    tracing::debug!(
                        model = req.model.model_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = err.code(),
                        "retrying model call"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::backend("openrouter", "unknown error", false)))
    }

    async fn record_success(&self, req: &ChatRequest, resp: &ChatResponse, attempt: u32) {
        let record = self
            .base_record(req, attempt)
            .tokens(resp.input_tokens, resp.output_tokens)
            .latency(resp.latency.as_millis() as u64);
        self.usage_sink.record(record).await;
    }

    async fn record_failure(
        &self,
        req: &ChatRequest,
        err: &ProviderError,
        attempt: u32,
        elapsed: Duration,
    ) {
        let record = self
            .base_record(req, attempt)
            .latency(elapsed.as_millis() as u64)
            .request_id(err.request_id().map(str::to_string))
            .error(err.code());
        self.usage_sink.record(record).await;
    }

    fn base_record(&self, req: &ChatRequest, attempt: u32) -> ProviderCallRecord {
        ProviderCallRecord::new(
            req.model.provider(),
            "chat/completions",
            req.model.model_id(),
            req.attribution.caller,
        )
        .task(req.attribution.task_id)
        .attempt(attempt)
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << attempt.min(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 9), Duration::from_secs(32));
        assert_eq!(backoff_delay(Duration::MAX, 3), Duration::MAX);
    }
}
