//! Stage-level model client: maps a pipeline stage to a model and sampling
//! settings, then goes through the gateway.

use std::sync::Arc;

use crate::config::WeaverConfig;
use crate::prompts::PromptInstance;

use super::{Attribution, ChatGateway, ChatModel, ChatRequest, ProviderError};

/// Which pipeline stage is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelHint {
    Planner,
    Code,
    Critique,
}

/// Fixed model ids per stage.
#[derive(Debug, Clone)]
pub struct ModelRoster {
    pub planner: String,
    pub code: String,
    pub critique: String,
    pub generation_temperature: f32,
}

impl ModelRoster {
    pub fn from_config(config: &WeaverConfig) -> Self {
        Self {
            planner: config.planner_model.clone(),
            code: config.code_model.clone(),
            critique: config.critique_model.clone(),
            generation_temperature: config.generation_temperature,
        }
    }

    fn model_for(&self, hint: ModelHint) -> &str {
        match hint {
            ModelHint::Planner => &self.planner,
            ModelHint::Code => &self.code,
            ModelHint::Critique => &self.critique,
        }
    }
}

/// One text-completion call per `generate`.
///
/// Retries, per-attempt timeout and model fallback are handled by the
/// underlying [`ChatGateway`]. No caching.
#[derive(Clone)]
pub struct ModelClient {
    gateway: Arc<dyn ChatGateway>,
    roster: ModelRoster,
}

impl ModelClient {
    pub fn new(gateway: Arc<dyn ChatGateway>, roster: ModelRoster) -> Self {
        Self { gateway, roster }
    }

    pub fn roster(&self) -> &ModelRoster {
        &self.roster
    }

    pub async fn generate(
        &self,
        prompt: &PromptInstance,
        max_tokens: u32,
        hint: ModelHint,
        attribution: Attribution,
    ) -> Result<String, ProviderError> {
        let model = ChatModel::openrouter(self.roster.model_for(hint));
        let req = ChatRequest::new(model, prompt.to_messages(), attribution).max_tokens(max_tokens);

        let req = match hint {
            ModelHint::Planner => req.temperature(0.2).json(),
            ModelHint::Code => req.temperature(self.roster.generation_temperature),
            ModelHint::Critique => req.temperature(0.1).json(),
        };

        let resp = self.gateway.chat(req).await?;
        tracing::debug!(
            template = %prompt.template_slug,
            model = %resp.model,
            output_tokens = resp.output_tokens,
            latency_ms = resp.latency.as_millis() as u64,
            "model call complete"
        );
        Ok(resp.content)
    }
}
