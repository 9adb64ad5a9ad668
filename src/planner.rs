//! Blueprint planning: one model call, with a fixed fallback manifest.

use uuid::Uuid;

use crate::blueprint::Blueprint;
use crate::gateway::{Attribution, ModelClient, ModelHint};
use crate::prompts::planner_prompt;

/// Quality score assigned to the fallback blueprint.
pub const FALLBACK_BLUEPRINT_QUALITY: f64 = 0.5;

/// Result of planning. Always carries a usable blueprint.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub blueprint: Blueprint,
    pub used_fallback: bool,
    /// Structural completeness in [0,1].
    pub quality: f64,
    /// Why the fallback was used, if it was.
    pub fallback_reason: Option<String>,
}

pub struct Planner {
    client: ModelClient,
    max_tokens: u32,
}

impl Planner {
    pub fn new(client: ModelClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Plan the file manifest for `request`. Never fails: any model or parse
    /// error yields the fallback blueprint.
    pub async fn plan(&self, request: &str, task_id: Option<Uuid>) -> PlanOutcome {
        let prompt = planner_prompt(request);
        let mut attribution = Attribution::new("planner");
        attribution.task_id = task_id;

        let raw = match self
            .client
            .generate(&prompt, self.max_tokens, ModelHint::Planner, attribution)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "planner call failed, using fallback blueprint");
                return fallback_outcome(request, format!("model error: {e}"));
            }
        };

        match Blueprint::parse(&raw) {
            Ok(blueprint) => {
                let quality = blueprint.structural_quality();
                tracing::info!(
                    project = %blueprint.document().project_name,
                    files = blueprint.len(),
                    quality,
                    "blueprint planned"
                );
                PlanOutcome {
                    blueprint,
                    used_fallback: false,
                    quality,
                    fallback_reason: None,
                }
            }
            Err(e) => {
                let preview: String = raw.chars().take(200).collect();
                tracing::warn!(error = %e, preview = %preview, "unusable blueprint, using fallback");
                fallback_outcome(request, e.to_string())
            }
        }
    }
}

fn fallback_outcome(request: &str, reason: String) -> PlanOutcome {
    PlanOutcome {
        blueprint: Blueprint::fallback(request),
        used_fallback: true,
        quality: FALLBACK_BLUEPRINT_QUALITY,
        fallback_reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        ChatGateway, ChatRequest, ChatResponse, FinishReason, ModelRoster, ProviderError,
    };
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixed(Result<&'static str, ()>);

    #[async_trait::async_trait]
    impl ChatGateway for Fixed {
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            match self.0 {
                Ok(content) => Ok(ChatResponse {
                    content: content.to_string(),
                    model: req.model.model_id().to_string(),
                    input_tokens: 0,
                    output_tokens: 0,
                    latency: Duration::ZERO,
                    finish_reason: FinishReason::Stop,
                }),
                Err(()) => Err(ProviderError::backend("openrouter", "down", true)),
            }
        }
    }

    fn planner(reply: Result<&'static str, ()>) -> Planner {
        let roster = ModelRoster {
            planner: "p".into(),
            code: "c".into(),
            critique: "k".into(),
            generation_temperature: 0.3,
        };
        Planner::new(ModelClient::new(Arc::new(Fixed(reply)), roster), 4000)
    }

    #[tokio::test]
    async fn model_blueprint_is_scored_structurally() {
        let out = planner(Ok(
            r#"Plan: {"project_name":"notes","core_entities":[],"backend":{"server.js":"entry"},"frontend":{"src/App.jsx":"ui"}}"#,
        ))
        .plan("notes app", None)
        .await;

        assert!(!out.used_fallback);
        // backend, frontend present; no entities; no manifests
        assert!((out.quality - 0.4).abs() < 1e-9);
        assert_eq!(out.blueprint.len(), 2);
    }

    #[tokio::test]
    async fn garbage_yields_fallback() {
        let out = planner(Ok("I'd be happy to help!")).plan("x", None).await;
        assert!(out.used_fallback);
        assert_eq!(out.quality, FALLBACK_BLUEPRINT_QUALITY);
        assert_eq!(out.blueprint.len(), 9);
    }

    #[tokio::test]
    async fn model_error_yields_fallback() {
        let out = planner(Err(())).plan("x", None).await;
        assert!(out.used_fallback);
        assert!(out.fallback_reason.unwrap().contains("model error"));
    }

    #[tokio::test]
    async fn empty_manifest_yields_fallback() {
        let out = planner(Ok(r#"{"backend":{},"frontend":{}}"#))
            .plan("x", None)
            .await;
        assert!(out.used_fallback);
    }
}
