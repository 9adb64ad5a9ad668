//! Post-generation coherence critique.
//!
//! One model call over the blueprint and the list of generated paths. The
//! verdict feeds `interconnection_score`; refinements are only recorded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::blueprint::Blueprint;
use crate::extract::parse_embedded;
use crate::gateway::{Attribution, ModelClient, ModelHint};
use crate::prompts::critique_prompt;

/// Score used when the critique cannot be obtained.
pub const DEFAULT_WEAVING_SCORE: f64 = 5.0;

/// Refinements surfaced per task.
pub const MAX_REFINEMENTS: usize = 3;

/// One suggested follow-up edit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Refinement {
    pub file: Option<String>,
    pub suggestion: String,
}

impl std::fmt::Display for Refinement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}: {}", self.suggestion),
            None => f.write_str(&self.suggestion),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CritiqueResult {
    /// In [1,10].
    pub weaving_score: f64,
    pub interconnectivity_analysis: String,
    pub critical_issues: Vec<String>,
    pub refinements: Vec<Refinement>,
    /// True when this is the default verdict after a failure.
    pub degraded: bool,
}

impl CritiqueResult {
    pub fn interconnection_score(&self) -> f64 {
        self.weaving_score / 10.0
    }

    /// The refinements that will be surfaced as intents.
    pub fn top_refinements(&self) -> &[Refinement] {
        let n = self.refinements.len().min(MAX_REFINEMENTS);
        &self.refinements[..n]
    }

    fn fallback(reason: impl Into<String>) -> Self {
        Self {
            weaving_score: DEFAULT_WEAVING_SCORE,
            interconnectivity_analysis: String::new(),
            critical_issues: vec![format!("critique unavailable: {}", reason.into())],
            refinements: Vec::new(),
            degraded: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRefinement {
    Text(String),
    Targeted {
        #[serde(default)]
        file: Option<String>,
        #[serde(alias = "description", alias = "change")]
        suggestion: String,
    },
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct RawCritique {
    weaving_score: Value,
    #[serde(default)]
    interconnectivity_analysis: Value,
    #[serde(default)]
    critical_issues: Vec<Value>,
    #[serde(default)]
    refinements: Vec<RawRefinement>,
}

fn value_text(v: Value) -> Option<String> {
    let s = match v {
        Value::String(s) => s,
        Value::Null => return None,
        other => other.to_string(),
    };
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

fn score_of(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().split('/').next()?.trim().parse().ok(),
        _ => None,
    }
    .filter(|x: &f64| x.is_finite())
}

/// Parse the critique reply. `None` if no usable score is present.
pub fn parse_critique(raw: &str) -> Option<CritiqueResult> {
    let parsed: RawCritique = parse_embedded(raw).ok()?;
    let score = score_of(&parsed.weaving_score)?.clamp(1.0, 10.0);

    let refinements = parsed
        .refinements
        .into_iter()
        .filter_map(|r| match r {
            RawRefinement::Text(s) => value_text(Value::String(s)).map(|suggestion| Refinement {
                file: None,
                suggestion,
            }),
            RawRefinement::Targeted { file, suggestion } => {
                value_text(Value::String(suggestion)).map(|suggestion| Refinement {
                    file: file.filter(|f| !f.trim().is_empty()),
                    suggestion,
                })
            }
            RawRefinement::Other(v) => value_text(v).map(|suggestion| Refinement {
                file: None,
                suggestion,
            }),
        })
        .collect();

    Some(CritiqueResult {
        weaving_score: score,
        interconnectivity_analysis: value_text(parsed.interconnectivity_analysis)
            .unwrap_or_default(),
        critical_issues: parsed
            .critical_issues
            .into_iter()
            .filter_map(value_text)
            .collect(),
        refinements,
        degraded: false,
    })
}

pub struct CritiqueAnalyzer {
    client: ModelClient,
    max_tokens: u32,
}

impl CritiqueAnalyzer {
    pub fn new(client: ModelClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Review the generated file set. Never fails.
    pub async fn analyze(
        &self,
        blueprint: &Blueprint,
        generated_paths: &[String],
        task_id: Option<Uuid>,
    ) -> CritiqueResult {
        let prompt = critique_prompt(blueprint, generated_paths);
        let mut attribution = Attribution::new("critique");
        attribution.task_id = task_id;

        let raw = match self
            .client
            .generate(&prompt, self.max_tokens, ModelHint::Critique, attribution)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "critique call failed");
                return CritiqueResult::fallback(format!("model error: {e}"));
            }
        };

        match parse_critique(&raw) {
            Some(result) => result,
            None => {
                let preview: String = raw.chars().take(200).collect();
                tracing::warn!(preview = %preview, "unparseable critique");
                CritiqueResult::fallback("unparseable response")
            }
        }
    }
}
