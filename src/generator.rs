//! Tiered, dependency-ordered file synthesis.
//!
//! Within a tier, files are grouped into category buckets and emitted bucket
//! by bucket so that files others import (manifests, models, clients) come
//! first. Ties keep blueprint declaration order.

use serde::Serialize;

use crate::blueprint::{Blueprint, FileCategory, PlannedFile, Tier};
use crate::events::{LogLevel, TaskEvent};
use crate::gateway::{Attribution, ModelClient, ModelHint};
use crate::pipeline::TaskContext;
use crate::prompts::file_prompt;
use crate::state::{StateError, StateUpdate};
use crate::validator::validate;
use crate::workspace::TaskWorkspace;

const BACKEND_PRECEDENCE: &[&[FileCategory]] = &[
    &[FileCategory::Manifest, FileCategory::Config],
    &[FileCategory::Model],
    &[FileCategory::Controller, FileCategory::Service],
    &[FileCategory::Route, FileCategory::Middleware],
    &[FileCategory::Entrypoint],
    &[FileCategory::EnvFile],
];

const FRONTEND_PRECEDENCE: &[&[FileCategory]] = &[
    &[FileCategory::Manifest, FileCategory::Config],
    &[FileCategory::ApiClient],
    &[FileCategory::Store],
    &[FileCategory::Hook],
    &[FileCategory::Component],
    &[FileCategory::Page],
    &[FileCategory::Entry],
];

fn precedence(tier: Tier) -> &'static [&'static [FileCategory]] {
    match tier {
        Tier::Backend => BACKEND_PRECEDENCE,
        Tier::Frontend => FRONTEND_PRECEDENCE,
    }
}

/// Bucket index for `category`; unlisted categories land after every bucket.
fn bucket_of(tier: Tier, category: FileCategory) -> usize {
    let buckets = precedence(tier);
    buckets
        .iter()
        .position(|b| b.contains(&category))
        .unwrap_or(buckets.len())
}

/// Generation order for one tier. Always returns every planned file of the
/// tier exactly once.
pub fn order_tier(blueprint: &Blueprint, tier: Tier) -> Vec<&PlannedFile> {
    let mut files: Vec<&PlannedFile> = blueprint.tier_files(tier).collect();
    // stable: ties keep declaration order
    files.sort_by_key(|f| bucket_of(tier, f.category));
    files
}

/// Outcome for one path.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedFile {
    pub tier: Tier,
    pub path: String,
    pub category: FileCategory,
    #[serde(skip)]
    pub content: String,
    /// Model output passed validation.
    pub accepted: bool,
    /// Content reached disk.
    pub written: bool,
    pub rejection: Option<String>,
}

impl GeneratedFile {
    pub fn display_path(&self) -> String {
        format!("{}/{}", self.tier, self.path)
    }
}

/// Counters carried across both tiers of one task.
#[derive(Debug, Clone, Default)]
pub struct GenerationProgress {
    pub total_files: usize,
    pub attempted: usize,
    pub written: usize,
    pub accepted: usize,
}

impl GenerationProgress {
    pub fn new(total_files: usize) -> Self {
        Self {
            total_files,
            ..Default::default()
        }
    }

    /// Accepted share of attempted files, 0 when nothing was attempted.
    pub fn code_quality(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            self.accepted as f64 / self.attempted as f64
        }
    }
}

pub struct TieredGenerator {
    client: ModelClient,
    max_tokens: u32,
}

impl TieredGenerator {
    pub fn new(client: ModelClient, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    /// Generate every file of `tier`.
    ///
    /// Per-file model errors, validator rejections and write failures are
    /// absorbed. Only a rejected registry update (task already terminated)
    /// stops the tier.
    pub async fn generate_tier(
        &self,
        ctx: &TaskContext,
        blueprint: &Blueprint,
        tier: Tier,
        workspace: &mut TaskWorkspace,
        progress: &mut GenerationProgress,
        percent_span: (u8, u8),
    ) -> Result<Vec<GeneratedFile>, StateError> {
        let ordered = order_tier(blueprint, tier);
        let tier_total = ordered.len();
        let mut out = Vec::with_capacity(tier_total);

        tracing::info!(task_id = %ctx.task_id, tier = %tier, files = tier_total, "generating tier");

        for (i, file) in ordered.into_iter().enumerate() {
            let generated = self.generate_file(ctx, blueprint, file, workspace).await;

            progress.attempted += 1;
            if generated.accepted {
                progress.accepted += 1;
            }
            if generated.written {
                progress.written += 1;
            }

            let percent = span_percent(percent_span, i + 1, tier_total);
            ctx.registry.update(
                ctx.task_id,
                StateUpdate::new()
                    .progress(percent)
                    .phase(format!("generating {tier}: {}", file.path))
                    .files(progress.written, progress.total_files),
            )?;

            let message = match (generated.written, generated.accepted) {
                (false, _) => format!("Failed to write {}", generated.display_path()),
                (true, true) => format!("Generated {}", generated.display_path()),
                (true, false) => format!("Generated {} (fallback)", generated.display_path()),
            };
            ctx.events
                .publish(ctx.task_id, TaskEvent::progress(message, percent));

            out.push(generated);
        }

        let tier_written = out.iter().filter(|f| f.written).count();
        ctx.events.publish(
            ctx.task_id,
            TaskEvent::log(
                format!("{tier}: {tier_written}/{tier_total} files generated"),
                if tier_written == tier_total {
                    LogLevel::Info
                } else {
                    LogLevel::Warning
                },
            ),
        );

        Ok(out)
    }

    async fn generate_file(
        &self,
        ctx: &TaskContext,
        blueprint: &Blueprint,
        file: &PlannedFile,
        workspace: &mut TaskWorkspace,
    ) -> GeneratedFile {
        let prompt = file_prompt(blueprint, file);
        let attribution = Attribution::new("generator::file").with_task(ctx.task_id);
        let output = self
            .client
            .generate(&prompt, self.max_tokens, ModelHint::Code, attribution)
            .await;

        let validated = validate(file, output);
        if let Some(reason) = &validated.rejection {
            tracing::warn!(
                task_id = %ctx.task_id,
                tier = %file.tier,
                path = %file.path,
                category = file.category.as_str(),
                reason = %reason,
                "using fallback content"
            );
        }

        let written = match workspace
            .write_file(
                file.tier,
                &file.path,
                file.category,
                &validated.content,
                validated.accepted,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    task_id = %ctx.task_id,
                    tier = %file.tier,
                    path = %file.path,
                    error = %e,
                    "failed to write file"
                );
                false
            }
        };

        GeneratedFile {
            tier: file.tier,
            path: file.path.clone(),
            category: file.category,
            content: validated.content,
            accepted: validated.accepted,
            written,
            rejection: validated.rejection.map(|r| r.to_string()),
        }
    }
}

fn span_percent((start, end): (u8, u8), done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let width = end.saturating_sub(start) as usize;
    (start as usize + width * done / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::BlueprintDocument;
    use indexmap::IndexMap;

    fn blueprint(backend: &[&str], frontend: &[&str]) -> Blueprint {
        let map = |paths: &[&str]| -> IndexMap<String, String> {
            paths
                .iter()
                .map(|p| (p.to_string(), "purpose".to_string()))
                .collect()
        };
        Blueprint::from_document(BlueprintDocument {
            project_name: "t".into(),
            project_type: "t".into(),
            core_entities: vec!["Task".into()],
            backend: map(backend),
            frontend: map(frontend),
        })
        .unwrap()
    }

    fn paths(files: Vec<&PlannedFile>) -> Vec<&str> {
        files.into_iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn backend_follows_precedence() {
        let bp = blueprint(
            &[
                "server.js",
                "routes/tasks.js",
                ".env.example",
                "utils/log.js",
                "controllers/taskController.js",
                "models/Task.js",
                "models/User.js",
                "package.json",
            ],
            &[],
        );
        assert_eq!(
            paths(order_tier(&bp, Tier::Backend)),
            vec![
                "package.json",
                "models/Task.js",
                "models/User.js",
                "controllers/taskController.js",
                "routes/tasks.js",
                "server.js",
                ".env.example",
                "utils/log.js",
            ]
        );
    }

    #[test]
    fn frontend_follows_precedence_and_keeps_unbucketed() {
        let bp = blueprint(
            &["server.js"],
            &[
                "src/main.jsx",
                "src/index.css",
                "src/App.jsx",
                "src/pages/Home.jsx",
                "src/store/taskStore.js",
                "src/api/client.js",
                "src/hooks/useTasks.js",
                "package.json",
            ],
        );
        let order = paths(order_tier(&bp, Tier::Frontend));
        assert_eq!(
            order,
            vec![
                "package.json",
                "src/api/client.js",
                "src/store/taskStore.js",
                "src/hooks/useTasks.js",
                "src/App.jsx",
                "src/pages/Home.jsx",
                "src/main.jsx",
                "src/index.css",
            ]
        );
        assert_eq!(order.len(), bp.tier_files(Tier::Frontend).count());
    }

    #[test]
    fn span_percent_interpolates() {
        assert_eq!(span_percent((20, 50), 0, 3), 20);
        assert_eq!(span_percent((20, 50), 3, 3), 50);
        assert_eq!(span_percent((20, 50), 1, 2), 35);
        assert_eq!(span_percent((20, 50), 0, 0), 50);
    }

    #[test]
    fn code_quality_is_accepted_share() {
        let p = GenerationProgress {
            total_files: 4,
            attempted: 4,
            written: 4,
            accepted: 3,
        };
        assert_eq!(p.code_quality(), 0.75);
        assert_eq!(GenerationProgress::new(0).code_quality(), 0.0);
    }
}
