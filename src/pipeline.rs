//! Prompt → blueprint → tiered files → critique → gated completion.
//!
//! Stages:
//! 1. **Plan**: one planner call, always yields a blueprint (fallback on failure)
//! 2. **Generate**: backend tier, then frontend tier, file by file
//! 3. **Analyze**: cross-file critique over the generated paths
//! 4. **Refine**: top refinements recorded as intents
//! 5. **Complete**: quality gate decides COMPLETED or FAILED
//!
//! The pipeline only writes through the [`TaskRegistry`]. If the watchdog
//! fails the task in between, the next check or transition is rejected and
//! the run stops with [`PipelineError::TaskTerminated`].

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::blueprint::Tier;
use crate::config::WeaverConfig;
use crate::critique::{CritiqueAnalyzer, CritiqueResult};
use crate::events::{EventSink, LogLevel, TaskEvent};
use crate::gateway::ModelClient;
use crate::generator::{GeneratedFile, GenerationProgress, TieredGenerator};
use crate::planner::Planner;
use crate::state::{
    FailureCause, QualityMetrics, StateError, StateUpdate, TaskRegistry, TaskStatus, Watch,
};
use crate::workspace::{TaskWorkspace, WorkspaceError};

// =============================================================================
// Types
// =============================================================================

/// Handles one running task needs to report progress.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub registry: Arc<TaskRegistry>,
    pub events: Arc<dyn EventSink>,
}

impl TaskContext {
    fn publish(&self, event: TaskEvent) {
        self.events.publish(self.task_id, event);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("no files were generated")]
    NoFilesGenerated,
    #[error("task terminated: {0}")]
    TaskTerminated(String),
}

impl From<StateError> for PipelineError {
    fn from(e: StateError) -> Self {
        PipelineError::TaskTerminated(e.to_string())
    }
}

/// What one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub project_name: String,
    pub used_fallback_blueprint: bool,
    pub output_dir: PathBuf,
    pub files: Vec<GeneratedFile>,
    pub metrics: QualityMetrics,
    pub critique: CritiqueResult,
}

impl GenerationSummary {
    pub fn attempted(&self) -> usize {
        self.files.len()
    }

    pub fn accepted(&self) -> usize {
        self.files.iter().filter(|f| f.accepted).count()
    }

    pub fn file(&self, tier: Tier, path: &str) -> Option<&GeneratedFile> {
        self.files.iter().find(|f| f.tier == tier && f.path == path)
    }
}

// Progress checkpoints per stage.
const PLANNING_PERCENT: u8 = 5;
const BACKEND_SPAN: (u8, u8) = (15, 50);
const FRONTEND_SPAN: (u8, u8) = (50, 80);
const ANALYZING_PERCENT: u8 = 85;
const REFINING_PERCENT: u8 = 95;

// =============================================================================
// Pipeline
// =============================================================================

pub struct GenerationPipeline {
    planner: Planner,
    generator: TieredGenerator,
    critique: CritiqueAnalyzer,
    output_dir: PathBuf,
}

impl GenerationPipeline {
    pub fn new(client: ModelClient, config: &WeaverConfig) -> Self {
        Self {
            planner: Planner::new(client.clone(), config.planner_max_tokens),
            generator: TieredGenerator::new(client.clone(), config.file_max_tokens),
            critique: CritiqueAnalyzer::new(client, config.critique_max_tokens),
            output_dir: config.output_dir.clone(),
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// Run one task end to end. Fatal errors mark the task FAILED and push an
    /// error event before returning.
    pub async fn run(
        &self,
        ctx: &TaskContext,
        prompt: &str,
    ) -> Result<GenerationSummary, PipelineError> {
        match self.run_stages(ctx, prompt).await {
            Ok(summary) => Ok(summary),
            Err(e) => {
                self.report_failure(ctx, &e);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        ctx: &TaskContext,
        prompt: &str,
    ) -> Result<GenerationSummary, PipelineError> {
        let task_id = ctx.task_id;

        // --- Plan ---
        self.advance(
            ctx,
            TaskStatus::Planning,
            StateUpdate::new()
                .progress(PLANNING_PERCENT)
                .phase("planning blueprint"),
        )?;
        ctx.publish(TaskEvent::progress(
            "Planning application blueprint",
            PLANNING_PERCENT,
        ));

        let plan = self.planner.plan(prompt, Some(task_id)).await;
        if plan.used_fallback {
            ctx.publish(TaskEvent::log(
                format!(
                    "Blueprint planning failed ({}), using fallback blueprint",
                    plan.fallback_reason.as_deref().unwrap_or("unknown")
                ),
                LogLevel::Warning,
            ));
        }
        let blueprint = plan.blueprint;
        ctx.registry
            .set_metrics(task_id, Some(plan.quality), None, None)?;

        let mut workspace = TaskWorkspace::create(&self.output_dir, task_id).await?;
        workspace.write_blueprint(&blueprint).await?;

        let total = blueprint.len();
        ctx.publish(TaskEvent::log(
            format!(
                "Blueprint '{}': {} backend, {} frontend files",
                blueprint.document().project_name,
                blueprint.tier_files(Tier::Backend).count(),
                blueprint.tier_files(Tier::Frontend).count()
            ),
            LogLevel::Info,
        ));

        // --- Generate ---
        let mut progress = GenerationProgress::new(total);
        let mut files = Vec::with_capacity(total);

        for (tier, status, span) in [
            (Tier::Backend, TaskStatus::GeneratingBackend, BACKEND_SPAN),
            (Tier::Frontend, TaskStatus::GeneratingFrontend, FRONTEND_SPAN),
        ] {
            self.advance(
                ctx,
                status,
                StateUpdate::new()
                    .progress(span.0)
                    .phase(format!("generating {tier}"))
                    .files(progress.written, total),
            )?;

            let tier_files = self
                .generator
                .generate_tier(ctx, &blueprint, tier, &mut workspace, &mut progress, span)
                .await?;
            files.extend(tier_files);

            if let Err(e) = workspace.complete_tier(tier).await {
                tracing::error!(%task_id, tier = %tier, error = %e, "failed to update generation manifest");
            }
        }

        if progress.written == 0 {
            return Err(PipelineError::NoFilesGenerated);
        }
        ctx.registry
            .set_metrics(task_id, None, Some(progress.code_quality()), None)?;

        // --- Analyze ---
        self.advance(
            ctx,
            TaskStatus::Analyzing,
            StateUpdate::new()
                .progress(ANALYZING_PERCENT)
                .phase("analyzing interconnections"),
        )?;
        ctx.publish(TaskEvent::progress(
            "Analyzing cross-file coherence",
            ANALYZING_PERCENT,
        ));

        let generated_paths: Vec<String> = files
            .iter()
            .filter(|f| f.written)
            .map(GeneratedFile::display_path)
            .collect();
        let critique = self
            .critique
            .analyze(&blueprint, &generated_paths, Some(task_id))
            .await;
        ctx.registry
            .set_metrics(task_id, None, None, Some(critique.interconnection_score()))?;
        ctx.publish(TaskEvent::log(
            format!("Weaving score: {:.1}/10", critique.weaving_score),
            if critique.degraded {
                LogLevel::Warning
            } else {
                LogLevel::Info
            },
        ));
        for issue in &critique.critical_issues {
            ctx.publish(TaskEvent::log(
                format!("Critical issue: {issue}"),
                LogLevel::Warning,
            ));
        }

        // --- Refine ---
        self.advance(
            ctx,
            TaskStatus::Refining,
            StateUpdate::new()
                .progress(REFINING_PERCENT)
                .phase("recording refinements"),
        )?;
        for refinement in critique.top_refinements() {
            tracing::info!(
                %task_id,
                file = refinement.file.as_deref().unwrap_or(""),
                suggestion = %refinement.suggestion,
                "refinement intent"
            );
            ctx.publish(TaskEvent::log(
                format!("Refinement suggested: {refinement}"),
                LogLevel::Info,
            ));
        }

        // --- Complete ---
        self.ensure_live(ctx)?;
        let status = ctx.registry.complete(task_id)?;
        let state = ctx.registry.get(task_id);

        match status {
            TaskStatus::Completed => {
                tracing::info!(%task_id, files = files.len(), "generation completed");
                ctx.publish(TaskEvent::completion(task_id));
            }
            _ => {
                let cause = state
                    .as_ref()
                    .and_then(|s| s.error.as_ref())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "quality standards not met".into());
                ctx.publish(TaskEvent::error(format!("Generation failed: {cause}")));
            }
        }

        Ok(GenerationSummary {
            task_id,
            status,
            project_name: blueprint.document().project_name.clone(),
            used_fallback_blueprint: plan.used_fallback,
            output_dir: workspace.root().to_path_buf(),
            files,
            metrics: state.map(|s| s.quality_metrics).unwrap_or_default(),
            critique,
        })
    }

    /// Watchdog check, then transition.
    fn advance(
        &self,
        ctx: &TaskContext,
        status: TaskStatus,
        update: StateUpdate,
    ) -> Result<(), PipelineError> {
        self.ensure_live(ctx)?;
        ctx.registry.transition(ctx.task_id, status, update)?;
        Ok(())
    }

    /// Stop if the watchdog fails the task. Only a failure detected by this
    /// check is pushed here; the sweeper pushes its own.
    fn ensure_live(&self, ctx: &TaskContext) -> Result<(), PipelineError> {
        match ctx.registry.watch(ctx.task_id) {
            Watch::Live => Ok(()),
            Watch::FailedNow(cause) => {
                ctx.publish(TaskEvent::error(format!("Generation failed: {cause}")));
                Err(PipelineError::TaskTerminated(cause.to_string()))
            }
            Watch::AlreadyFailed(cause) => Err(PipelineError::TaskTerminated(
                cause.map(|c| c.to_string()).unwrap_or_else(|| "failed".into()),
            )),
            Watch::Missing => Err(PipelineError::TaskTerminated("task not found".into())),
        }
    }

    fn report_failure(&self, ctx: &TaskContext, err: &PipelineError) {
        match err {
            PipelineError::TaskTerminated(cause) => {
                tracing::warn!(task_id = %ctx.task_id, cause = %cause, "pipeline stopped");
            }
            PipelineError::Workspace(_) | PipelineError::NoFilesGenerated => {
                tracing::error!(task_id = %ctx.task_id, error = %err, "pipeline failed");
                if let Err(e) = ctx
                    .registry
                    .fail(ctx.task_id, FailureCause::Generation(err.to_string()))
                {
                    tracing::debug!(task_id = %ctx.task_id, error = %e, "task already terminal");
                }
                ctx.publish(TaskEvent::error(format!("Generation failed: {err}")));
            }
        }
    }
}
