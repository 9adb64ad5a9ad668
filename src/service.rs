//! Task service: owns the registry, the push hub and the sweeper, and runs one
//! spawned pipeline per submission.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ConfigError, WeaverConfig};
use crate::events::{EventSink, PushHub, TaskEvent};
use crate::gateway::{
    ChatGateway, ModelClient, ModelRoster, ProviderError, ProviderGateway, TracingUsageSink,
};
use crate::pipeline::{GenerationPipeline, GenerationSummary, PipelineError, TaskContext};
use crate::state::{spawn_sweeper, SweeperHandle, TaskRegistry, TaskState};

/// Longest accepted prompt, in characters, after trimming.
pub const MAX_PROMPT_CHARS: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type TaskHandle = JoinHandle<Result<GenerationSummary, PipelineError>>;

/// A submitted task with its event stream attached before the run started.
pub struct Submission {
    pub task_id: Uuid,
    pub events: mpsc::Receiver<TaskEvent>,
    pub handle: TaskHandle,
}

pub struct WeaverService {
    config: WeaverConfig,
    registry: Arc<TaskRegistry>,
    hub: Arc<PushHub>,
    pipeline: Arc<GenerationPipeline>,
    sweeper: Option<SweeperHandle>,
}

impl WeaverService {
    pub fn new(config: WeaverConfig, gateway: Arc<dyn ChatGateway>) -> Result<Self, ServiceError> {
        config.validate()?;
        let client = ModelClient::new(gateway, ModelRoster::from_config(&config));
        Ok(Self {
            registry: Arc::new(TaskRegistry::new(config.watchdog_policy())),
            hub: Arc::new(PushHub::new(config.event_buffer)),
            pipeline: Arc::new(GenerationPipeline::new(client, &config)),
            sweeper: None,
            config,
        })
    }

    /// OpenRouter gateway from `OPENROUTER_*`, usage logged through tracing.
    pub fn from_env(config: WeaverConfig) -> Result<Self, ServiceError> {
        let gateway =
            ProviderGateway::from_env(Arc::new(TracingUsageSink), config.gateway_config())?;
        Self::new(config, Arc::new(gateway))
    }

    pub fn config(&self) -> &WeaverConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.output_dir
    }

    /// Start the stale-task sweeper. Idempotent.
    pub fn start(&mut self) {
        if self.sweeper.is_some() {
            return;
        }
        let events: Arc<dyn EventSink> = self.hub.clone();
        self.sweeper = Some(spawn_sweeper(
            self.registry.clone(),
            events,
            self.config.sweep_interval(),
        ));
        tracing::info!(
            every_secs = self.config.sweep_interval_seconds,
            "sweeper started"
        );
    }

    /// Stop the sweeper. Running pipelines are left to finish on their own.
    pub async fn shutdown(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper.is_some()
    }

    /// Register and spawn a task. Returns immediately.
    pub fn submit(&self, prompt: &str) -> Result<Uuid, ServiceError> {
        let prompt = check_prompt(prompt)?;
        let task_id = self.registry.initialize(prompt);
        drop(self.spawn(task_id, prompt.to_string()));
        Ok(task_id)
    }

    /// Like [`WeaverService::submit`], but the event receiver is attached
    /// before the pipeline starts so no event is missed.
    pub fn submit_and_subscribe(&self, prompt: &str) -> Result<Submission, ServiceError> {
        let prompt = check_prompt(prompt)?;
        let task_id = self.registry.initialize(prompt);
        let events = self.hub.subscribe(task_id);
        let handle = self.spawn(task_id, prompt.to_string());
        Ok(Submission {
            task_id,
            events,
            handle,
        })
    }

    /// `None` once the task is unknown or purged.
    pub fn status(&self, task_id: Uuid) -> Option<TaskState> {
        self.registry.get(task_id)
    }

    pub fn subscribe(&self, task_id: Uuid) -> mpsc::Receiver<TaskEvent> {
        self.hub.subscribe(task_id)
    }

    pub fn unsubscribe(&self, task_id: Uuid) {
        self.hub.unsubscribe(task_id);
    }

    fn spawn(&self, task_id: Uuid, prompt: String) -> TaskHandle {
        let ctx = TaskContext {
            task_id,
            registry: self.registry.clone(),
            events: self.hub.clone(),
        };
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            let result = pipeline.run(&ctx, &prompt).await;
            match &result {
                Ok(summary) => tracing::info!(
                    %task_id,
                    status = %summary.status,
                    files = summary.attempted(),
                    accepted = summary.accepted(),
                    "task finished"
                ),
                Err(e) => tracing::warn!(%task_id, error = %e, "task aborted"),
            }
            result
        })
    }
}

fn check_prompt(prompt: &str) -> Result<&str, ServiceError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ServiceError::InvalidPrompt("prompt is empty".into()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ServiceError::InvalidPrompt(format!(
            "prompt is {chars} characters, maximum is {MAX_PROMPT_CHARS}"
        )));
    }
    Ok(prompt)
}
