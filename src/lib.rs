#![forbid(unsafe_code)]

//! # weaver-forge
//!
//! Turns one natural-language request into a multi-file application scaffold.
//!
//! A planner call produces a blueprint (paths and purposes for a backend and a
//! frontend tier). Files are then generated tier by tier in dependency order,
//! each one checked by a token-presence validator and replaced with a
//! deterministic template when the model output is rejected. A final critique
//! call scores cross-file coherence, and the task only completes when every
//! quality metric clears the configured threshold.
//!
//! Progress is pushed per task through an [`EventSink`]; a watchdog fails
//! tasks that time out or stall.

pub mod blueprint;
pub mod config;
pub mod critique;
pub mod events;
pub mod extract;
pub mod gateway;
pub mod generator;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod service;
pub mod state;
pub mod templates;
pub mod validator;
pub mod workspace;

pub use blueprint::{Blueprint, BlueprintDocument, FileCategory, PlannedFile, Tier};
pub use config::{ConfigError, WeaverConfig};
pub use critique::{CritiqueAnalyzer, CritiqueResult, Refinement};
pub use events::{EventSink, LogLevel, NoopEventSink, PushHub, TaskEvent};
pub use gateway::{
    Attribution, ChatGateway, ModelClient, ModelHint, ProviderError, ProviderGateway, UsageSink,
};
pub use generator::{GeneratedFile, TieredGenerator};
pub use pipeline::{GenerationPipeline, GenerationSummary, PipelineError, TaskContext};
pub use planner::{PlanOutcome, Planner};
pub use service::{ServiceError, Submission, WeaverService};
pub use state::{
    FailureCause, QualityMetrics, StateError, TaskRegistry, TaskState, TaskStatus, Watch,
    WatchdogPolicy,
};
pub use workspace::{GenerationManifest, TaskWorkspace, WorkspaceError};
