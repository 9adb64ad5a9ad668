//! Task lifecycle: status machine, progress counters, quality gate and the
//! stale-task watchdog.
//!
//! The registry is the only state shared between task pipelines and the
//! sweeper. Every mutation is a single `DashMap` entry update; no guard is held
//! across an await.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Serialize, Serializer};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::events::{EventSink, TaskEvent};

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Initialized,
    Planning,
    GeneratingBackend,
    GeneratingFrontend,
    Analyzing,
    Refining,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initialized => "initialized",
            TaskStatus::Planning => "planning",
            TaskStatus::GeneratingBackend => "generating_backend",
            TaskStatus::GeneratingFrontend => "generating_frontend",
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Refining => "refining",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Position on the forward path. `Failed` is off-path.
    fn rank(&self) -> Option<u8> {
        match self {
            TaskStatus::Initialized => Some(0),
            TaskStatus::Planning => Some(1),
            TaskStatus::GeneratingBackend => Some(2),
            TaskStatus::GeneratingFrontend => Some(3),
            TaskStatus::Analyzing => Some(4),
            TaskStatus::Refining => Some(5),
            TaskStatus::Completed => Some(6),
            TaskStatus::Failed => None,
        }
    }

    /// Forward by exactly one step, re-enter the same state, or fail.
    /// Terminal states accept nothing.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next == TaskStatus::Failed || next == *self {
            return true;
        }
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to == from + 1,
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Failure & metrics
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FailureCause {
    Timeout,
    Stalled,
    IncompleteQualityMetrics,
    QualityStandardsNotMet,
    Generation(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Timeout => f.write_str("timeout"),
            FailureCause::Stalled => f.write_str("stalled"),
            FailureCause::IncompleteQualityMetrics => f.write_str("incomplete quality metrics"),
            FailureCause::QualityStandardsNotMet => f.write_str("quality standards not met"),
            FailureCause::Generation(msg) => f.write_str(msg),
        }
    }
}

impl Serialize for FailureCause {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QualityMetrics {
    pub blueprint_quality: Option<f64>,
    pub code_quality: Option<f64>,
    pub interconnection_score: Option<f64>,
}

impl QualityMetrics {
    /// All three set and each at least `threshold`.
    pub fn gate(&self, threshold: f64) -> Result<(), FailureCause> {
        let (Some(b), Some(c), Some(i)) = (
            self.blueprint_quality,
            self.code_quality,
            self.interconnection_score,
        ) else {
            return Err(FailureCause::IncompleteQualityMetrics);
        };
        if [b, c, i].iter().all(|v| *v >= threshold) {
            Ok(())
        } else {
            Err(FailureCause::QualityStandardsNotMet)
        }
    }
}

fn clamp_unit(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite()).map(|x| x.clamp(0.0, 1.0))
}

// =============================================================================
// Task state
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub task_id: Uuid,
    pub prompt: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_phase: String,
    pub files_generated: usize,
    pub total_files: usize,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub error: Option<FailureCause>,
    pub quality_metrics: QualityMetrics,
}

/// Optional counters applied together with a status change.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub progress: Option<u8>,
    pub phase: Option<String>,
    pub files_generated: Option<usize>,
    pub total_files: Option<usize>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn progress(mut self, p: u8) -> Self {
        self.progress = Some(p.min(100));
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn files(mut self, generated: usize, total: usize) -> Self {
        self.files_generated = Some(generated);
        self.total_files = Some(total);
        self
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StateError {
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("task {task_id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

// =============================================================================
// Registry
// =============================================================================

/// Limits enforced by the watchdog and completion gate.
#[derive(Debug, Clone)]
pub struct WatchdogPolicy {
    pub task_timeout: Duration,
    pub stall_timeout: Duration,
    pub retention: Duration,
    pub quality_threshold: f64,
}

impl Default for WatchdogPolicy {
    fn default() -> Self {
        Self {
            task_timeout: Duration::from_secs(600),
            stall_timeout: Duration::from_secs(240),
            retention: Duration::from_secs(24 * 3600),
            quality_threshold: 0.7,
        }
    }
}

/// Result of a watchdog check on one task.
#[derive(Debug, Clone, PartialEq)]
pub enum Watch {
    /// Running within limits, or completed.
    Live,
    /// This check failed the task.
    FailedNow(FailureCause),
    /// Failed before this check (sweep, gate or pipeline error).
    AlreadyFailed(Option<FailureCause>),
    Missing,
}

impl Watch {
    pub fn is_live(&self) -> bool {
        matches!(self, Watch::Live)
    }
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub timed_out: Vec<Uuid>,
    pub stalled: Vec<Uuid>,
    pub purged: Vec<Uuid>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.stalled.is_empty() && self.purged.is_empty()
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - since).to_std().unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    states: DashMap<Uuid, TaskState>,
    policy: WatchdogPolicy,
}

impl TaskRegistry {
    pub fn new(policy: WatchdogPolicy) -> Self {
        Self {
            states: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &WatchdogPolicy {
        &self.policy
    }

    /// Register a new task in `INITIALIZED`.
    pub fn initialize(&self, prompt: impl Into<String>) -> Uuid {
        self.initialize_at(prompt, Utc::now())
    }

    pub fn initialize_at(&self, prompt: impl Into<String>, now: DateTime<Utc>) -> Uuid {
        let task_id = Uuid::new_v4();
        self.states.insert(
            task_id,
            TaskState {
                task_id,
                prompt: prompt.into(),
                status: TaskStatus::Initialized,
                progress: 0,
                current_phase: "initialization".into(),
                files_generated: 0,
                total_files: 0,
                start_time: now,
                last_update: now,
                error: None,
                quality_metrics: QualityMetrics::default(),
            },
        );
        tracing::info!(%task_id, "task initialized");
        task_id
    }

    pub fn get(&self, task_id: Uuid) -> Option<TaskState> {
        self.states.get(&task_id).map(|s| s.clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Move to `next` and apply `update`. `Completed` goes through the
    /// quality gate; see [`TaskRegistry::complete`].
    pub fn transition(
        &self,
        task_id: Uuid,
        next: TaskStatus,
        update: StateUpdate,
    ) -> Result<TaskStatus, StateError> {
        self.transition_at(task_id, next, update, Utc::now())
    }

    pub fn transition_at(
        &self,
        task_id: Uuid,
        next: TaskStatus,
        update: StateUpdate,
        now: DateTime<Utc>,
    ) -> Result<TaskStatus, StateError> {
        let mut entry = self
            .states
            .get_mut(&task_id)
            .ok_or(StateError::NotFound(task_id))?;
        let state = entry.value_mut();

        if !state.status.can_transition_to(next) {
            return Err(StateError::InvalidTransition {
                task_id,
                from: state.status,
                to: next,
            });
        }

        let next = if next == TaskStatus::Completed {
            match state.quality_metrics.gate(self.policy.quality_threshold) {
                Ok(()) => TaskStatus::Completed,
                Err(cause) => {
                    tracing::warn!(%task_id, cause = %cause, metrics = ?state.quality_metrics, "completion gate failed");
                    state.error = Some(cause);
                    TaskStatus::Failed
                }
            }
        } else {
            next
        };

        if let Some(p) = update.progress {
            state.progress = p.min(100);
        }
        if let Some(phase) = update.phase {
            state.current_phase = phase;
        }
        if let Some(n) = update.files_generated {
            state.files_generated = n;
        }
        if let Some(n) = update.total_files {
            state.total_files = n;
        }
        if next == TaskStatus::Completed {
            state.progress = 100;
        }

        if state.status != next {
            tracing::info!(%task_id, from = %state.status, to = %next, "task status");
        }
        state.status = next;
        state.last_update = now;
        Ok(next)
    }

    /// Re-enter the current state to update counters.
    pub fn update(&self, task_id: Uuid, update: StateUpdate) -> Result<(), StateError> {
        let current = self
            .states
            .get(&task_id)
            .map(|s| s.status)
            .ok_or(StateError::NotFound(task_id))?;
        self.transition(task_id, current, update).map(|_| ())
    }

    /// Set any of the three metrics, clamped to [0,1].
    pub fn set_metrics(
        &self,
        task_id: Uuid,
        blueprint_quality: Option<f64>,
        code_quality: Option<f64>,
        interconnection_score: Option<f64>,
    ) -> Result<(), StateError> {
        let mut entry = self
            .states
            .get_mut(&task_id)
            .ok_or(StateError::NotFound(task_id))?;
        let metrics = &mut entry.quality_metrics;
        if let Some(v) = clamp_unit(blueprint_quality) {
            metrics.blueprint_quality = Some(v);
        }
        if let Some(v) = clamp_unit(code_quality) {
            metrics.code_quality = Some(v);
        }
        if let Some(v) = clamp_unit(interconnection_score) {
            metrics.interconnection_score = Some(v);
        }
        Ok(())
    }

    /// Gate and finish. Returns `Completed` or `Failed`.
    pub fn complete(&self, task_id: Uuid) -> Result<TaskStatus, StateError> {
        self.transition(
            task_id,
            TaskStatus::Completed,
            StateUpdate::new().phase("complete"),
        )
    }

    pub fn fail(&self, task_id: Uuid, cause: FailureCause) -> Result<(), StateError> {
        self.fail_at(task_id, cause, Utc::now())
    }

    fn fail_at(
        &self,
        task_id: Uuid,
        cause: FailureCause,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut entry = self
            .states
            .get_mut(&task_id)
            .ok_or(StateError::NotFound(task_id))?;
        let state = entry.value_mut();
        if state.status.is_terminal() {
            return Err(StateError::InvalidTransition {
                task_id,
                from: state.status,
                to: TaskStatus::Failed,
            });
        }
        tracing::warn!(%task_id, from = %state.status, cause = %cause, "task failed");
        state.status = TaskStatus::Failed;
        state.error = Some(cause);
        state.last_update = now;
        Ok(())
    }

    /// Run the watchdog on one task. Returns `false` if the task is missing
    /// or has failed (now or earlier).
    pub fn validate(&self, task_id: Uuid) -> bool {
        self.validate_at(task_id, Utc::now())
    }

    pub fn validate_at(&self, task_id: Uuid, now: DateTime<Utc>) -> bool {
        self.watch_at(task_id, now).is_live()
    }

    /// Watchdog check that also says who failed the task.
    pub fn watch(&self, task_id: Uuid) -> Watch {
        self.watch_at(task_id, Utc::now())
    }

    pub fn watch_at(&self, task_id: Uuid, now: DateTime<Utc>) -> Watch {
        let Some(mut entry) = self.states.get_mut(&task_id) else {
            return Watch::Missing;
        };
        let state = entry.value_mut();
        match state.status {
            TaskStatus::Completed => return Watch::Live,
            TaskStatus::Failed => return Watch::AlreadyFailed(state.error.clone()),
            _ => {}
        }
        match self.watchdog_verdict(state, now) {
            Some(cause) => {
                tracing::warn!(%task_id, status = %state.status, cause = %cause, "watchdog failed task");
                state.status = TaskStatus::Failed;
                state.error = Some(cause.clone());
                state.last_update = now;
                Watch::FailedNow(cause)
            }
            None => Watch::Live,
        }
    }

    fn watchdog_verdict(&self, state: &TaskState, now: DateTime<Utc>) -> Option<FailureCause> {
        if elapsed(state.start_time, now) > self.policy.task_timeout {
            Some(FailureCause::Timeout)
        } else if elapsed(state.last_update, now) > self.policy.stall_timeout {
            Some(FailureCause::Stalled)
        } else {
            None
        }
    }

    /// Watchdog over every task, then purge anything past retention.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let ids: Vec<Uuid> = self.states.iter().map(|e| *e.key()).collect();

        for task_id in ids {
            let Some(mut entry) = self.states.get_mut(&task_id) else {
                continue;
            };
            let state = entry.value_mut();

            if elapsed(state.start_time, now) > self.policy.retention {
                drop(entry);
                self.states.remove(&task_id);
                report.purged.push(task_id);
                continue;
            }
            if state.status.is_terminal() {
                continue;
            }
            if let Some(cause) = self.watchdog_verdict(state, now) {
                match cause {
                    FailureCause::Timeout => report.timed_out.push(task_id),
                    _ => report.stalled.push(task_id),
                }
                state.status = TaskStatus::Failed;
                state.error = Some(cause);
                state.last_update = now;
            }
        }

        if !report.is_empty() {
            tracing::info!(
                timed_out = report.timed_out.len(),
                stalled = report.stalled.len(),
                purged = report.purged.len(),
                "sweep"
            );
        }
        report
    }
}

// =============================================================================
// Sweeper
// =============================================================================

/// Running sweeper task; stop it with [`SweeperHandle::shutdown`].
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.join.await;
    }
}

/// Sweep `registry` every `every`, pushing an error event for each task the
/// watchdog fails and releasing subscribers of purged tasks.
pub fn spawn_sweeper(
    registry: Arc<TaskRegistry>,
    events: Arc<dyn EventSink>,
    every: Duration,
) -> SweeperHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let report = registry.sweep(Utc::now());
                    for (task_id, cause) in report
                        .timed_out
                        .iter()
                        .map(|id| (*id, FailureCause::Timeout))
                        .chain(report.stalled.iter().map(|id| (*id, FailureCause::Stalled)))
                    {
                        events.publish(task_id, TaskEvent::error(format!("Generation failed: {cause}")));
                    }
                    for task_id in &report.purged {
                        events.forget(*task_id);
                    }
                }
            }
        }
        tracing::debug!("sweeper stopped");
    });
    SweeperHandle {
        stop: Some(stop_tx),
        join,
    }
}
