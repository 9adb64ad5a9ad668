//! Usage tracking via the UsageSink trait.
//!
//! The gateway records every call, successful or not, through a UsageSink:
//! - the `weaver` binary uses TracingUsageSink
//! - tests use NoopUsageSink or MemoryUsageSink

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a single provider API call.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Provider name, e.g. "openrouter".
    pub provider: &'static str,
    /// Endpoint, e.g. "chat/completions".
    pub endpoint: &'static str,
    /// Model the attempt was addressed to.
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    /// Generation task this call belongs to (if any).
    pub task_id: Option<Uuid>,
    /// Zero-based attempt number within one gateway call.
    pub attempt: u32,
    pub latency_ms: u64,
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Provider request ID (for debugging).
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(
        provider: &'static str,
        endpoint: &'static str,
        model: impl Into<String>,
        caller: &'static str,
    ) -> Self {
        Self {
            provider,
            endpoint,
            model: model.into(),
            input_tokens: 0,
            output_tokens: 0,
            task_id: None,
            attempt: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn task(mut self, task_id: Option<Uuid>) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

/// Trait for recording provider call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. Fire-and-forget: failures are logged, never
    /// propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that emits one structured `tracing` event per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        let task_id = record.task_id.map(|id| id.to_string()).unwrap_or_default();
        match record.status {
            CallStatus::Success => tracing::debug!(
                target: "weaver::usage",
                provider = record.provider,
                model = %record.model,
                caller = record.caller,
                task_id = %task_id,
                attempt = record.attempt,
                input_tokens = record.input_tokens,
                output_tokens = record.output_tokens,
                latency_ms = record.latency_ms,
                "provider call succeeded"
            ),
            CallStatus::Error => tracing::warn!(
                target: "weaver::usage",
                provider = record.provider,
                model = %record.model,
                caller = record.caller,
                task_id = %task_id,
                attempt = record.attempt,
                error_code = record.error_code.as_deref().unwrap_or("unknown"),
                request_id = record.request_id.as_deref().unwrap_or(""),
                latency_ms = record.latency_ms,
                "provider call failed"
            ),
        }
    }
}

/// Usage sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryUsageSink {
    records: Mutex<Vec<ProviderCallRecord>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ProviderCallRecord> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_keeps_error_codes() {
        let sink = MemoryUsageSink::new();
        sink.record(
            ProviderCallRecord::new("openrouter", "chat/completions", "a/b", "test")
                .attempt(1)
                .error("timeout"),
        )
        .await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, CallStatus::Error);
        assert_eq!(records[0].error_code.as_deref(), Some("timeout"));
        assert_eq!(records[0].attempt, 1);
    }
}
