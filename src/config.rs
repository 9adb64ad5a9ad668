//! Service configuration: JSON file plus `WEAVER_*` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gateway::GatewayConfig;
use crate::state::WatchdogPolicy;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration for planning, generation and task supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeaverConfig {
    /// Root under which each task gets `<task_id>/`.
    pub output_dir: PathBuf,
    pub planner_model: String,
    pub code_model: String,
    pub critique_model: String,
    /// General-purpose model tried once when a configured model is unavailable.
    pub fallback_model: Option<String>,
    pub generation_temperature: f32,
    pub planner_max_tokens: u32,
    pub file_max_tokens: u32,
    pub critique_max_tokens: u32,
    pub call_timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub task_timeout_seconds: u64,
    pub stall_timeout_seconds: u64,
    pub retention_hours: u64,
    pub sweep_interval_seconds: u64,
    /// Minimum value for each quality metric at completion.
    pub quality_threshold: f64,
    /// Per-task push buffer.
    pub event_buffer: usize,
}

impl Default for WeaverConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("generated_sites"),
            planner_model: "openai/gpt-4o".into(),
            code_model: "openai/gpt-4o".into(),
            critique_model: "openai/gpt-4o".into(),
            fallback_model: Some("openai/gpt-4o-mini".into()),
            generation_temperature: 0.3,
            planner_max_tokens: 4000,
            file_max_tokens: 4000,
            critique_max_tokens: 2000,
            call_timeout_seconds: 60,
            max_retries: 2,
            retry_base_delay_ms: 1000,
            task_timeout_seconds: 600,
            stall_timeout_seconds: 240,
            retention_hours: 24,
            sweep_interval_seconds: 30,
            quality_threshold: 0.7,
            event_buffer: 256,
        }
    }
}

impl WeaverConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                serde_json::from_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WEAVER_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("WEAVER_PLANNER_MODEL") {
            self.planner_model = v;
        }
        if let Some(v) = lookup("WEAVER_CODE_MODEL") {
            self.code_model = v;
        }
        if let Some(v) = lookup("WEAVER_CRITIQUE_MODEL") {
            self.critique_model = v;
        }
        if let Some(v) = lookup("WEAVER_FALLBACK_MODEL") {
            let v = v.trim().to_string();
            self.fallback_model = if v.is_empty() { None } else { Some(v) };
        }

        let num = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::Env { var, value }),
                None => Ok(None),
            }
        };

        if let Some(v) = num("WEAVER_CALL_TIMEOUT_SECONDS")? {
            self.call_timeout_seconds = v;
        }
        if let Some(v) = num("WEAVER_MAX_RETRIES")? {
            self.max_retries = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = num("WEAVER_TASK_TIMEOUT_SECONDS")? {
            self.task_timeout_seconds = v;
        }
        if let Some(v) = num("WEAVER_STALL_TIMEOUT_SECONDS")? {
            self.stall_timeout_seconds = v;
        }
        if let Some(v) = num("WEAVER_RETENTION_HOURS")? {
            self.retention_hours = v;
        }
        if let Some(v) = num("WEAVER_SWEEP_INTERVAL_SECONDS")? {
            self.sweep_interval_seconds = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(ConfigError::Invalid(format!(
                "quality_threshold must be in [0,1], got {}",
                self.quality_threshold
            )));
        }
        if !(0.0..=2.0).contains(&self.generation_temperature) {
            return Err(ConfigError::Invalid(format!(
                "generation_temperature must be in [0,2], got {}",
                self.generation_temperature
            )));
        }
        if self.stall_timeout_seconds > self.task_timeout_seconds {
            return Err(ConfigError::Invalid(format!(
                "stall_timeout_seconds ({}) exceeds task_timeout_seconds ({})",
                self.stall_timeout_seconds, self.task_timeout_seconds
            )));
        }
        if self.call_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("call_timeout_seconds must be > 0".into()));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(ConfigError::Invalid("sweep_interval_seconds must be > 0".into()));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be > 0".into()));
        }
        for (name, model) in [
            ("planner_model", &self.planner_model),
            ("code_model", &self.code_model),
            ("critique_model", &self.critique_model),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{name} is empty")));
            }
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_seconds)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_retries: self.max_retries,
            retry_base_delay: self.retry_base_delay(),
            call_timeout: self.call_timeout(),
            fallback_model: self
                .fallback_model
                .clone()
                .filter(|m| !m.trim().is_empty()),
        }
    }

    pub fn watchdog_policy(&self) -> WatchdogPolicy {
        WatchdogPolicy {
            task_timeout: self.task_timeout(),
            stall_timeout: self.stall_timeout(),
            retention: self.retention(),
            quality_threshold: self.quality_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = WeaverConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output_dir, PathBuf::from("generated_sites"));
        assert_eq!(config.quality_threshold, 0.7);
        assert_eq!(config.task_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn huge_retention_saturates() {
        let config = WeaverConfig {
            retention_hours: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.retention(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: WeaverConfig =
            serde_json::from_str(r#"{"code_model": "anthropic/claude-3.5-sonnet"}"#).unwrap();
        assert_eq!(config.code_model, "anthropic/claude-3.5-sonnet");
        assert_eq!(config.planner_model, "openai/gpt-4o");
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("WEAVER_OUTPUT_DIR", "/tmp/out"),
            ("WEAVER_MAX_RETRIES", "5"),
            ("WEAVER_FALLBACK_MODEL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = WeaverConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.fallback_model, None);
    }

    #[test]
    fn bad_env_number_is_rejected() {
        let mut config = WeaverConfig::default();
        let err = config
            .apply_env(|k| (k == "WEAVER_STALL_TIMEOUT_SECONDS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: "WEAVER_STALL_TIMEOUT_SECONDS",
                ..
            }
        ));
    }

    #[test]
    fn stall_above_task_timeout_is_invalid() {
        let config = WeaverConfig {
            stall_timeout_seconds: 900,
            ..WeaverConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
