//! Error types for the model gateway.

use std::time::Duration;
use thiserror::Error;

/// What the backend told us about a failed call.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub http_status: Option<u16>,
    /// Backend error code (e.g. "model_not_found").
    pub provider_code: Option<String>,
    /// Value of the `x-request-id` header.
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Why a completion call did not produce text.
///
/// [`is_retryable`](ProviderError::is_retryable) drives the gateway's retry
/// loop; [`ProviderError::ModelUnavailable`] drives the one-time switch to the
/// fallback model.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP 429 from the backend.
    #[error("rate limited by backend")]
    RateLimited(ErrorContext),

    #[error("model unavailable: {model}")]
    ModelUnavailable {
        model: String,
        context: Option<ErrorContext>,
    },

    /// Rejected before sending, or a 4xx the backend will never accept.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The model answered with a refusal instead of content.
    #[error("refused: {0}")]
    Refused(String),

    #[error("{backend} error: {message}")]
    Backend {
        backend: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// A single attempt exceeded the per-call timeout.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Missing API key or an unusable client setup.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn model_unavailable(model: impl Into<String>, context: Option<ErrorContext>) -> Self {
        Self::ModelUnavailable {
            model: model.into(),
            context,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::Refused(message.into())
    }

    pub fn backend(backend: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    pub fn backend_with_context(
        backend: &'static str,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout(_) => true,
            Self::Backend { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::ModelUnavailable { .. }
            | Self::InvalidRequest(_)
            | Self::Refused(_)
            | Self::Config(_) => false,
        }
    }

    /// Short code recorded on usage records and log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Refused(_) => "refused",
            Self::Backend { .. } => "backend_error",
            Self::Timeout(_) => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited(context) => Some(context),
            Self::ModelUnavailable { context, .. } | Self::Backend { context, .. } => {
                context.as_ref()
            }
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
