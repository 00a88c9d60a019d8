//! LLM provider abstraction layer.
//!
//! Defines the [`Provider`] trait and shared request plumbing used by
//! all provider clients. Four families are implemented:
//! - [`anthropic::AnthropicProvider`] — XML-style messages API
//! - [`openai::OpenAiProvider`] — chat completions API
//! - [`ollama::OllamaProvider`] — local completion API
//! - [`compat::CompatProvider`] — OpenAI-compatible endpoints with a
//!   caller-supplied header set
//!
//! [`factory::ProviderFactory`] materializes clients from registered
//! configs and [`selector::ModelSelector`] picks a healthy one per
//! call.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::types::{ModelRequest, RawResponse, TokenUsage};

pub mod anthropic;
pub mod compat;
pub mod factory;
pub mod ollama;
pub mod openai;
pub mod selector;

pub use factory::{FactoryError, ProviderFactory, ProviderKind};
pub use selector::{ModelSelector, Selection, SelectionReason, SelectorError};

/// Request timeout for hosted chat providers.
pub(crate) const CHAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Request timeout for local completion providers.
pub(crate) const COMPLETION_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request timeout for connection validation probes.
pub(crate) const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by provider clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Decoded provider error envelope.
    #[error("provider api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Envelope error type, when present.
        kind: Option<String>,
        /// Envelope error message.
        message: String,
    },
    /// Non-success status with an undecodable body.
    #[error("HTTP {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// The provider requires an API key and none was configured.
    #[error("api key is required")]
    MissingApiKey,
    /// The request cannot be expressed in this provider's wire format.
    #[error("invalid provider request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// True for rate limiting (429), server errors (5xx), and
    /// transport timeouts.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Api { status, .. } | Self::HttpStatus { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            Self::Request(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Identification of the model behind a provider instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// Provider family name.
    pub provider: String,
    /// Configured model name.
    pub model: String,
    /// Wire API version tag.
    pub api_version: String,
}

/// Core LLM provider interface.
///
/// Implementations must be `Send + Sync`; each holds its own HTTP
/// client and is safe for concurrent use.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue a generation request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport, status, or decode
    /// failure.
    async fn generate_response(&self, request: &ModelRequest) -> Result<RawResponse, ProviderError>;

    /// Describe the model this instance targets.
    fn model_info(&self) -> ModelInfo;

    /// Whether the wire protocol supports streamed responses.
    fn supports_streaming(&self) -> bool;

    /// Probe connectivity with a minimal request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] when the provider is unreachable or
    /// rejects the probe.
    async fn validate_connection(&self) -> Result<(), ProviderError>;
}

// ---------------------------------------------------------------------------
// Shared plumbing
// ---------------------------------------------------------------------------

/// Build an HTTP client with the given request timeout.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Read the response body, returning the status alongside it.
///
/// # Errors
///
/// Returns [`ProviderError::Request`] on transport failure while
/// reading the body.
pub(crate) async fn read_response(
    response: reqwest::Response,
) -> Result<(reqwest::StatusCode, String), ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    Ok((status, body))
}

/// Redact credential-looking substrings and truncate long bodies
/// before they reach error messages or logs.
pub(crate) fn sanitize_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"Bearer [A-Za-z0-9._\-]{10,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

/// Overlay parameter maps: builtin defaults, then provider config,
/// then the request. Request-level values always win.
pub fn merge_parameters(
    defaults: &HashMap<String, Value>,
    config: &HashMap<String, Value>,
    request: &HashMap<String, Value>,
) -> HashMap<String, Value> {
    let mut merged = defaults.clone();
    for (key, value) in config {
        merged.insert(key.clone(), value.clone());
    }
    for (key, value) in request {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Assemble the common response metadata map.
pub(crate) fn base_metadata(
    provider: &str,
    api_version: &str,
    elapsed: Duration,
    usage: &TokenUsage,
) -> HashMap<String, Value> {
    let mut metadata = HashMap::new();
    metadata.insert("provider".to_owned(), json!(provider));
    metadata.insert("api_version".to_owned(), json!(api_version));
    metadata.insert(
        "duration_ms".to_owned(),
        json!(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)),
    );
    metadata.insert(
        "usage".to_owned(),
        serde_json::to_value(usage).unwrap_or(Value::Null),
    );
    metadata
}

/// Assemble the common model-info map.
pub(crate) fn model_info_map(
    model: &str,
    id: Option<&str>,
    finish_reason: Option<&str>,
) -> HashMap<String, Value> {
    let mut info = HashMap::new();
    info.insert("model".to_owned(), json!(model));
    if let Some(id) = id {
        info.insert("id".to_owned(), json!(id));
    }
    if let Some(reason) = finish_reason {
        info.insert("finish_reason".to_owned(), json!(reason));
    }
    info
}
