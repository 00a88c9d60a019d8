//! Surfaced error taxonomy.
//!
//! Subsystems return their own `thiserror` enums; the engine facade
//! wraps whatever reaches the caller into an [`EngineError`] carrying
//! the error kind, originating component, and recovery hints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of a surfaced error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Shape/format conversion failure in an input adapter.
    InputAdapter,
    /// Response decode or content extraction failure.
    Parsing,
    /// Schema or safety rule violation.
    Validation,
    /// Network failure or provider-side error status.
    Provider,
    /// Session lookup or persistence I/O failure.
    Context,
    /// Unexpected internal failure.
    System,
}

impl ErrorKind {
    /// Whether errors of this kind are recoverable by the caller.
    ///
    /// Provider errors depend on the HTTP status and are refined via
    /// [`EngineError::retryable`]; the kind-level default is `false`.
    pub fn default_recoverable(self) -> bool {
        matches!(self, Self::Validation | Self::Context)
    }

    /// Snake-case name used in logs and serialized errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InputAdapter => "input_adapter",
            Self::Parsing => "parsing",
            Self::Validation => "validation",
            Self::Provider => "provider",
            Self::Context => "context",
            Self::System => "system",
        }
    }
}

/// An error surfaced to the engine caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Component that produced the error (e.g. `"selector"`).
    pub component: String,
    /// Whether the caller can recover (e.g. by fixing the input).
    pub recoverable: bool,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
    /// Optional structured detail payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Optional remediation suggestions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    /// When the error was surfaced.
    pub timestamp: DateTime<Utc>,
}

impl EngineError {
    /// Build an error with kind-level recoverability defaults.
    pub fn new(kind: ErrorKind, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            component: component.into(),
            recoverable: kind.default_recoverable(),
            retryable: false,
            details: None,
            suggestions: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Mark the error retryable (provider 429/5xx).
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        if retryable {
            self.recoverable = true;
        }
        self
    }

    /// Attach a structured detail payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Append a remediation suggestion.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {}",
            self.kind.as_str(),
            self.component,
            self.message
        )
    }
}

impl std::error::Error for EngineError {}
