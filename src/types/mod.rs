//! Core request/response types shared by all subsystems.
//!
//! [`ModelRequest`] is the provider-neutral shape produced by the input
//! adapters; each provider client translates it into its own wire
//! format. [`RawResponse`] is the provider-neutral result handed back
//! to the caller, carrying the generated content plus model and usage
//! metadata.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod error;

pub use error::{EngineError, ErrorKind};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
}

impl Role {
    /// Wire-format role string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a provider-neutral request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content — plain text or a provider-native payload.
    pub content: MessageContent,
}

impl Message {
    /// Build a plain-text message.
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    /// Build a message wrapping a provider-native JSON payload.
    pub fn native(role: Role, payload: Value) -> Self {
        Self {
            role,
            content: MessageContent::Native(payload),
        }
    }
}

/// The content of a message.
///
/// `Native` carries a payload already shaped for one specific provider
/// family; clients of that family forward it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Provider-native JSON payload, forwarded as-is.
    Native(Value),
}

impl MessageContent {
    /// The plain text, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t.as_str()),
            Self::Native(_) => None,
        }
    }

    /// The native payload, if present.
    pub fn as_native(&self) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Native(v) => Some(v),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A provider-neutral generation request.
///
/// `parameters` is an open map; the recognized keys are `max_tokens`,
/// `temperature`, `top_p`, `frequency_penalty`, `presence_penalty`,
/// `stream`, `system`, and `response_format`. Unknown keys are ignored
/// by clients that do not understand them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelRequest {
    /// Target model name. Empty means "use the provider's default".
    #[serde(default)]
    pub model: String,
    /// Ordered conversation messages.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Generation parameters overriding provider and config defaults.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl ModelRequest {
    /// Look up an integer parameter.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    /// Look up a float parameter, accepting integer values too.
    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).and_then(Value::as_f64)
    }

    /// Look up a boolean parameter.
    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    /// Look up a string parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Token accounting for a single generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u64,
    /// Tokens generated in the completion.
    pub completion_tokens: u64,
    /// Prompt plus completion tokens.
    pub total_tokens: u64,
    /// Generation throughput; 0 when elapsed time is zero.
    pub tokens_per_second: f64,
    /// When the usage was recorded.
    pub timestamp: DateTime<Utc>,
    /// Estimated request cost, when the provider has a rate table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    /// Currency of `estimated_cost`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl TokenUsage {
    /// Build usage figures from raw token counts and elapsed time.
    pub fn from_counts(
        prompt_tokens: u64,
        completion_tokens: u64,
        elapsed: std::time::Duration,
    ) -> Self {
        let total_tokens = prompt_tokens.saturating_add(completion_tokens);
        let secs = elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let tokens_per_second = if secs > 0.0 {
            (total_tokens as f64) / secs
        } else {
            0.0
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            tokens_per_second,
            timestamp: Utc::now(),
            estimated_cost: None,
            currency: None,
        }
    }

    /// Attach a cost estimate in the given currency.
    pub fn with_cost(mut self, cost: f64, currency: impl Into<String>) -> Self {
        self.estimated_cost = Some(cost);
        self.currency = Some(currency.into());
        self
    }
}

/// The provider-neutral result of a generation call.
///
/// `model_info` describes the model that served the request (name, id,
/// finish reason). `metadata` carries the provider name, API version,
/// processing duration, a `usage` submap, and any provider-specific
/// extras.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    /// Generated content.
    pub content: String,
    /// Model identification fields.
    #[serde(default)]
    pub model_info: HashMap<String, Value>,
    /// Provider name, API version, duration, and usage accounting.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl RawResponse {
    /// The token usage submap, when the provider recorded one.
    pub fn usage(&self) -> Option<TokenUsage> {
        self.metadata
            .get("usage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// The provider name recorded in metadata.
    pub fn provider(&self) -> Option<&str> {
        self.metadata.get("provider").and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Provider configuration
// ---------------------------------------------------------------------------

/// Configuration for one provider instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; may be empty for local providers.
    #[serde(default)]
    pub api_key: String,
    /// Endpoint URL.
    pub endpoint: String,
    /// Default model name.
    pub model: String,
    /// Parameter defaults overlaid on the provider's builtin defaults.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// Custom headers, overriding the family defaults when set.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}
