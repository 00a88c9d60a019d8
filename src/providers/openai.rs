//! OpenAI chat completions API client.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{MessageContent, ModelRequest, ProviderConfig, RawResponse, TokenUsage};

use super::{
    base_metadata, http_client, merge_parameters, model_info_map, read_response, sanitize_error_body,
    ModelInfo, Provider, ProviderError, CHAT_TIMEOUT, VALIDATION_TIMEOUT,
};

/// Canonical chat completions endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default model when neither config nor request names one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Wire API version tag recorded in response metadata.
pub const API_VERSION: &str = "v1";

/// Model name substrings that accept the `response_format` field.
const JSON_MODE_MODELS: &[&str] = &["gpt-4o", "gpt-4.1", "gpt-4o-mini", "4o-mini", "o-mini"];

/// USD per million tokens: (model substring, input rate, output rate).
const MODEL_RATES: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-3.5-turbo", 0.50, 1.50),
];

/// Fallback rate for models absent from [`MODEL_RATES`].
const DEFAULT_RATE: (f64, f64) = (1.00, 3.00);

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Chat completions request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<OpenAiMessage>,
    /// Maximum completion tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling cutoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Streaming flag; always false on this request path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// JSON-mode request, stripped for models outside the allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Value>,
}

/// A message in chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    /// Role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message content.
    pub content: Value,
}

/// Chat completions response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response identifier.
    pub id: Option<String>,
    /// Model that served the response.
    pub model: String,
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Token usage.
    pub usage: Option<OpenAiUsage>,
}

/// One response choice.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Assistant message.
    pub message: OpenAiResponseMessage,
    /// Why generation stopped.
    pub finish_reason: Option<String>,
}

/// Assistant message in a response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    /// Text content.
    pub content: Option<String>,
}

/// Usage statistics.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiUsage {
    /// Prompt tokens.
    pub prompt_tokens: Option<u64>,
    /// Completion tokens.
    pub completion_tokens: Option<u64>,
}

/// Error envelope shape.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiErrorEnvelope {
    /// Nested error payload.
    pub error: OpenAiErrorBody,
}

/// The inner error payload.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiErrorBody {
    /// Error description.
    pub message: String,
    /// Error type tag.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

// ---------------------------------------------------------------------------
// Request / response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Whether a model accepts the `response_format` field.
#[doc(hidden)]
pub fn supports_json_mode(model: &str) -> bool {
    let lower = model.to_lowercase();
    JSON_MODE_MODELS
        .iter()
        .any(|candidate| lower.contains(candidate))
}

/// Estimate request cost in USD from the per-model rate table.
#[doc(hidden)]
pub fn estimate_cost(model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    let lower = model.to_lowercase();
    let (input_rate, output_rate) = MODEL_RATES
        .iter()
        .find(|(substring, _, _)| lower.contains(substring))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or(DEFAULT_RATE);
    #[allow(clippy::cast_precision_loss)]
    let cost = (prompt_tokens as f64) / 1_000_000.0 * input_rate
        + (completion_tokens as f64) / 1_000_000.0 * output_rate;
    cost
}

/// Build a chat completions request from the internal request.
///
/// # Errors
///
/// Returns [`ProviderError::InvalidRequest`] when the request carries
/// no messages.
#[doc(hidden)]
pub fn build_request(
    config: &ProviderConfig,
    request: &ModelRequest,
) -> Result<OpenAiRequest, ProviderError> {
    if request.messages.is_empty() {
        return Err(ProviderError::InvalidRequest(
            "at least one message is required".to_owned(),
        ));
    }

    let params = merge_parameters(&HashMap::new(), &config.parameters, &request.parameters);

    let model = if request.model.is_empty() {
        if config.model.is_empty() {
            DEFAULT_MODEL.to_owned()
        } else {
            config.model.clone()
        }
    } else {
        request.model.clone()
    };

    let messages = request
        .messages
        .iter()
        .map(|message| OpenAiMessage {
            role: message.role.as_str().to_owned(),
            content: match &message.content {
                MessageContent::Text(text) => Value::String(text.clone()),
                MessageContent::Native(value) => value.clone(),
            },
        })
        .collect();

    // Accept both `response_format: "json_object"` and the full map.
    let response_format = params.get("response_format").and_then(|value| match value {
        Value::String(kind) => Some(json!({ "type": kind })),
        Value::Object(_) => Some(value.clone()),
        _ => None,
    });
    let response_format = if supports_json_mode(&model) {
        response_format
    } else {
        None
    };

    Ok(OpenAiRequest {
        model,
        messages,
        max_tokens: params.get("max_tokens").and_then(Value::as_u64),
        temperature: params.get("temperature").and_then(Value::as_f64),
        top_p: params.get("top_p").and_then(Value::as_f64),
        frequency_penalty: params.get("frequency_penalty").and_then(Value::as_f64),
        presence_penalty: params.get("presence_penalty").and_then(Value::as_f64),
        stream: params.get("stream").and_then(Value::as_bool),
        response_format,
    })
}

/// Decode a non-success body into a provider error.
#[doc(hidden)]
pub fn decode_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<OpenAiErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status,
            kind: envelope.error.kind,
            message: envelope.error.message,
        },
        Err(_) => ProviderError::HttpStatus {
            status,
            body: sanitize_error_body(body),
        },
    }
}

/// Decode a success body into the provider-neutral response.
///
/// # Errors
///
/// Returns [`ProviderError::Parse`] when the body is not a chat
/// completion or has no choices.
#[doc(hidden)]
pub fn parse_response(
    body: &str,
    elapsed: std::time::Duration,
    provider_name: &str,
) -> Result<RawResponse, ProviderError> {
    let decoded: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let choice = decoded
        .choices
        .first()
        .ok_or_else(|| ProviderError::Parse("missing choices[0]".to_owned()))?;

    let content = choice.message.content.clone().unwrap_or_default();

    let prompt_tokens = decoded
        .usage
        .as_ref()
        .and_then(|u| u.prompt_tokens)
        .unwrap_or(0);
    let completion_tokens = decoded
        .usage
        .as_ref()
        .and_then(|u| u.completion_tokens)
        .unwrap_or(0);
    let usage = TokenUsage::from_counts(prompt_tokens, completion_tokens, elapsed).with_cost(
        estimate_cost(&decoded.model, prompt_tokens, completion_tokens),
        "USD",
    );

    Ok(RawResponse {
        content,
        model_info: model_info_map(
            &decoded.model,
            decoded.id.as_deref(),
            choice.finish_reason.as_deref(),
        ),
        metadata: base_metadata(provider_name, API_VERSION, elapsed, &usage),
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI chat completions API provider.
pub struct OpenAiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::MissingApiKey`] when the config has no
    /// API key.
    pub fn new(mut config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }
        if config.endpoint.is_empty() {
            config.endpoint = DEFAULT_ENDPOINT.to_owned();
        }
        Ok(Self {
            config,
            client: http_client(CHAT_TIMEOUT),
        })
    }

    fn post(&self, body: &OpenAiRequest) -> reqwest::RequestBuilder {
        self.client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(body)
    }
}

#[async_trait::async_trait]
impl Provider for OpenAiProvider {
    async fn generate_response(
        &self,
        request: &ModelRequest,
    ) -> Result<RawResponse, ProviderError> {
        let api_request = build_request(&self.config, request)?;
        let start = Instant::now();

        let response = self.post(&api_request).send().await?;
        let (status, body) = read_response(response).await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }

        parse_response(&body, start.elapsed(), "openai")
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "openai".to_owned(),
            model: if self.config.model.is_empty() {
                DEFAULT_MODEL.to_owned()
            } else {
                self.config.model.clone()
            },
            api_version: API_VERSION.to_owned(),
        }
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let probe = OpenAiRequest {
            model: self.model_info().model,
            messages: vec![OpenAiMessage {
                role: "user".to_owned(),
                content: Value::String("ping".to_owned()),
            }],
            max_tokens: Some(1),
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stream: None,
            response_format: None,
        };
        let response = self.post(&probe).timeout(VALIDATION_TIMEOUT).send().await?;
        let (status, body) = read_response(response).await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }
        Ok(())
    }
}
