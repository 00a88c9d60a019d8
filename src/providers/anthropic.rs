//! Anthropic messages API client.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{MessageContent, ModelRequest, ProviderConfig, RawResponse, TokenUsage};

use super::{
    base_metadata, http_client, merge_parameters, model_info_map, read_response, sanitize_error_body,
    ModelInfo, Provider, ProviderError, CHAT_TIMEOUT, VALIDATION_TIMEOUT,
};

/// Canonical messages endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com/v1/messages";

/// Default model when neither config nor request names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

/// Wire API version header value.
pub const API_VERSION: &str = "2023-06-01";

/// `max_tokens` is mandatory on this API; used when nothing sets it.
const DEFAULT_MAX_TOKENS: u64 = 4096;

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Messages API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<AnthropicMessage>,
    /// Maximum completion tokens (required by the API).
    pub max_tokens: u64,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// System prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// A message in messages API format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct AnthropicMessage {
    /// Role (`user` or `assistant`).
    pub role: String,
    /// Message content — plain text or a native payload.
    pub content: Value,
}

/// Messages API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicResponse {
    /// Response identifier.
    pub id: String,
    /// Content blocks.
    pub content: Vec<AnthropicContentBlock>,
    /// Model that served the response.
    pub model: String,
    /// Why generation stopped.
    pub stop_reason: Option<String>,
    /// Token usage.
    pub usage: Option<AnthropicUsage>,
}

/// One content block in a response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicContentBlock {
    /// Block type (`text`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Text payload for `text` blocks.
    pub text: Option<String>,
}

/// Token usage in a response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicUsage {
    /// Prompt tokens.
    pub input_tokens: Option<u64>,
    /// Completion tokens.
    pub output_tokens: Option<u64>,
}

/// Error envelope shape.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct AnthropicErrorEnvelope {
    /// Error type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Error description.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Request / response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build a messages API request from the internal request.
///
/// # Errors
///
/// Returns [`ProviderError::InvalidRequest`] when the request carries
/// no messages.
#[doc(hidden)]
pub fn build_request(
    config: &ProviderConfig,
    request: &ModelRequest,
) -> Result<AnthropicRequest, ProviderError> {
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
        .map(|message| AnthropicMessage {
            role: message.role.as_str().to_owned(),
            content: match &message.content {
                MessageContent::Text(text) => Value::String(text.clone()),
                MessageContent::Native(value) => value.clone(),
            },
        })
        .collect();

    Ok(AnthropicRequest {
        model,
        messages,
        max_tokens: params
            .get("max_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: params.get("temperature").and_then(Value::as_f64),
        system: params
            .get("system")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
    })
}

/// Decode a non-success body into a provider error.
#[doc(hidden)]
pub fn decode_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<AnthropicErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status,
            kind: Some(envelope.kind),
            message: envelope.message,
        },
        Err(_) => ProviderError::HttpStatus {
            status,
            body: sanitize_error_body(body),
        },
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Anthropic messages API provider.
pub struct AnthropicProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
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

    fn post(&self, body: &AnthropicRequest) -> reqwest::RequestBuilder {
        self.client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
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
        let elapsed = start.elapsed();

        let decoded: AnthropicResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = decoded
            .content
            .iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text.as_deref())
            .unwrap_or_default()
            .to_owned();

        let usage = TokenUsage::from_counts(
            decoded
                .usage
                .as_ref()
                .and_then(|u| u.input_tokens)
                .unwrap_or(0),
            decoded
                .usage
                .as_ref()
                .and_then(|u| u.output_tokens)
                .unwrap_or(0),
            elapsed,
        );

        Ok(RawResponse {
            content,
            model_info: model_info_map(
                &decoded.model,
                Some(&decoded.id),
                decoded.stop_reason.as_deref(),
            ),
            metadata: base_metadata("anthropic", API_VERSION, elapsed, &usage),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "anthropic".to_owned(),
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
        let probe = AnthropicRequest {
            model: self.model_info().model,
            messages: vec![AnthropicMessage {
                role: "user".to_owned(),
                content: Value::String("ping".to_owned()),
            }],
            max_tokens: 1,
            temperature: None,
            system: None,
        };
        let response = self.post(&probe).timeout(VALIDATION_TIMEOUT).send().await?;
        let (status, body) = read_response(response).await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }
        Ok(())
    }
}
