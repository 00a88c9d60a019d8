//! Ollama local completion API client.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{MessageContent, ModelRequest, ProviderConfig, RawResponse, TokenUsage};

use super::{
    base_metadata, http_client, merge_parameters, model_info_map, read_response, sanitize_error_body,
    ModelInfo, Provider, ProviderError, COMPLETION_TIMEOUT, VALIDATION_TIMEOUT,
};

/// Canonical local completion endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/generate";

/// Default model when neither config nor request names one.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Wire API version tag recorded in response metadata.
pub const API_VERSION: &str = "v1";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Completion request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    /// Model identifier.
    pub model: String,
    /// The complete prompt text.
    pub prompt: String,
    /// Always false on this request path.
    pub stream: bool,
    /// Generation options.
    pub options: OllamaOptions,
    /// Output format constraint (e.g. `"json"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<Value>,
}

/// Generation options.
#[doc(hidden)]
#[derive(Debug, Default, Serialize)]
pub struct OllamaOptions {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u64>,
}

/// Completion response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    /// Model that served the response.
    pub model: Option<String>,
    /// Generated text.
    pub response: String,
    /// Whether generation completed.
    pub done: bool,
    /// Total wall-clock nanoseconds.
    pub total_duration: Option<u64>,
    /// Model load nanoseconds.
    pub load_duration: Option<u64>,
    /// Prompt token count.
    pub prompt_eval_count: Option<u64>,
    /// Prompt evaluation nanoseconds.
    pub prompt_eval_duration: Option<u64>,
    /// Completion token count.
    pub eval_count: Option<u64>,
    /// Completion evaluation nanoseconds.
    pub eval_duration: Option<u64>,
}

/// Error envelope shape.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaErrorEnvelope {
    /// Error description.
    pub error: String,
}

// ---------------------------------------------------------------------------
// Request / response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build the completion request body.
///
/// When the first message carries a provider-native payload it is used
/// as the request body directly (with `model` and `stream` filled in
/// when absent); a plain text message becomes the `prompt` with merged
/// parameter defaults around it.
///
/// # Errors
///
/// Returns [`ProviderError::InvalidRequest`] when the request carries
/// no messages.
#[doc(hidden)]
pub fn build_request_body(
    config: &ProviderConfig,
    request: &ModelRequest,
) -> Result<Value, ProviderError> {
    let first = request.messages.first().ok_or_else(|| {
        ProviderError::InvalidRequest("at least one message is required".to_owned())
    })?;

    let model = if request.model.is_empty() {
        if config.model.is_empty() {
            DEFAULT_MODEL.to_owned()
        } else {
            config.model.clone()
        }
    } else {
        request.model.clone()
    };

    if let MessageContent::Native(payload) = &first.content {
        let mut body = payload.clone();
        if let Value::Object(map) = &mut body {
            map.entry("model".to_owned()).or_insert_with(|| json!(model));
            map.entry("stream".to_owned()).or_insert(json!(false));
        }
        return Ok(body);
    }

    let params = merge_parameters(&HashMap::new(), &config.parameters, &request.parameters);
    let prompt = first
        .content
        .as_text()
        .unwrap_or_default()
        .to_owned();

    let format = params.get("response_format").and_then(|value| match value {
        Value::String(kind) if kind == "json_object" || kind == "json" => Some(json!("json")),
        Value::Object(_) => Some(json!("json")),
        _ => None,
    });

    let wire = OllamaRequest {
        model,
        prompt,
        stream: false,
        options: OllamaOptions {
            temperature: params.get("temperature").and_then(Value::as_f64),
            num_predict: params.get("max_tokens").and_then(Value::as_u64),
        },
        format,
    };
    serde_json::to_value(&wire).map_err(|e| ProviderError::Parse(e.to_string()))
}

/// Decode a non-success body into a provider error.
#[doc(hidden)]
pub fn decode_error(status: u16, body: &str) -> ProviderError {
    match serde_json::from_str::<OllamaErrorEnvelope>(body) {
        Ok(envelope) => ProviderError::Api {
            status,
            kind: None,
            message: envelope.error,
        },
        Err(_) => ProviderError::HttpStatus {
            status,
            body: sanitize_error_body(body),
        },
    }
}

/// Stage durations exposed under `metadata.ollama_metadata`.
#[doc(hidden)]
pub fn stage_metadata(decoded: &OllamaResponse) -> Value {
    json!({
        "total_duration": decoded.total_duration,
        "load_duration": decoded.load_duration,
        "prompt_eval_duration": decoded.prompt_eval_duration,
        "eval_duration": decoded.eval_duration,
        "done": decoded.done,
    })
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Ollama completion API provider. No authentication.
pub struct OllamaProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a provider instance.
    pub fn new(mut config: ProviderConfig) -> Self {
        if config.endpoint.is_empty() {
            config.endpoint = DEFAULT_ENDPOINT.to_owned();
        }
        Self {
            config,
            client: http_client(COMPLETION_TIMEOUT),
        }
    }
}

#[async_trait::async_trait]
impl Provider for OllamaProvider {
    async fn generate_response(
        &self,
        request: &ModelRequest,
    ) -> Result<RawResponse, ProviderError> {
        let body = build_request_body(&self.config, request)?;
        let start = Instant::now();

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;
        let (status, text) = read_response(response).await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &text));
        }
        let elapsed = start.elapsed();

        let decoded: OllamaResponse =
            serde_json::from_str(&text).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let usage = TokenUsage::from_counts(
            decoded.prompt_eval_count.unwrap_or(0),
            decoded.eval_count.unwrap_or(0),
            elapsed,
        );

        let model = decoded.model.clone().unwrap_or_else(|| {
            if self.config.model.is_empty() {
                DEFAULT_MODEL.to_owned()
            } else {
                self.config.model.clone()
            }
        });

        let mut metadata = base_metadata("ollama", API_VERSION, elapsed, &usage);
        metadata.insert("ollama_metadata".to_owned(), stage_metadata(&decoded));

        Ok(RawResponse {
            content: decoded.response,
            model_info: model_info_map(&model, None, decoded.done.then_some("stop")),
            metadata,
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "ollama".to_owned(),
            model: if self.config.model.is_empty() {
                DEFAULT_MODEL.to_owned()
            } else {
                self.config.model.clone()
            },
            api_version: API_VERSION.to_owned(),
        }
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let probe = json!({
            "model": self.model_info().model,
            "prompt": "ping",
            "stream": false,
            "options": { "num_predict": 1 },
        });
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&probe)
            .timeout(VALIDATION_TIMEOUT)
            .send()
            .await?;
        let (status, body) = read_response(response).await?;
        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }
        Ok(())
    }
}
