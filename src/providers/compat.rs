//! Generic OpenAI-compatible chat client.
//!
//! Speaks the same wire format as [`super::openai`] against a
//! configurable endpoint with a caller-supplied header set. When no
//! `Authorization` header is configured and an API key is present, a
//! Bearer header is added.

use std::time::Instant;

use serde_json::Value;

use crate::types::{ModelRequest, ProviderConfig, RawResponse};

use super::openai::{build_request, decode_error, parse_response, OpenAiMessage, OpenAiRequest};
use super::{
    http_client, read_response, ModelInfo, Provider, ProviderError, CHAT_TIMEOUT,
    VALIDATION_TIMEOUT,
};

/// Provider family name used in metadata and registries.
pub const PROVIDER_NAME: &str = "openai_compatible";

/// OpenAI-compatible provider with custom endpoint and headers.
pub struct CompatProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl CompatProvider {
    /// Create a provider instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::InvalidRequest`] when no endpoint is
    /// configured; compatible deployments have no canonical URL.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if config.endpoint.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "openai-compatible provider requires an endpoint".to_owned(),
            ));
        }
        Ok(Self {
            config,
            client: http_client(CHAT_TIMEOUT),
        })
    }

    fn post(&self, body: &OpenAiRequest) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json");
        for (name, value) in &self.config.headers {
            builder = builder.header(name, value);
        }
        let has_auth = self
            .config
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"));
        if !has_auth && !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }
        builder.json(body)
    }
}

#[async_trait::async_trait]
impl Provider for CompatProvider {
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

        parse_response(&body, start.elapsed(), PROVIDER_NAME)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: PROVIDER_NAME.to_owned(),
            model: self.config.model.clone(),
            api_version: super::openai::API_VERSION.to_owned(),
        }
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn validate_connection(&self) -> Result<(), ProviderError> {
        let probe = OpenAiRequest {
            model: self.config.model.clone(),
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
