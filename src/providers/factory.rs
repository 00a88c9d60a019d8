//! Provider registry and construction.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;

use crate::types::ProviderConfig;

use super::anthropic::AnthropicProvider;
use super::compat::CompatProvider;
use super::ollama::OllamaProvider;
use super::openai::OpenAiProvider;
use super::{anthropic, ollama, openai, Provider, ProviderError};

/// Provider construction errors.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The provider type string was empty.
    #[error("provider type must not be empty")]
    EmptyProviderType,
    /// The provider type is not a builtin family.
    #[error("unsupported provider type {0:?}")]
    UnknownProviderKind(String),
    /// The config has no API key and the family requires one.
    #[error("provider {0:?} requires an api key")]
    MissingApiKey(String),
    /// No config was registered under the requested type.
    #[error("provider {0:?} is not registered")]
    NotRegistered(String),
    /// The provider constructor rejected the config.
    #[error("provider construction failed: {0}")]
    Construction(#[from] ProviderError),
}

/// The builtin provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Anthropic messages API.
    Anthropic,
    /// OpenAI chat completions API.
    OpenAi,
    /// Ollama local completion API.
    Ollama,
    /// Generic OpenAI-compatible endpoint.
    Compat,
}

impl ProviderKind {
    /// Canonical registry name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Compat => "openai_compatible",
        }
    }

    /// Whether an empty API key is acceptable for this family.
    pub fn allows_empty_api_key(self) -> bool {
        matches!(self, Self::Ollama | Self::Compat)
    }
}

impl FromStr for ProviderKind {
    type Err = FactoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "openai_compatible" | "compat" => Ok(Self::Compat),
            other => Err(FactoryError::UnknownProviderKind(other.to_owned())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry of provider configs and constructor dispatch.
#[derive(Default)]
pub struct ProviderFactory {
    registry: HashMap<String, (ProviderKind, ProviderConfig)>,
}

impl ProviderFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a config under a provider type.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] when the type is empty or unknown, or
    /// when the API key is missing for a family that requires one.
    pub fn register_provider(
        &mut self,
        provider_type: &str,
        config: ProviderConfig,
    ) -> Result<(), FactoryError> {
        if provider_type.is_empty() {
            return Err(FactoryError::EmptyProviderType);
        }
        let kind = ProviderKind::from_str(provider_type)?;
        if config.api_key.is_empty() && !kind.allows_empty_api_key() {
            return Err(FactoryError::MissingApiKey(provider_type.to_owned()));
        }
        self.registry.insert(provider_type.to_owned(), (kind, config));
        Ok(())
    }

    /// Construct a provider from its registered config.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError::NotRegistered`] for unknown types and
    /// propagates constructor failures.
    pub fn create_provider(&self, provider_type: &str) -> Result<Arc<dyn Provider>, FactoryError> {
        let (kind, config) = self
            .registry
            .get(provider_type)
            .ok_or_else(|| FactoryError::NotRegistered(provider_type.to_owned()))?;
        construct(*kind, config.clone())
    }

    /// Construct a provider from an ad-hoc config, bypassing the
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns [`FactoryError`] for unknown types or rejected configs.
    pub fn create_provider_with_config(
        &self,
        provider_type: &str,
        config: ProviderConfig,
    ) -> Result<Arc<dyn Provider>, FactoryError> {
        if provider_type.is_empty() {
            return Err(FactoryError::EmptyProviderType);
        }
        let kind = ProviderKind::from_str(provider_type)?;
        construct(kind, config)
    }

    /// Registered provider types, sorted.
    ///
    /// Registration validates the family, so every registered type is
    /// also a supported one.
    pub fn supported_providers(&self) -> Vec<String> {
        let mut types: Vec<String> = self.registry.keys().cloned().collect();
        types.sort();
        types
    }

    /// Whether a type is registered.
    pub fn is_registered(&self, provider_type: &str) -> bool {
        self.registry.contains_key(provider_type)
    }

    /// The registered config for a type.
    pub fn config(&self, provider_type: &str) -> Option<&ProviderConfig> {
        self.registry.get(provider_type).map(|(_, config)| config)
    }

    /// Canonical starter config for a family: empty key, canonical
    /// endpoint and model, family parameter defaults.
    pub fn default_config(kind: ProviderKind) -> ProviderConfig {
        match kind {
            ProviderKind::Anthropic => ProviderConfig {
                api_key: String::new(),
                endpoint: anthropic::DEFAULT_ENDPOINT.to_owned(),
                model: anthropic::DEFAULT_MODEL.to_owned(),
                parameters: HashMap::from([
                    ("max_tokens".to_owned(), json!(4096)),
                    ("temperature".to_owned(), json!(0.1)),
                ]),
                headers: HashMap::new(),
            },
            ProviderKind::OpenAi => ProviderConfig {
                api_key: String::new(),
                endpoint: openai::DEFAULT_ENDPOINT.to_owned(),
                model: openai::DEFAULT_MODEL.to_owned(),
                parameters: HashMap::from([
                    ("max_tokens".to_owned(), json!(4096)),
                    ("temperature".to_owned(), json!(0.1)),
                    ("response_format".to_owned(), json!({ "type": "json_object" })),
                ]),
                headers: HashMap::new(),
            },
            ProviderKind::Ollama => ProviderConfig {
                api_key: String::new(),
                endpoint: ollama::DEFAULT_ENDPOINT.to_owned(),
                model: ollama::DEFAULT_MODEL.to_owned(),
                parameters: HashMap::from([
                    ("max_tokens".to_owned(), json!(2048)),
                    ("temperature".to_owned(), json!(0.1)),
                ]),
                headers: HashMap::new(),
            },
            ProviderKind::Compat => ProviderConfig {
                api_key: String::new(),
                endpoint: String::new(),
                model: String::new(),
                parameters: HashMap::from([
                    ("max_tokens".to_owned(), json!(4096)),
                    ("temperature".to_owned(), json!(0.1)),
                ]),
                headers: HashMap::new(),
            },
        }
    }
}

fn construct(kind: ProviderKind, config: ProviderConfig) -> Result<Arc<dyn Provider>, FactoryError> {
    match kind {
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new(config)?)),
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(config))),
        ProviderKind::Compat => Ok(Arc::new(CompatProvider::new(config)?)),
    }
}
