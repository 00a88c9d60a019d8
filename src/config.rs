//! Configuration loading and validation.
//!
//! One TOML file describes the provider set, selector policy, session
//! cache bounds, persistence backend, memory monitor thresholds, and
//! prompt material. API keys never live in the file; each provider
//! names the environment variable that holds its key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;

use crate::prompt::Example;
use crate::providers::{ProviderFactory, ProviderKind};
use crate::types::ProviderConfig;

/// Top-level application configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Provider registrations, keyed by provider type.
    pub providers: HashMap<String, ProviderSettings>,

    /// Selector failover policy.
    #[serde(default)]
    pub selector: SelectorSettings,

    /// Session cache bounds.
    #[serde(default)]
    pub cache: CacheSettings,

    /// Persistence backend selection.
    #[serde(default)]
    pub persistence: PersistenceSettings,

    /// Memory monitor thresholds.
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Prompt material shared by all adapters.
    #[serde(default)]
    pub prompts: PromptSettings,
}

/// One provider registration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    /// Provider family (`anthropic`, `openai`, `ollama`,
    /// `openai_compatible`).
    pub kind: String,

    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Endpoint override; the family default applies when unset.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model override; the family default applies when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// Parameter overrides overlaid on the family defaults.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,

    /// Custom headers (OpenAI-compatible endpoints).
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Selector failover policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectorSettings {
    /// Provider names in failover order.
    #[serde(default)]
    pub preferences: Vec<String>,

    /// Default provider name.
    #[serde(default, rename = "default")]
    pub default_provider: String,

    /// Seconds between background health rounds.
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Per-probe timeout in seconds.
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            preferences: Vec::new(),
            default_provider: String::new(),
            health_interval_secs: default_health_interval_secs(),
            health_timeout_secs: default_health_timeout_secs(),
        }
    }
}

/// Session cache bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Maximum cached sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Maximum estimated cache memory in MiB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,

    /// Idle seconds after which a session expires; unset disables TTL.
    #[serde(default)]
    pub session_ttl_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            max_memory_mb: default_max_memory_mb(),
            session_ttl_secs: None,
        }
    }
}

/// Persistence backend selection.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceSettings {
    /// Backend name (`file` or `memory`).
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Base directory for the file backend.
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_dir: default_base_dir(),
        }
    }
}

/// Memory monitor thresholds.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSettings {
    /// Whether the background monitor runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between background samples.
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Usage percentage where pressure becomes moderate.
    #[serde(default = "default_moderate_pct")]
    pub moderate_threshold_pct: f64,

    /// Usage percentage where the warning callback fires.
    #[serde(default = "default_warning_pct")]
    pub warning_threshold_pct: f64,

    /// Usage percentage where the critical callback fires.
    #[serde(default = "default_critical_pct")]
    pub critical_threshold_pct: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sample_interval_secs: default_sample_interval_secs(),
            moderate_threshold_pct: default_moderate_pct(),
            warning_threshold_pct: default_warning_pct(),
            critical_threshold_pct: default_critical_pct(),
        }
    }
}

/// Prompt material shared by all adapters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptSettings {
    /// System prompt for every provider family.
    #[serde(default)]
    pub system_prompt: String,

    /// Optional template override per family (`anthropic`, `openai`,
    /// `ollama`, `openai_compatible`).
    #[serde(default)]
    pub templates: HashMap<String, String>,

    /// Few-shot examples injected into every prompt.
    #[serde(default)]
    pub examples: Vec<Example>,
}

impl AppConfig {
    /// Load and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed, or
    /// when validation fails.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown provider kinds, a missing selector
    /// default, or a default/preference naming an unconfigured
    /// provider.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured");
        }
        for (name, settings) in &self.providers {
            ProviderKind::from_str(&settings.kind)
                .with_context(|| format!("provider {name:?} has an unknown kind"))?;
        }
        let default = &self.selector.default_provider;
        if default.is_empty() {
            anyhow::bail!("selector default provider must be configured");
        }
        if !self.providers.contains_key(default) {
            anyhow::bail!("selector default {default:?} is not a configured provider");
        }
        for name in &self.selector.preferences {
            if !self.providers.contains_key(name) {
                anyhow::bail!("selector preference {name:?} is not a configured provider");
            }
        }
        Ok(())
    }

    /// Register every configured provider with a factory, resolving
    /// API keys from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when a registration is rejected (e.g. a
    /// missing API key for a family that requires one).
    pub fn build_factory(&self) -> anyhow::Result<ProviderFactory> {
        let mut factory = ProviderFactory::new();
        for (name, settings) in &self.providers {
            let config = resolve_provider_config(settings)?;
            factory
                .register_provider(name, config)
                .with_context(|| format!("failed to register provider {name:?}"))?;
        }
        Ok(factory)
    }
}

/// Materialize a [`ProviderConfig`], starting from the family defaults
/// and overlaying the file settings and the environment API key.
///
/// # Errors
///
/// Returns an error for an unknown provider kind.
pub fn resolve_provider_config(settings: &ProviderSettings) -> anyhow::Result<ProviderConfig> {
    let kind = ProviderKind::from_str(&settings.kind)
        .with_context(|| format!("unknown provider kind {:?}", settings.kind))?;
    let mut config = ProviderFactory::default_config(kind);

    if let Some(env_name) = &settings.api_key_env {
        config.api_key = std::env::var(env_name).unwrap_or_default();
    }
    if let Some(endpoint) = &settings.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(model) = &settings.model {
        config.model = model.clone();
    }
    for (key, value) in &settings.parameters {
        config.parameters.insert(key.clone(), value.clone());
    }
    for (name, value) in &settings.headers {
        config.headers.insert(name.clone(), value.clone());
    }
    Ok(config)
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_health_timeout_secs() -> u64 {
    10
}

fn default_max_sessions() -> usize {
    1000
}

fn default_max_memory_mb() -> usize {
    256
}

fn default_backend() -> String {
    "file".to_owned()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_sample_interval_secs() -> u64 {
    30
}

fn default_moderate_pct() -> f64 {
    50.0
}

fn default_warning_pct() -> f64 {
    75.0
}

fn default_critical_pct() -> f64 {
    90.0
}
