//! Health-checked provider selection.
//!
//! The selector owns one entry per registered provider, probes them on
//! a background tick, and resolves each call to the best healthy
//! provider: preferred → preference order → default → any healthy.
//! Probes run outside the state lock; only the results are published
//! under a short write lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::factory::{FactoryError, ProviderFactory};
use super::Provider;

/// Selector configuration.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Provider names in failover order.
    pub preferences: Vec<String>,
    /// Name of the default provider.
    pub default_provider: String,
    /// Interval between background health rounds.
    pub check_interval: Duration,
    /// Per-probe timeout.
    pub check_timeout: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            preferences: Vec::new(),
            default_provider: String::new(),
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(10),
        }
    }
}

/// Selection errors.
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// Every registered provider is currently unhealthy.
    #[error("no healthy providers available")]
    NoHealthyProviders,
    /// A name references no registered provider.
    #[error("unknown provider {0:?}")]
    UnknownProvider(String),
    /// No default provider was configured.
    #[error("default provider must be configured")]
    MissingDefault,
    /// A provider could not be constructed at initialization.
    #[error("selector initialization failed: {0}")]
    Init(#[from] FactoryError),
}

/// Why a provider was selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    /// The caller's preferred provider was healthy.
    PreferredModel,
    /// First healthy entry in the preference order.
    PreferenceOrder,
    /// The default provider was healthy.
    DefaultProvider,
    /// Any healthy provider, last resort.
    AnyHealthy,
}

impl SelectionReason {
    /// Snake-case name used in logs and response metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreferredModel => "preferred_model",
            Self::PreferenceOrder => "preference_order",
            Self::DefaultProvider => "default_provider",
            Self::AnyHealthy => "any_healthy",
        }
    }
}

/// The outcome of a selection.
#[derive(Clone)]
pub struct Selection {
    /// Selected provider name.
    pub provider_name: String,
    /// Selected provider handle.
    pub provider: Arc<dyn Provider>,
    /// Which rule matched.
    pub reason: SelectionReason,
    /// Confidence in the choice, 1.0 down to 0.5.
    pub confidence: f64,
    /// Whether a provider other than the caller's preference was used.
    pub fallback_used: bool,
}

impl std::fmt::Debug for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selection")
            .field("provider_name", &self.provider_name)
            .field("reason", &self.reason)
            .field("confidence", &self.confidence)
            .field("fallback_used", &self.fallback_used)
            .finish()
    }
}

/// Health snapshot for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    /// Whether the last probe succeeded.
    pub is_healthy: bool,
    /// When the last probe completed.
    pub last_check: Option<DateTime<Utc>>,
    /// Last probe round-trip in milliseconds.
    pub response_time_ms: u64,
    /// Probes performed.
    pub check_count: u64,
    /// Probes that failed.
    pub error_count: u64,
    /// `1 - error_count / check_count`, 0 before the first probe.
    pub success_rate: f64,
    /// Message from the last failed probe.
    pub last_error: Option<String>,
}

struct ProviderEntry {
    provider: Arc<dyn Provider>,
    is_healthy: bool,
    last_check: Option<DateTime<Utc>>,
    check_count: u64,
    error_count: u64,
    response_time: Duration,
    last_error: Option<String>,
}

impl ProviderEntry {
    fn health(&self) -> ProviderHealth {
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if self.check_count == 0 {
            0.0
        } else {
            1.0 - (self.error_count as f64) / (self.check_count as f64)
        };
        ProviderHealth {
            is_healthy: self.is_healthy,
            last_check: self.last_check,
            response_time_ms: u64::try_from(self.response_time.as_millis()).unwrap_or(u64::MAX),
            check_count: self.check_count,
            error_count: self.error_count,
            success_rate,
            last_error: self.last_error.clone(),
        }
    }
}

struct SelectorState {
    providers: HashMap<String, ProviderEntry>,
    preferences: Vec<String>,
    default_provider: String,
}

/// Health-checked provider selector.
pub struct ModelSelector {
    state: Arc<RwLock<SelectorState>>,
    check_interval: Duration,
    check_timeout: Duration,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ModelSelector {
    /// Build the selector, constructing one provider per registered
    /// type. All providers start unhealthy until the first round.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::Init`] when a provider cannot be
    /// constructed, [`SelectorError::MissingDefault`] when no default
    /// provider is configured, and [`SelectorError::UnknownProvider`]
    /// when the default or a preference names an unregistered
    /// provider.
    pub fn new(factory: &ProviderFactory, config: SelectorConfig) -> Result<Self, SelectorError> {
        let mut providers = HashMap::new();
        for provider_type in factory.supported_providers() {
            let provider = factory.create_provider(&provider_type)?;
            providers.insert(
                provider_type.clone(),
                ProviderEntry {
                    provider,
                    is_healthy: false,
                    last_check: None,
                    check_count: 0,
                    error_count: 0,
                    response_time: Duration::ZERO,
                    last_error: None,
                },
            );
        }

        if config.default_provider.is_empty() {
            return Err(SelectorError::MissingDefault);
        }
        if !providers.contains_key(&config.default_provider) {
            return Err(SelectorError::UnknownProvider(config.default_provider));
        }
        for name in &config.preferences {
            if !providers.contains_key(name) {
                return Err(SelectorError::UnknownProvider(name.clone()));
            }
        }

        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            state: Arc::new(RwLock::new(SelectorState {
                providers,
                preferences: config.preferences,
                default_provider: config.default_provider,
            })),
            check_interval: config.check_interval,
            check_timeout: config.check_timeout,
            shutdown,
            worker: Mutex::new(None),
        })
    }

    /// Selector over pre-built provider handles, for integration
    /// tests.
    #[doc(hidden)]
    pub fn for_testing(
        providers: HashMap<String, Arc<dyn Provider>>,
        config: SelectorConfig,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|(name, provider)| {
                (
                    name,
                    ProviderEntry {
                        provider,
                        is_healthy: false,
                        last_check: None,
                        check_count: 0,
                        error_count: 0,
                        response_time: Duration::ZERO,
                        last_error: None,
                    },
                )
            })
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            state: Arc::new(RwLock::new(SelectorState {
                providers,
                preferences: config.preferences,
                default_provider: config.default_provider,
            })),
            check_interval: config.check_interval,
            check_timeout: config.check_timeout,
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Pick a provider for a call.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::NoHealthyProviders`] when nothing is
    /// healthy.
    pub fn select_model(&self, preferred: Option<&str>) -> Result<Selection, SelectorError> {
        let state = self
            .state
            .read()
            .map_err(|_| SelectorError::NoHealthyProviders)?;

        if let Some(name) = preferred {
            if let Some(entry) = state.providers.get(name) {
                if entry.is_healthy {
                    return Ok(Selection {
                        provider_name: name.to_owned(),
                        provider: Arc::clone(&entry.provider),
                        reason: SelectionReason::PreferredModel,
                        confidence: 1.0,
                        fallback_used: false,
                    });
                }
            }
        }

        for name in &state.preferences {
            if let Some(entry) = state.providers.get(name) {
                if entry.is_healthy {
                    return Ok(Selection {
                        provider_name: name.clone(),
                        provider: Arc::clone(&entry.provider),
                        reason: SelectionReason::PreferenceOrder,
                        confidence: 0.9,
                        fallback_used: preferred.is_some(),
                    });
                }
            }
        }

        if let Some(entry) = state.providers.get(&state.default_provider) {
            if entry.is_healthy {
                return Ok(Selection {
                    provider_name: state.default_provider.clone(),
                    provider: Arc::clone(&entry.provider),
                    reason: SelectionReason::DefaultProvider,
                    confidence: 0.7,
                    fallback_used: true,
                });
            }
        }

        let mut names: Vec<&String> = state.providers.keys().collect();
        names.sort();
        for name in names {
            if let Some(entry) = state.providers.get(name) {
                if entry.is_healthy {
                    return Ok(Selection {
                        provider_name: name.clone(),
                        provider: Arc::clone(&entry.provider),
                        reason: SelectionReason::AnyHealthy,
                        confidence: 0.5,
                        fallback_used: true,
                    });
                }
            }
        }

        Err(SelectorError::NoHealthyProviders)
    }

    /// Replace the preference order.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownProvider`] for any unregistered
    /// name; the order is unchanged on failure.
    pub fn update_preferences(&self, preferences: Vec<String>) -> Result<(), SelectorError> {
        let Ok(mut state) = self.state.write() else {
            return Ok(());
        };
        for name in &preferences {
            if !state.providers.contains_key(name) {
                return Err(SelectorError::UnknownProvider(name.clone()));
            }
        }
        info!(?preferences, "selector preferences updated");
        state.preferences = preferences;
        Ok(())
    }

    /// Replace the default provider.
    ///
    /// # Errors
    ///
    /// Returns [`SelectorError::UnknownProvider`] when the name is not
    /// registered.
    pub fn set_default_provider(&self, name: &str) -> Result<(), SelectorError> {
        let Ok(mut state) = self.state.write() else {
            return Ok(());
        };
        if !state.providers.contains_key(name) {
            return Err(SelectorError::UnknownProvider(name.to_owned()));
        }
        state.default_provider = name.to_owned();
        Ok(())
    }

    /// Health snapshot per provider.
    pub fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        match self.state.read() {
            Ok(state) => state
                .providers
                .iter()
                .map(|(name, entry)| (name.clone(), entry.health()))
                .collect(),
            Err(_) => HashMap::new(),
        }
    }

    /// Run one synchronous health round.
    pub async fn force_health_check(&self) {
        run_health_round(&self.state, self.check_timeout).await;
    }

    /// Override a provider's health flag directly.
    ///
    /// Intended for tests and operational tooling; the next probe
    /// round overwrites it.
    pub fn set_health(&self, name: &str, healthy: bool) -> Result<(), SelectorError> {
        let Ok(mut state) = self.state.write() else {
            return Ok(());
        };
        match state.providers.get_mut(name) {
            Some(entry) => {
                entry.is_healthy = healthy;
                Ok(())
            }
            None => Err(SelectorError::UnknownProvider(name.to_owned())),
        }
    }

    /// Start the background health worker. Idempotent.
    ///
    /// The worker performs one immediate round, then ticks at the
    /// configured interval until [`ModelSelector::stop`].
    pub fn start(&self) {
        let Ok(mut worker) = self.worker.lock() else {
            return;
        };
        if worker.is_some() {
            return;
        }
        self.shutdown.send_replace(false);
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown.subscribe();
        let interval = self.check_interval;
        let timeout = self.check_timeout;
        *worker = Some(tokio::spawn(async move {
            run_health_round(&state, timeout).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; consume it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        run_health_round(&state, timeout).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("selector health worker stopped");
        }));
    }

    /// Stop the background worker and wait for it to exit. Idempotent.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Probe every provider once and publish the results.
///
/// Probes run without holding the state lock; each result is
/// published under its own short write lock.
async fn run_health_round(state: &Arc<RwLock<SelectorState>>, timeout: Duration) {
    let probes: Vec<(String, Arc<dyn Provider>)> = match state.read() {
        Ok(state) => state
            .providers
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.provider)))
            .collect(),
        Err(_) => return,
    };

    for (name, provider) in probes {
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, provider.validate_connection()).await;
        let elapsed = start.elapsed();

        let (is_healthy, last_error) = match outcome {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (
                false,
                Some(format!("health check timed out after {}s", timeout.as_secs())),
            ),
        };

        if let Some(error) = &last_error {
            warn!(provider = %name, error = %error, "provider health check failed");
        } else {
            debug!(provider = %name, elapsed_ms = %elapsed.as_millis(), "provider healthy");
        }

        if let Ok(mut state) = state.write() {
            if let Some(entry) = state.providers.get_mut(&name) {
                entry.last_check = Some(Utc::now());
                entry.check_count = entry.check_count.saturating_add(1);
                entry.response_time = elapsed;
                entry.is_healthy = is_healthy;
                if !is_healthy {
                    entry.error_count = entry.error_count.saturating_add(1);
                }
                entry.last_error = last_error;
            }
        }
    }
}
