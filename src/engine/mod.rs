//! Engine facade.
//!
//! [`Engine::process_query`] is the single entry point: it resolves
//! the conversation context (cache, then persistence), asks the
//! selector for a healthy provider, builds the provider request
//! through the matching adapter, issues the call, and records the turn
//! before handing the raw response back. Parsing the response into the
//! final structured query is a downstream collaborator.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapters::{
    AdapterError, AnthropicAdapter, InputAdapter, OllamaAdapter, OpenAiAdapter,
};
use crate::config::AppConfig;
use crate::prompt::{
    ChatFormatter, FormatError, GenericFormatter, PromptFormatter, TemplateParser, XmlFormatter,
};
use crate::providers::selector::SelectorConfig;
use crate::providers::{ModelSelector, ProviderKind, SelectionReason};
use crate::session::monitor::MonitorConfig;
use crate::session::persistence::open_store;
use crate::session::{
    CacheStats, ConversationContext, MemoryMonitor, SessionCache, SessionStore, StoreError,
};
use crate::types::{EngineError, ErrorKind, RawResponse};

/// The query-processing facade.
pub struct Engine {
    cache: Arc<SessionCache>,
    store: Arc<dyn SessionStore>,
    selector: Arc<ModelSelector>,
    monitor: Option<Arc<MemoryMonitor>>,
    adapters: HashMap<String, Arc<dyn InputAdapter>>,
    session_ttl: Option<Duration>,
    save_failures: Arc<AtomicU64>,
}

impl Engine {
    /// Assemble an engine from already-built parts.
    pub fn new(
        cache: Arc<SessionCache>,
        store: Arc<dyn SessionStore>,
        selector: Arc<ModelSelector>,
        adapters: HashMap<String, Arc<dyn InputAdapter>>,
        monitor: Option<Arc<MemoryMonitor>>,
        session_ttl: Option<Duration>,
    ) -> Self {
        Self {
            cache,
            store,
            selector,
            monitor,
            adapters,
            session_ttl,
            save_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Build the full engine from configuration: factory, selector,
    /// one formatter+adapter pair per provider, cache, store, monitor.
    ///
    /// # Errors
    ///
    /// Returns an error when a provider registration, store, or
    /// selector cannot be constructed.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let factory = config.build_factory()?;

        let selector = ModelSelector::new(
            &factory,
            SelectorConfig {
                preferences: config.selector.preferences.clone(),
                default_provider: config.selector.default_provider.clone(),
                check_interval: Duration::from_secs(config.selector.health_interval_secs),
                check_timeout: Duration::from_secs(config.selector.health_timeout_secs),
            },
        )?;

        let parser = Arc::new(TemplateParser::new());
        let mut adapters: HashMap<String, Arc<dyn InputAdapter>> = HashMap::new();
        for (name, settings) in &config.providers {
            let kind = ProviderKind::from_str(&settings.kind)?;
            let template = config
                .prompts
                .templates
                .get(name)
                .cloned()
                .unwrap_or_default();
            let provider_config = factory.config(name).cloned().unwrap_or_default();
            let system = config.prompts.system_prompt.clone();
            let examples = config.prompts.examples.clone();
            let model = provider_config.model.clone();
            let parameters = provider_config.parameters.clone();

            let adapter: Arc<dyn InputAdapter> = match kind {
                ProviderKind::Anthropic => {
                    let formatter: Arc<dyn PromptFormatter> =
                        Arc::new(XmlFormatter::new(template, Arc::clone(&parser)));
                    Arc::new(AnthropicAdapter::new(
                        formatter, system, examples, model, parameters,
                    ))
                }
                ProviderKind::OpenAi => {
                    let formatter: Arc<dyn PromptFormatter> =
                        Arc::new(ChatFormatter::new(template, Arc::clone(&parser)));
                    Arc::new(OpenAiAdapter::new(
                        formatter, system, examples, model, parameters,
                    ))
                }
                ProviderKind::Compat => {
                    let formatter: Arc<dyn PromptFormatter> =
                        Arc::new(ChatFormatter::new(template, Arc::clone(&parser)));
                    Arc::new(OpenAiAdapter::for_compatible(
                        formatter, system, examples, model, parameters,
                    ))
                }
                ProviderKind::Ollama => {
                    let formatter: Arc<dyn PromptFormatter> =
                        Arc::new(GenericFormatter::new(template, Arc::clone(&parser)));
                    Arc::new(OllamaAdapter::new(
                        formatter, system, examples, model, parameters,
                    ))
                }
            };
            adapters.insert(name.clone(), adapter);
        }

        let cache = Arc::new(SessionCache::new(
            config.cache.max_sessions,
            config.cache.max_memory_mb,
        ));
        let store = open_store(&config.persistence.backend, &config.persistence.base_dir).await?;

        let monitor = config.monitor.enabled.then(|| {
            Arc::new(MemoryMonitor::new(MonitorConfig {
                sample_interval: Duration::from_secs(config.monitor.sample_interval_secs),
                moderate_threshold_pct: config.monitor.moderate_threshold_pct,
                warning_threshold_pct: config.monitor.warning_threshold_pct,
                critical_threshold_pct: config.monitor.critical_threshold_pct,
            }))
        });

        Ok(Self::new(
            cache,
            store,
            Arc::new(selector),
            adapters,
            monitor,
            config.cache.session_ttl_secs.map(Duration::from_secs),
        ))
    }

    /// Start the background workers (health checks, memory sampling).
    pub fn start(&self) {
        self.selector.start();
        if let Some(monitor) = &self.monitor {
            monitor.start();
        }
    }

    /// Process one natural-language query within a session.
    ///
    /// An empty session id starts a fresh session under a generated
    /// id. The returned response is the provider output verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] carrying the taxonomy of the failing
    /// stage; async persistence failures are never surfaced here.
    pub async fn process_query(
        &self,
        session_id: &str,
        query: &str,
    ) -> Result<RawResponse, EngineError> {
        let session_id = if session_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            session_id.to_owned()
        };

        if let Some(ttl) = self.session_ttl {
            let expired = self.cache.prune_expired(ttl);
            if expired > 0 {
                debug!(expired, "pruned expired sessions");
            }
        }

        let mut context = self.resolve_context(&session_id).await?;

        let selection = self
            .selector
            .select_model(None)
            .map_err(|e| EngineError::new(ErrorKind::Provider, "selector", e.to_string()))?;
        debug!(
            provider = %selection.provider_name,
            reason = selection.reason.as_str(),
            confidence = selection.confidence,
            "provider selected"
        );

        let adapter = self.adapters.get(&selection.provider_name).ok_or_else(|| {
            EngineError::new(
                ErrorKind::System,
                "engine",
                format!("no adapter registered for {:?}", selection.provider_name),
            )
        })?;

        let request = adapter
            .build_request(query, &context)
            .map_err(|e| adapter_error(&selection.provider_name, &e))?;

        let response = selection
            .provider
            .generate_response(&request)
            .await
            .map_err(|e| {
                EngineError::new(ErrorKind::Provider, selection.provider_name.clone(), e.to_string())
                    .retryable(e.retryable())
            })?;

        self.record_turn(&session_id, &mut context, query, &response, &selection.reason);
        self.spawn_save(session_id, context);

        Ok(response)
    }

    /// Warm the cache from persisted sessions. Returns how many were
    /// loaded.
    ///
    /// # Errors
    ///
    /// Returns a context-kind [`EngineError`] when the store cannot be
    /// read.
    pub async fn load_persisted_sessions(&self) -> Result<usize, EngineError> {
        let sessions = self
            .store
            .load_all_sessions()
            .await
            .map_err(|e| EngineError::new(ErrorKind::Context, "persistence", e.to_string()))?;
        let count = sessions.len();
        for (id, context) in sessions {
            self.cache.put(&id, context);
        }
        if count > 0 {
            info!(count, "persisted sessions loaded");
        }
        Ok(count)
    }

    /// Drop a session from the cache and from persistence.
    pub async fn remove_session(&self, session_id: &str) -> bool {
        let existed = self.cache.remove(session_id);
        if let Err(e) = self.store.delete_session(session_id).await {
            warn!(session_id, error = %e, "failed to delete persisted session");
        }
        existed
    }

    /// Session cache counters.
    pub fn session_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Per-provider health snapshots.
    pub fn health_snapshot(
        &self,
    ) -> HashMap<String, crate::providers::selector::ProviderHealth> {
        self.selector.health_snapshot()
    }

    /// The selector, for operational tooling.
    pub fn selector(&self) -> &Arc<ModelSelector> {
        &self.selector
    }

    /// Async saves that failed since startup.
    pub fn save_failure_count(&self) -> u64 {
        self.save_failures.load(Ordering::Relaxed)
    }

    /// Stop workers, flush cached sessions, and close the store.
    ///
    /// # Errors
    ///
    /// Returns a context-kind [`EngineError`] when the final flush or
    /// close fails.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.selector.stop().await;
        if let Some(monitor) = &self.monitor {
            monitor.stop().await;
        }
        let sessions = self.cache.get_all();
        if !sessions.is_empty() {
            self.store
                .batch_save_sessions(&sessions)
                .await
                .map_err(|e| EngineError::new(ErrorKind::Context, "persistence", e.to_string()))?;
        }
        self.store
            .close()
            .await
            .map_err(|e| EngineError::new(ErrorKind::Context, "persistence", e.to_string()))?;
        info!("engine shut down");
        Ok(())
    }

    /// Cache lookup, falling back to persistence, then a new context.
    async fn resolve_context(&self, session_id: &str) -> Result<ConversationContext, EngineError> {
        if let Some(context) = self.cache.get(session_id) {
            return Ok(context);
        }
        match self.store.load_session(session_id).await {
            Ok(context) => {
                debug!(session_id, "session restored from persistence");
                Ok(context)
            }
            Err(StoreError::NotFound { .. }) => Ok(ConversationContext::new(session_id, "")),
            Err(StoreError::InvalidSessionId { reason, .. }) => Err(EngineError::new(
                ErrorKind::Validation,
                "persistence",
                format!("invalid session id: {reason}"),
            )),
            Err(e) => Err(EngineError::new(
                ErrorKind::Context,
                "persistence",
                e.to_string(),
            )),
        }
    }

    fn record_turn(
        &self,
        session_id: &str,
        context: &mut ConversationContext,
        query: &str,
        response: &RawResponse,
        reason: &SelectionReason,
    ) {
        context.add_history_entry(query, Value::String(response.content.clone()));
        if let Some(last) = context.history.last_mut() {
            let mut metadata = HashMap::new();
            if let Some(provider) = response.provider() {
                metadata.insert("provider".to_owned(), json!(provider));
            }
            metadata.insert("selection_reason".to_owned(), json!(reason.as_str()));
            last.metadata = Some(metadata);
        }
        self.cache.put(session_id, context.clone());
    }

    /// Persist the turn off the request path; failures are logged and
    /// counted, never surfaced.
    fn spawn_save(&self, session_id: String, context: ConversationContext) {
        let store = Arc::clone(&self.store);
        let failures = Arc::clone(&self.save_failures);
        tokio::spawn(async move {
            if let Err(e) = store.save_session(&session_id, &context).await {
                failures.fetch_add(1, Ordering::Relaxed);
                warn!(session_id = %session_id, error = %e, "async session save failed");
            }
        });
    }
}

/// Map an adapter failure onto the surfaced taxonomy: size-limit
/// violations are recoverable validation errors, template machinery
/// failures are adapter conversion errors.
fn adapter_error(provider: &str, error: &AdapterError) -> EngineError {
    let AdapterError::Format(format_error) = error;
    let kind = match format_error {
        FormatError::Template(_) => ErrorKind::InputAdapter,
        _ => ErrorKind::Validation,
    };
    EngineError::new(kind, format!("{provider}_adapter"), error.to_string())
}
