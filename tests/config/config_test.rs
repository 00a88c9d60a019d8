//! Integration tests for configuration validation and provider
//! config resolution.

use std::collections::HashMap;

use serde_json::json;

use nlquery::config::{
    resolve_provider_config, AppConfig, CacheSettings, MonitorSettings, PersistenceSettings,
    PromptSettings, ProviderSettings, SelectorSettings,
};

fn provider(kind: &str) -> ProviderSettings {
    ProviderSettings {
        kind: kind.to_owned(),
        api_key_env: None,
        endpoint: None,
        model: None,
        parameters: HashMap::new(),
        headers: HashMap::new(),
    }
}

fn config(
    providers: HashMap<String, ProviderSettings>,
    default: &str,
    preferences: &[&str],
) -> AppConfig {
    AppConfig {
        providers,
        selector: SelectorSettings {
            preferences: preferences.iter().map(|s| (*s).to_owned()).collect(),
            default_provider: default.to_owned(),
            ..SelectorSettings::default()
        },
        cache: CacheSettings::default(),
        persistence: PersistenceSettings::default(),
        monitor: MonitorSettings::default(),
        prompts: PromptSettings::default(),
    }
}

fn expect_error(config: &AppConfig, fragment: &str) {
    match config.validate() {
        Err(e) => assert!(
            e.to_string().contains(fragment),
            "expected {fragment:?} in {e:#}"
        ),
        Ok(()) => panic!("validation should fail with {fragment:?}"),
    }
}

#[test]
fn consistent_config_passes_validation() {
    let config = config(
        HashMap::from([("ollama".to_owned(), provider("ollama"))]),
        "ollama",
        &["ollama"],
    );
    match config.validate() {
        Ok(()) => {}
        Err(e) => panic!("validation should pass: {e:#}"),
    }
}

#[test]
fn at_least_one_provider_is_required() {
    let config = config(HashMap::new(), "ollama", &[]);
    expect_error(&config, "at least one provider");
}

#[test]
fn unknown_provider_kind_is_rejected() {
    let config = config(
        HashMap::from([("mystery".to_owned(), provider("mystery"))]),
        "mystery",
        &[],
    );
    expect_error(&config, "unknown kind");
}

#[test]
fn empty_selector_default_is_rejected() {
    let config = config(
        HashMap::from([("ollama".to_owned(), provider("ollama"))]),
        "",
        &[],
    );
    expect_error(&config, "default provider must be configured");
}

#[test]
fn unconfigured_selector_default_is_rejected() {
    let config = config(
        HashMap::from([("ollama".to_owned(), provider("ollama"))]),
        "ghost",
        &[],
    );
    expect_error(&config, "not a configured provider");
}

#[test]
fn unconfigured_preference_is_rejected() {
    let config = config(
        HashMap::from([("ollama".to_owned(), provider("ollama"))]),
        "ollama",
        &["ollama", "ghost"],
    );
    expect_error(&config, "not a configured provider");
}

#[test]
fn family_defaults_seed_the_resolved_config() {
    let resolved = match resolve_provider_config(&provider("anthropic")) {
        Ok(resolved) => resolved,
        Err(e) => panic!("resolution should succeed: {e:#}"),
    };
    assert!(resolved.api_key.is_empty());
    assert!(resolved.endpoint.contains("api.anthropic.com"));
    assert!(!resolved.model.is_empty());
    assert!(resolved.parameters.contains_key("max_tokens"));
}

#[test]
fn file_settings_override_family_defaults() {
    let mut settings = provider("openai");
    settings.endpoint = Some("http://localhost:9999/v1/chat/completions".to_owned());
    settings.model = Some("gpt-4o".to_owned());
    settings
        .parameters
        .insert("temperature".to_owned(), json!(0.9));

    let resolved = match resolve_provider_config(&settings) {
        Ok(resolved) => resolved,
        Err(e) => panic!("resolution should succeed: {e:#}"),
    };
    assert_eq!(resolved.endpoint, "http://localhost:9999/v1/chat/completions");
    assert_eq!(resolved.model, "gpt-4o");
    assert_eq!(resolved.parameters.get("temperature"), Some(&json!(0.9)));
    // Untouched family defaults survive the overlay.
    assert!(resolved.parameters.contains_key("response_format"));
}

#[test]
fn api_keys_resolve_from_the_named_environment_variable() {
    std::env::set_var("NLQUERY_CONFIG_TEST_KEY", "from-env");
    let mut settings = provider("openai");
    settings.api_key_env = Some("NLQUERY_CONFIG_TEST_KEY".to_owned());

    let resolved = match resolve_provider_config(&settings) {
        Ok(resolved) => resolved,
        Err(e) => panic!("resolution should succeed: {e:#}"),
    };
    assert_eq!(resolved.api_key, "from-env");

    let mut settings = provider("openai");
    settings.api_key_env = Some("NLQUERY_CONFIG_TEST_UNSET_KEY".to_owned());
    let resolved = match resolve_provider_config(&settings) {
        Ok(resolved) => resolved,
        Err(e) => panic!("resolution should succeed: {e:#}"),
    };
    assert!(resolved.api_key.is_empty());
}

#[test]
fn custom_headers_are_kept_for_compatible_endpoints() {
    let mut settings = provider("openai_compatible");
    settings.endpoint = Some("http://localhost:8080/v1/chat/completions".to_owned());
    settings
        .headers
        .insert("X-Deployment".to_owned(), "staging".to_owned());

    let resolved = match resolve_provider_config(&settings) {
        Ok(resolved) => resolved,
        Err(e) => panic!("resolution should succeed: {e:#}"),
    };
    assert_eq!(
        resolved.headers.get("X-Deployment"),
        Some(&"staging".to_owned())
    );
}

#[test]
fn unknown_kind_fails_resolution() {
    assert!(resolve_provider_config(&provider("mystery")).is_err());
}
