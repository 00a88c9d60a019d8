//! Integration tests for selector failover behavior.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nlquery::providers::selector::SelectorConfig;
use nlquery::providers::{
    ModelSelector, Provider, ProviderFactory, ProviderKind, SelectionReason, SelectorError,
};

use super::mock_provider::MockProvider;

fn selector_with(names: &[&str], preferences: &[&str], default: &str) -> ModelSelector {
    let providers: HashMap<String, Arc<dyn Provider>> = names
        .iter()
        .map(|name| {
            (
                (*name).to_owned(),
                Arc::new(MockProvider::new(name, "{}")) as Arc<dyn Provider>,
            )
        })
        .collect();
    ModelSelector::for_testing(
        providers,
        SelectorConfig {
            preferences: preferences.iter().map(|s| (*s).to_owned()).collect(),
            default_provider: default.to_owned(),
            check_interval: Duration::from_millis(10),
            check_timeout: Duration::from_secs(1),
        },
    )
}

#[test]
fn preferred_provider_wins_when_healthy() {
    let selector = selector_with(&["claude", "openai"], &["claude", "openai"], "claude");
    assert!(selector.set_health("claude", true).is_ok());
    assert!(selector.set_health("openai", true).is_ok());

    let selection = match selector.select_model(Some("openai")) {
        Ok(selection) => selection,
        Err(e) => panic!("selection should succeed: {e}"),
    };
    assert_eq!(selection.provider_name, "openai");
    assert_eq!(selection.reason, SelectionReason::PreferredModel);
    assert!((selection.confidence - 1.0).abs() < 1e-9);
    assert!(!selection.fallback_used);
}

#[test]
fn preference_order_applies_when_preferred_is_down() {
    let selector = selector_with(&["claude", "openai"], &["claude", "openai"], "claude");
    assert!(selector.set_health("openai", true).is_ok());

    let selection = match selector.select_model(Some("claude")) {
        Ok(selection) => selection,
        Err(e) => panic!("selection should succeed: {e}"),
    };
    assert_eq!(selection.provider_name, "openai");
    assert_eq!(selection.reason, SelectionReason::PreferenceOrder);
    assert!((selection.confidence - 0.9).abs() < 1e-9);
    assert!(selection.fallback_used);
}

#[test]
fn preference_order_without_a_preference_is_not_a_fallback() {
    let selector = selector_with(&["claude", "openai"], &["claude", "openai"], "claude");
    assert!(selector.set_health("claude", true).is_ok());

    let selection = match selector.select_model(None) {
        Ok(selection) => selection,
        Err(e) => panic!("selection should succeed: {e}"),
    };
    assert_eq!(selection.provider_name, "claude");
    assert_eq!(selection.reason, SelectionReason::PreferenceOrder);
    assert!(!selection.fallback_used);
}

#[test]
fn default_provider_backs_up_the_preference_list() {
    let selector = selector_with(&["claude", "openai", "ollama"], &["claude"], "ollama");
    assert!(selector.set_health("ollama", true).is_ok());

    let selection = match selector.select_model(None) {
        Ok(selection) => selection,
        Err(e) => panic!("selection should succeed: {e}"),
    };
    assert_eq!(selection.provider_name, "ollama");
    assert_eq!(selection.reason, SelectionReason::DefaultProvider);
    assert!((selection.confidence - 0.7).abs() < 1e-9);
    assert!(selection.fallback_used);
}

#[test]
fn any_healthy_provider_is_the_last_resort() {
    let selector = selector_with(&["claude", "openai", "zeta"], &["claude"], "openai");
    assert!(selector.set_health("zeta", true).is_ok());

    let selection = match selector.select_model(None) {
        Ok(selection) => selection,
        Err(e) => panic!("selection should succeed: {e}"),
    };
    assert_eq!(selection.provider_name, "zeta");
    assert_eq!(selection.reason, SelectionReason::AnyHealthy);
    assert!((selection.confidence - 0.5).abs() < 1e-9);
}

#[test]
fn no_healthy_providers_is_an_error() {
    let selector = selector_with(&["claude", "openai"], &["claude"], "openai");
    match selector.select_model(None) {
        Err(e) => assert_eq!(e.to_string(), "no healthy providers available"),
        Ok(selection) => panic!("selection should fail, got {selection:?}"),
    }
}

#[test]
fn health_recovers_after_flipping_a_provider() {
    let selector = selector_with(&["claude", "openai"], &["claude", "openai"], "claude");
    assert!(matches!(
        selector.select_model(None),
        Err(SelectorError::NoHealthyProviders)
    ));

    assert!(selector.set_health("openai", true).is_ok());
    match selector.select_model(None) {
        Ok(selection) => assert_eq!(selection.provider_name, "openai"),
        Err(e) => panic!("selection should recover: {e}"),
    }
}

#[test]
fn preference_updates_reject_unknown_names() {
    let selector = selector_with(&["claude"], &[], "claude");
    assert!(matches!(
        selector.update_preferences(vec!["claude".to_owned(), "ghost".to_owned()]),
        Err(SelectorError::UnknownProvider(_))
    ));
    assert!(selector.update_preferences(vec!["claude".to_owned()]).is_ok());
}

#[test]
fn default_provider_updates_reject_unknown_names() {
    let selector = selector_with(&["claude"], &[], "claude");
    assert!(matches!(
        selector.set_default_provider("ghost"),
        Err(SelectorError::UnknownProvider(_))
    ));
    assert!(selector.set_default_provider("claude").is_ok());
}

#[test]
fn construction_rejects_unknown_default_and_preferences() {
    let mut factory = ProviderFactory::new();
    let mut config = ProviderFactory::default_config(ProviderKind::OpenAi);
    config.api_key = "test-key".to_owned();
    assert!(factory.register_provider("openai", config).is_ok());

    let bad_default = ModelSelector::new(
        &factory,
        SelectorConfig {
            preferences: Vec::new(),
            default_provider: "ghost".to_owned(),
            ..SelectorConfig::default()
        },
    );
    assert!(matches!(bad_default, Err(SelectorError::UnknownProvider(_))));

    let no_default = ModelSelector::new(
        &factory,
        SelectorConfig {
            preferences: vec!["openai".to_owned()],
            default_provider: String::new(),
            ..SelectorConfig::default()
        },
    );
    assert!(matches!(no_default, Err(SelectorError::MissingDefault)));

    let bad_preference = ModelSelector::new(
        &factory,
        SelectorConfig {
            preferences: vec!["ghost".to_owned()],
            default_provider: "openai".to_owned(),
            ..SelectorConfig::default()
        },
    );
    assert!(matches!(
        bad_preference,
        Err(SelectorError::UnknownProvider(_))
    ));
}

#[test]
fn snapshot_starts_unhealthy_with_no_checks() {
    let selector = selector_with(&["claude"], &[], "claude");
    let snapshot = selector.health_snapshot();
    match snapshot.get("claude") {
        Some(health) => {
            assert!(!health.is_healthy);
            assert_eq!(health.check_count, 0);
            assert!(health.last_check.is_none());
            assert!((health.success_rate - 0.0).abs() < 1e-9);
        }
        None => panic!("claude should be in the snapshot"),
    }
}

#[tokio::test]
async fn force_check_probes_and_publishes_results() {
    let healthy = Arc::new(MockProvider::new("up", "{}"));
    let sick = Arc::new(MockProvider::new("down", "{}"));
    sick.healthy
        .store(false, std::sync::atomic::Ordering::SeqCst);

    let providers: HashMap<String, Arc<dyn Provider>> = HashMap::from([
        ("up".to_owned(), healthy as Arc<dyn Provider>),
        ("down".to_owned(), sick as Arc<dyn Provider>),
    ]);
    let selector = ModelSelector::for_testing(
        providers,
        SelectorConfig {
            preferences: vec!["down".to_owned(), "up".to_owned()],
            default_provider: "up".to_owned(),
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(1),
        },
    );

    selector.force_health_check().await;

    let snapshot = selector.health_snapshot();
    match (snapshot.get("up"), snapshot.get("down")) {
        (Some(up), Some(down)) => {
            assert!(up.is_healthy);
            assert_eq!(up.check_count, 1);
            assert!((up.success_rate - 1.0).abs() < 1e-9);
            assert!(!down.is_healthy);
            assert_eq!(down.error_count, 1);
            assert!(down.last_error.is_some());
        }
        other => panic!("both providers should be in the snapshot: {other:?}"),
    }

    match selector.select_model(None) {
        Ok(selection) => {
            assert_eq!(selection.provider_name, "up");
            assert_eq!(selection.reason, SelectionReason::PreferenceOrder);
        }
        Err(e) => panic!("selection should succeed after the round: {e}"),
    }
}

#[tokio::test]
async fn background_worker_runs_rounds_and_stops_idempotently() {
    let providers: HashMap<String, Arc<dyn Provider>> = HashMap::from([(
        "up".to_owned(),
        Arc::new(MockProvider::new("up", "{}")) as Arc<dyn Provider>,
    )]);
    let selector = ModelSelector::for_testing(
        providers,
        SelectorConfig {
            preferences: vec!["up".to_owned()],
            default_provider: "up".to_owned(),
            check_interval: Duration::from_millis(10),
            check_timeout: Duration::from_secs(1),
        },
    );

    selector.start();
    selector.start();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = selector.health_snapshot();
    match snapshot.get("up") {
        Some(health) => assert!(health.check_count >= 1),
        None => panic!("provider should be in the snapshot"),
    }

    selector.stop().await;
    selector.stop().await;
}
