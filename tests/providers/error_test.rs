//! Integration tests for provider error classification.

use nlquery::providers::ProviderError;
use nlquery::types::{EngineError, ErrorKind};

#[test]
fn rate_limits_and_server_errors_are_retryable() {
    let rate_limited = ProviderError::Api {
        status: 429,
        kind: None,
        message: "slow down".to_owned(),
    };
    assert!(rate_limited.retryable());

    let server = ProviderError::HttpStatus {
        status: 503,
        body: "unavailable".to_owned(),
    };
    assert!(server.retryable());
}

#[test]
fn client_errors_are_not_retryable() {
    let bad_request = ProviderError::Api {
        status: 400,
        kind: None,
        message: "bad".to_owned(),
    };
    assert!(!bad_request.retryable());

    let unauthorized = ProviderError::HttpStatus {
        status: 401,
        body: "no".to_owned(),
    };
    assert!(!unauthorized.retryable());

    assert!(!ProviderError::MissingApiKey.retryable());
    assert!(!ProviderError::Parse("bad json".to_owned()).retryable());
}

#[test]
fn http_status_display_matches_the_contract() {
    let error = ProviderError::HttpStatus {
        status: 404,
        body: "not found".to_owned(),
    };
    assert_eq!(error.to_string(), "HTTP 404: not found");
}

#[test]
fn error_kinds_carry_their_recoverability() {
    assert!(ErrorKind::Validation.default_recoverable());
    assert!(ErrorKind::Context.default_recoverable());
    assert!(!ErrorKind::InputAdapter.default_recoverable());
    assert!(!ErrorKind::Parsing.default_recoverable());
    assert!(!ErrorKind::System.default_recoverable());
}

#[test]
fn retryable_engine_errors_become_recoverable() {
    let error = EngineError::new(ErrorKind::Provider, "openai", "HTTP 503: unavailable");
    assert!(!error.recoverable);

    let error = error.retryable(true);
    assert!(error.retryable);
    assert!(error.recoverable);
}

#[test]
fn engine_error_display_names_kind_and_component() {
    let error = EngineError::new(ErrorKind::Provider, "selector", "no healthy providers available");
    assert_eq!(
        error.to_string(),
        "[provider/selector] no healthy providers available"
    );
}
