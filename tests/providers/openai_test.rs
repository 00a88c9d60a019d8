//! Integration tests for the OpenAI wire codec.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use nlquery::providers::openai::{
    build_request, decode_error, estimate_cost, parse_response, supports_json_mode,
};
use nlquery::providers::ProviderError;
use nlquery::types::{Message, ModelRequest, ProviderConfig, Role};

fn config_with_json_mode(model: &str) -> ProviderConfig {
    ProviderConfig {
        api_key: "test-key".to_owned(),
        endpoint: String::new(),
        model: model.to_owned(),
        parameters: HashMap::from([(
            "response_format".to_owned(),
            json!({ "type": "json_object" }),
        )]),
        headers: HashMap::new(),
    }
}

fn request() -> ModelRequest {
    ModelRequest {
        model: String::new(),
        messages: vec![Message::text(Role::User, "list failed logins")],
        parameters: HashMap::new(),
    }
}

#[test]
fn json_mode_is_stripped_for_models_outside_the_allow_list() {
    let wire = match build_request(&config_with_json_mode("gpt-4"), &request()) {
        Ok(wire) => wire,
        Err(e) => panic!("build should succeed: {e}"),
    };
    let body = match serde_json::to_value(&wire) {
        Ok(body) => body,
        Err(e) => panic!("body should serialize: {e}"),
    };
    assert!(body.get("response_format").is_none());
}

#[test]
fn json_mode_is_kept_for_allow_listed_models() {
    let wire = match build_request(&config_with_json_mode("gpt-4o"), &request()) {
        Ok(wire) => wire,
        Err(e) => panic!("build should succeed: {e}"),
    };
    let body = match serde_json::to_value(&wire) {
        Ok(body) => body,
        Err(e) => panic!("body should serialize: {e}"),
    };
    assert_eq!(
        body.get("response_format"),
        Some(&json!({ "type": "json_object" }))
    );
}

#[test]
fn string_response_format_expands_to_a_type_map() {
    let mut config = config_with_json_mode("gpt-4o-mini");
    config
        .parameters
        .insert("response_format".to_owned(), json!("json_object"));
    let wire = match build_request(&config, &request()) {
        Ok(wire) => wire,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(wire.response_format, Some(json!({ "type": "json_object" })));
}

#[test]
fn allow_list_matches_are_case_insensitive_substrings() {
    assert!(supports_json_mode("gpt-4o"));
    assert!(supports_json_mode("GPT-4O-2024"));
    assert!(supports_json_mode("gpt-4.1-preview"));
    assert!(supports_json_mode("my-4o-mini-deploy"));
    assert!(!supports_json_mode("gpt-4"));
    assert!(!supports_json_mode("gpt-3.5-turbo"));
}

#[test]
fn request_parameters_override_config_parameters() {
    let mut config = config_with_json_mode("gpt-4o");
    config.parameters.insert("temperature".to_owned(), json!(0.1));
    let mut req = request();
    req.parameters.insert("temperature".to_owned(), json!(0.9));
    req.parameters.insert("top_p".to_owned(), json!(0.5));
    req.parameters.insert("stream".to_owned(), json!(false));

    let wire = match build_request(&config, &req) {
        Ok(wire) => wire,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(wire.temperature, Some(0.9));
    assert_eq!(wire.top_p, Some(0.5));
    assert_eq!(wire.stream, Some(false));
}

#[test]
fn known_models_use_their_rate_unknown_models_use_the_default() {
    // 1M prompt tokens at the gpt-4o-mini input rate.
    let mini = estimate_cost("gpt-4o-mini", 1_000_000, 0);
    assert!((mini - 0.15).abs() < 1e-9);

    let full = estimate_cost("gpt-4o", 1_000_000, 1_000_000);
    assert!((full - 12.5).abs() < 1e-9);

    let unknown = estimate_cost("some-house-model", 1_000_000, 0);
    assert!((unknown - 1.0).abs() < 1e-9);
}

#[test]
fn success_body_is_decoded_with_usage_and_cost() {
    let body = json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": "{\"verb\":\"delete\"}" },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120 }
    })
    .to_string();

    let response = match parse_response(&body, Duration::from_secs(2), "openai") {
        Ok(response) => response,
        Err(e) => panic!("parse should succeed: {e}"),
    };
    assert_eq!(response.content, "{\"verb\":\"delete\"}");
    assert_eq!(response.model_info.get("finish_reason"), Some(&json!("stop")));
    assert_eq!(response.metadata.get("provider"), Some(&json!("openai")));

    let usage = match response.usage() {
        Some(usage) => usage,
        None => panic!("usage should be recorded"),
    };
    assert_eq!(usage.total_tokens, 120);
    assert!((usage.tokens_per_second - 60.0).abs() < 1e-9);
    assert_eq!(usage.currency.as_deref(), Some("USD"));
    assert!(usage.estimated_cost.is_some());
}

#[test]
fn missing_choices_is_a_parse_error() {
    let body = json!({ "model": "gpt-4o", "choices": [] }).to_string();
    assert!(matches!(
        parse_response(&body, Duration::from_secs(1), "openai"),
        Err(ProviderError::Parse(_))
    ));
}

#[test]
fn error_envelope_is_decoded() {
    let error = decode_error(
        429,
        r#"{"error":{"message":"rate limited","type":"rate_limit_error","code":"429"}}"#,
    );
    match error {
        ProviderError::Api {
            status,
            kind,
            message,
        } => {
            assert_eq!(status, 429);
            assert_eq!(kind.as_deref(), Some("rate_limit_error"));
            assert_eq!(message, "rate limited");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}
