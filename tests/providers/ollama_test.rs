//! Integration tests for the Ollama wire codec.

use std::collections::HashMap;

use serde_json::json;

use nlquery::providers::ollama::{build_request_body, decode_error, OllamaProvider};
use nlquery::providers::{Provider, ProviderError};
use nlquery::types::{Message, ModelRequest, ProviderConfig, Role};

fn config() -> ProviderConfig {
    ProviderConfig {
        api_key: String::new(),
        endpoint: String::new(),
        model: "llama3.2".to_owned(),
        parameters: HashMap::from([
            ("max_tokens".to_owned(), json!(256)),
            ("temperature".to_owned(), json!(0.2)),
        ]),
        headers: HashMap::new(),
    }
}

fn text_request(prompt: &str) -> ModelRequest {
    ModelRequest {
        model: String::new(),
        messages: vec![Message::text(Role::User, prompt)],
        parameters: HashMap::new(),
    }
}

#[test]
fn text_content_becomes_the_prompt_with_merged_options() {
    let body = match build_request_body(&config(), &text_request("who restarted the api?")) {
        Ok(body) => body,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(body.get("model"), Some(&json!("llama3.2")));
    assert_eq!(body.get("prompt"), Some(&json!("who restarted the api?")));
    assert_eq!(body.get("stream"), Some(&json!(false)));
    assert_eq!(
        body.get("options"),
        Some(&json!({ "temperature": 0.2, "num_predict": 256 }))
    );
}

#[test]
fn response_format_requests_json_output() {
    let mut req = text_request("q");
    req.parameters
        .insert("response_format".to_owned(), json!({ "type": "json_object" }));
    let body = match build_request_body(&config(), &req) {
        Ok(body) => body,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(body.get("format"), Some(&json!("json")));
}

#[test]
fn native_payload_is_used_directly() {
    let mut req = text_request("ignored");
    req.messages = vec![Message::native(
        Role::User,
        json!({ "prompt": "raw prompt", "options": { "num_predict": 8 } }),
    )];
    let body = match build_request_body(&config(), &req) {
        Ok(body) => body,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(body.get("prompt"), Some(&json!("raw prompt")));
    assert_eq!(body.get("options"), Some(&json!({ "num_predict": 8 })));
    // The defaults fill in what the payload omitted.
    assert_eq!(body.get("model"), Some(&json!("llama3.2")));
    assert_eq!(body.get("stream"), Some(&json!(false)));
}

#[test]
fn native_payload_keeps_its_own_model() {
    let mut req = text_request("ignored");
    req.messages = vec![Message::native(
        Role::User,
        json!({ "model": "custom", "prompt": "p" }),
    )];
    let body = match build_request_body(&config(), &req) {
        Ok(body) => body,
        Err(e) => panic!("build should succeed: {e}"),
    };
    assert_eq!(body.get("model"), Some(&json!("custom")));
}

#[test]
fn empty_message_list_is_rejected() {
    let mut req = text_request("x");
    req.messages.clear();
    assert!(matches!(
        build_request_body(&config(), &req),
        Err(ProviderError::InvalidRequest(_))
    ));
}

#[test]
fn error_envelope_is_decoded() {
    let error = decode_error(404, r#"{"error":"model not found"}"#);
    match error {
        ProviderError::Api {
            status, message, ..
        } => {
            assert_eq!(status, 404);
            assert_eq!(message, "model not found");
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[test]
fn provider_reports_streaming_support_and_no_auth_requirement() {
    let provider = OllamaProvider::new(ProviderConfig {
        api_key: String::new(),
        endpoint: String::new(),
        model: "llama3.2".to_owned(),
        parameters: HashMap::new(),
        headers: HashMap::new(),
    });
    assert!(provider.supports_streaming());
    let info = provider.model_info();
    assert_eq!(info.provider, "ollama");
    assert_eq!(info.model, "llama3.2");
}
