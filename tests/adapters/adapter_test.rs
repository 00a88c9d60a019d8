//! Integration tests for the per-family input adapters.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use nlquery::adapters::{AnthropicAdapter, InputAdapter, OllamaAdapter, OpenAiAdapter};
use nlquery::prompt::{
    ChatFormatter, Example, GenericFormatter, PromptFormatter, TemplateParser, XmlFormatter,
};
use nlquery::session::ConversationContext;
use nlquery::types::{MessageContent, Role};

fn parser() -> Arc<TemplateParser> {
    Arc::new(TemplateParser::new())
}

fn examples() -> Vec<Example> {
    vec![Example {
        input: "who deleted the pod?".to_owned(),
        output: r#"{"verb":"delete"}"#.to_owned(),
    }]
}

fn context_with_history() -> ConversationContext {
    let mut ctx = ConversationContext::new("sess-1", "user-1");
    ctx.add_history_entry("earlier question", json!({"verb": "list"}));
    ctx
}

#[test]
fn anthropic_adapter_puts_the_system_prompt_in_parameters() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(XmlFormatter::new("", parser()));
    let adapter = AnthropicAdapter::new(
        formatter,
        "You convert audit queries.".to_owned(),
        examples(),
        "claude-sonnet-4-5-20250929".to_owned(),
        HashMap::from([("max_tokens".to_owned(), json!(1024))]),
    );

    let request = match adapter.build_request("who deleted the CRD?", &context_with_history()) {
        Ok(request) => request,
        Err(e) => panic!("adapter should succeed: {e}"),
    };

    assert_eq!(
        request.parameters.get("system"),
        Some(&json!("You convert audit queries."))
    );
    assert_eq!(request.parameters.get("max_tokens"), Some(&json!(1024)));
    assert_eq!(request.model, "claude-sonnet-4-5-20250929");

    // History replays first, then the formatted query.
    assert_eq!(request.messages.len(), 3);
    assert_eq!(request.messages[0].role, Role::User);
    assert_eq!(request.messages[1].role, Role::Assistant);
    let last = &request.messages[2];
    match &last.content {
        MessageContent::Text(text) => {
            assert!(text.contains("<query>\nwho deleted the CRD?\n</query>"));
            assert!(text.contains("Input: who deleted the pod?"));
        }
        MessageContent::Native(v) => panic!("expected text content, got {v}"),
    }
}

#[test]
fn openai_adapter_leads_with_a_system_message() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(ChatFormatter::new("", parser()));
    let adapter = OpenAiAdapter::new(
        formatter,
        "You convert audit queries.".to_owned(),
        examples(),
        "gpt-4o-mini".to_owned(),
        HashMap::new(),
    );

    let request = match adapter.build_request("who scaled the deployment?", &context_with_history())
    {
        Ok(request) => request,
        Err(e) => panic!("adapter should succeed: {e}"),
    };

    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(
        request.messages[0].content.as_text(),
        Some("You convert audit queries.")
    );
    // system + 2 history + query
    assert_eq!(request.messages.len(), 4);
    match request.messages[3].content.as_text() {
        Some(text) => {
            assert!(text.contains("Convert this query to JSON: who scaled the deployment?"));
        }
        None => panic!("expected text content"),
    }
    assert!(request.parameters.get("system").is_none());
}

#[test]
fn openai_adapter_omits_an_empty_system_message() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(ChatFormatter::new("", parser()));
    let adapter = OpenAiAdapter::new(
        formatter,
        String::new(),
        Vec::new(),
        "gpt-4o-mini".to_owned(),
        HashMap::new(),
    );

    let ctx = ConversationContext::new("sess-1", "user-1");
    let request = match adapter.build_request("q", &ctx) {
        Ok(request) => request,
        Err(e) => panic!("adapter should succeed: {e}"),
    };
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].role, Role::User);
}

#[test]
fn ollama_adapter_inlines_everything_into_one_prompt() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(GenericFormatter::new("", parser()));
    let adapter = OllamaAdapter::new(
        formatter,
        "You convert audit queries.".to_owned(),
        examples(),
        "llama3.2".to_owned(),
        HashMap::from([("max_tokens".to_owned(), json!(256))]),
    );

    let request = match adapter.build_request("who restarted the api?", &context_with_history()) {
        Ok(request) => request,
        Err(e) => panic!("adapter should succeed: {e}"),
    };

    assert_eq!(request.messages.len(), 1);
    match request.messages[0].content.as_text() {
        Some(text) => {
            assert!(text.starts_with("You convert audit queries."));
            assert!(text.contains("Query: who restarted the api?"));
            assert!(text.ends_with("JSON Response:"));
        }
        None => panic!("expected text content"),
    }
}

#[test]
fn adapters_surface_prompt_limit_violations() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(ChatFormatter::new("", parser()));
    let adapter = OpenAiAdapter::new(
        formatter,
        String::new(),
        Vec::new(),
        "gpt-4o-mini".to_owned(),
        HashMap::new(),
    );
    let ctx = ConversationContext::new("sess-1", "user-1");
    assert!(adapter.build_request("", &ctx).is_err());
}

#[test]
fn history_replay_is_bounded() {
    let formatter: Arc<dyn PromptFormatter> = Arc::new(ChatFormatter::new("", parser()));
    let adapter = OpenAiAdapter::new(
        formatter,
        String::new(),
        Vec::new(),
        "gpt-4o-mini".to_owned(),
        HashMap::new(),
    );

    let mut ctx = ConversationContext::new("sess-1", "user-1");
    for i in 0..30 {
        ctx.add_history_entry(format!("q{i}"), json!("r"));
    }
    let request = match adapter.build_request("latest", &ctx) {
        Ok(request) => request,
        Err(e) => panic!("adapter should succeed: {e}"),
    };
    // 10 replayed turns (20 messages) + the new query.
    assert_eq!(request.messages.len(), 21);
    assert_eq!(
        request.messages[0].content.as_text(),
        Some("q20"),
        "oldest replayed turn should be q20"
    );
}

#[test]
fn families_are_reported() {
    let p = parser();
    let xml: Arc<dyn PromptFormatter> = Arc::new(XmlFormatter::new("", Arc::clone(&p)));
    let chat: Arc<dyn PromptFormatter> = Arc::new(ChatFormatter::new("", Arc::clone(&p)));
    let generic: Arc<dyn PromptFormatter> = Arc::new(GenericFormatter::new("", p));

    let a = AnthropicAdapter::new(xml, String::new(), Vec::new(), String::new(), HashMap::new());
    let o = OpenAiAdapter::for_compatible(
        chat,
        String::new(),
        Vec::new(),
        String::new(),
        HashMap::new(),
    );
    let l = OllamaAdapter::new(
        generic,
        String::new(),
        Vec::new(),
        String::new(),
        HashMap::new(),
    );
    assert_eq!(a.family(), "anthropic");
    assert_eq!(o.family(), "openai_compatible");
    assert_eq!(l.family(), "ollama");
}
