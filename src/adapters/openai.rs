//! Adapter for the OpenAI chat family, also used for compatible
//! endpoints.
//!
//! The system prompt becomes the first message; the formatted examples
//! and query become the final user message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::prompt::{Example, PromptFormatter};
use crate::session::ConversationContext;
use crate::types::{Message, ModelRequest, Role};

use super::{history_messages, AdapterError, InputAdapter};

/// Builds chat completions requests.
pub struct OpenAiAdapter {
    formatter: Arc<dyn PromptFormatter>,
    system_prompt: String,
    examples: Vec<Example>,
    model: String,
    parameters: HashMap<String, Value>,
    family: &'static str,
}

impl OpenAiAdapter {
    /// Adapter with an injected formatter and prompt configuration.
    pub fn new(
        formatter: Arc<dyn PromptFormatter>,
        system_prompt: String,
        examples: Vec<Example>,
        model: String,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            formatter,
            system_prompt,
            examples,
            model,
            parameters,
            family: "openai",
        }
    }

    /// Same adapter shape for an OpenAI-compatible endpoint.
    pub fn for_compatible(
        formatter: Arc<dyn PromptFormatter>,
        system_prompt: String,
        examples: Vec<Example>,
        model: String,
        parameters: HashMap<String, Value>,
    ) -> Self {
        Self {
            formatter,
            system_prompt,
            examples,
            model,
            parameters,
            family: "openai_compatible",
        }
    }
}

impl InputAdapter for OpenAiAdapter {
    fn build_request(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<ModelRequest, AdapterError> {
        let body = self.formatter.format_complete("", &self.examples, query)?;

        let mut messages = Vec::new();
        if !self.system_prompt.is_empty() {
            messages.push(Message::text(Role::System, self.system_prompt.clone()));
        }
        messages.extend(history_messages(context));
        messages.push(Message::text(Role::User, body));

        Ok(ModelRequest {
            model: self.model.clone(),
            messages,
            parameters: self.parameters.clone(),
        })
    }

    fn family(&self) -> &'static str {
        self.family
    }
}
