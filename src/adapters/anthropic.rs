//! Adapter for the Anthropic messages family.
//!
//! The system prompt travels in the `system` request parameter rather
//! than the message list; the formatted examples and query become the
//! final user message.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::prompt::{Example, PromptFormatter};
use crate::session::ConversationContext;
use crate::types::{Message, ModelRequest, Role};

use super::{history_messages, AdapterError, InputAdapter};

/// Builds messages API requests.
pub struct AnthropicAdapter {
    formatter: Arc<dyn PromptFormatter>,
    system_prompt: String,
    examples: Vec<Example>,
    model: String,
    parameters: HashMap<String, Value>,
}

impl AnthropicAdapter {
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
        }
    }
}

impl InputAdapter for AnthropicAdapter {
    fn build_request(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<ModelRequest, AdapterError> {
        let body = self.formatter.format_complete("", &self.examples, query)?;

        let mut messages = history_messages(context);
        messages.push(Message::text(Role::User, body));

        let mut parameters = self.parameters.clone();
        if !self.system_prompt.is_empty() {
            parameters.insert("system".to_owned(), json!(self.system_prompt));
        }

        Ok(ModelRequest {
            model: self.model.clone(),
            messages,
            parameters,
        })
    }

    fn family(&self) -> &'static str {
        "anthropic"
    }
}
