//! Adapter for the Ollama completion family.
//!
//! Completion APIs take one flat prompt, so the system prompt,
//! examples, and query are all formatted inline into a single user
//! message; prior history is not replayed.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::prompt::{Example, PromptFormatter};
use crate::session::ConversationContext;
use crate::types::{Message, ModelRequest, Role};

use super::{AdapterError, InputAdapter};

/// Builds completion requests.
pub struct OllamaAdapter {
    formatter: Arc<dyn PromptFormatter>,
    system_prompt: String,
    examples: Vec<Example>,
    model: String,
    parameters: HashMap<String, Value>,
}

impl OllamaAdapter {
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

impl InputAdapter for OllamaAdapter {
    fn build_request(
        &self,
        query: &str,
        _context: &ConversationContext,
    ) -> Result<ModelRequest, AdapterError> {
        let prompt = self
            .formatter
            .format_complete(&self.system_prompt, &self.examples, query)?;

        Ok(ModelRequest {
            model: self.model.clone(),
            messages: vec![Message::text(Role::User, prompt)],
            parameters: self.parameters.clone(),
        })
    }

    fn family(&self) -> &'static str {
        "ollama"
    }
}
