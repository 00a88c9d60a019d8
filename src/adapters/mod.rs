//! Input adapters.
//!
//! An adapter converts the engine's query plus conversation context
//! into a [`ModelRequest`] shaped for one provider family: where the
//! system prompt goes, how history is replayed, and which parameters
//! are forwarded. Adapters never perform network I/O.

use serde_json::Value;

use crate::prompt::FormatError;
use crate::session::ConversationContext;
use crate::types::{Message, ModelRequest, Role};

pub mod anthropic;
pub mod ollama;
pub mod openai;

pub use anthropic::AnthropicAdapter;
pub use ollama::OllamaAdapter;
pub use openai::OpenAiAdapter;

/// How many prior turns are replayed into chat-style requests.
pub(crate) const MAX_HISTORY_TURNS: usize = 10;

/// Adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// Prompt composition failed.
    #[error("prompt formatting failed: {0}")]
    Format(#[from] FormatError),
}

/// Converts a query and its context into a provider request.
pub trait InputAdapter: Send + Sync {
    /// Build the provider-neutral request for this family.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError`] when the inputs violate the prompt
    /// limits.
    fn build_request(
        &self,
        query: &str,
        context: &ConversationContext,
    ) -> Result<ModelRequest, AdapterError>;

    /// The provider family this adapter targets.
    fn family(&self) -> &'static str;
}

/// Replay recent turns as alternating user/assistant messages.
pub(crate) fn history_messages(context: &ConversationContext) -> Vec<Message> {
    let skip = context.history.len().saturating_sub(MAX_HISTORY_TURNS);
    let mut messages = Vec::new();
    for entry in context.history.iter().skip(skip) {
        messages.push(Message::text(Role::User, entry.query.clone()));
        let response_text = match &entry.response {
            Value::String(text) => text.clone(),
            other => serde_json::to_string(other).unwrap_or_default(),
        };
        messages.push(Message::text(Role::Assistant, response_text));
    }
    messages
}
