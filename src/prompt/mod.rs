//! Prompt template pipeline.
//!
//! Three stages, validate-once render-many:
//! - [`validator::TemplateValidator`] — syntactic/semantic checks on
//!   template strings
//! - [`parser::TemplateParser`] — segment compilation with a
//!   use-counted cache and fast rendering
//! - [`format`] — per-family formatters composing system prompt,
//!   examples, and query into wire text, with a fallback layout when
//!   the configured template is absent or malformed

use serde::{Deserialize, Serialize};

pub mod format;
pub mod parser;
pub mod validator;

pub use format::{ChatFormatter, GenericFormatter, PromptFormatter, XmlFormatter};
pub use parser::{ParsedTemplate, TemplateParser};
pub use validator::{TemplateValidator, ValidationReport};

/// A few-shot example injected into the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Example natural-language input.
    pub input: String,
    /// Expected structured output.
    pub output: String,
}

/// Errors from template validation, parsing, and rendering.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TemplateError {
    /// Forbidden character (null byte or replacement character).
    #[error("template syntax error at byte {position}: {message}")]
    Syntax {
        /// Byte offset of the offending character.
        position: usize,
        /// What was found.
        message: String,
    },
    /// Unmatched `{` or `}`.
    #[error("unbalanced brace at byte {position} near {context:?}")]
    Unbalanced {
        /// Byte offset of the unmatched brace.
        position: usize,
        /// Surrounding characters for diagnostics.
        context: String,
    },
    /// Placeholder span that fails the identifier grammar.
    #[error("malformed placeholder {span:?}: {message}")]
    MalformedPlaceholder {
        /// The offending `{...}` span.
        span: String,
        /// Why it is malformed.
        message: String,
    },
    /// A configured required placeholder does not appear.
    #[error("missing required placeholder {{{name}}}")]
    MissingRequired {
        /// The absent placeholder name.
        name: String,
    },
    /// Render was called on a template that failed validation.
    #[error("cannot render invalid template: {reasons}")]
    InvalidTemplate {
        /// Joined validation errors.
        reasons: String,
    },
}

/// Errors from prompt formatting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FormatError {
    /// The query string is empty.
    #[error("query must not be empty")]
    EmptyQuery,
    /// The query exceeds the size limit.
    #[error("query exceeds {max} characters (got {actual})")]
    QueryTooLong {
        /// Maximum allowed characters.
        max: usize,
        /// Actual character count.
        actual: usize,
    },
    /// Too many few-shot examples.
    #[error("too many examples: {actual} exceeds limit of {max}")]
    TooManyExamples {
        /// Maximum allowed examples.
        max: usize,
        /// Actual example count.
        actual: usize,
    },
    /// One example field exceeds the size limit.
    #[error("example {index} {field} exceeds {max} characters")]
    ExampleFieldTooLong {
        /// Zero-based example index.
        index: usize,
        /// Which field (`"input"` or `"output"`).
        field: &'static str,
        /// Maximum allowed characters.
        max: usize,
    },
    /// The system prompt exceeds the size limit.
    #[error("system prompt exceeds {max} characters (got {actual})")]
    SystemPromptTooLong {
        /// Maximum allowed characters.
        max: usize,
        /// Actual character count.
        actual: usize,
    },
    /// Template machinery failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
}
