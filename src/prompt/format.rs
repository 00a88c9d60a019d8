//! Per-family prompt formatters.
//!
//! Each formatter validates its configured template once at
//! construction and renders it on every call; when the template is
//! absent or malformed the family's fallback layout is emitted
//! instead, so a bad template never takes requests down.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use super::parser::TemplateParser;
use super::{Example, FormatError};

/// Maximum query length in characters.
pub const MAX_QUERY_CHARS: usize = 10_000;

/// Maximum number of few-shot examples.
pub const MAX_EXAMPLES: usize = 100;

/// Maximum length of one example field in characters.
pub const MAX_EXAMPLE_FIELD_CHARS: usize = 10_000;

/// Maximum system prompt length in characters.
pub const MAX_SYSTEM_PROMPT_CHARS: usize = 50_000;

/// Renders a prompt body for one provider family.
pub trait PromptFormatter: Send + Sync {
    /// Compose system prompt, examples, and query into wire text.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when an input violates the size limits.
    fn format_complete(
        &self,
        system_prompt: &str,
        examples: &[Example],
        query: &str,
    ) -> Result<String, FormatError>;

    /// Render only the system block in the family layout.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the system prompt is oversized.
    fn format_system(&self, system_prompt: &str) -> Result<String, FormatError>;

    /// Render only the examples block.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] when the examples violate the limits.
    fn format_examples(&self, examples: &[Example]) -> Result<String, FormatError>;

    /// Whether the configured template passed validation.
    fn is_valid(&self) -> bool;

    /// The construction-time template error, if any.
    fn template_error(&self) -> Option<&str>;
}

/// Template state shared by the three family formatters.
struct FormatterCore {
    parser: Arc<TemplateParser>,
    template: String,
    template_valid: bool,
    template_error: Option<String>,
}

impl FormatterCore {
    fn new(family: &str, template: String, parser: Arc<TemplateParser>) -> Self {
        let (template_valid, template_error) = if template.trim().is_empty() {
            (true, None)
        } else {
            match parser.validator().quick_validate(&template) {
                Ok(()) => (true, None),
                Err(e) => {
                    warn!(family, error = %e, "prompt template invalid, using fallback layout");
                    (false, Some(e.to_string()))
                }
            }
        };
        Self {
            parser,
            template,
            template_valid,
            template_error,
        }
    }

    /// Whether rendering should use the fallback layout.
    fn use_fallback(&self) -> bool {
        !self.template_valid || self.template.trim().is_empty()
    }

    /// Substitute the template; the four optional placeholders render
    /// as the empty string by omission.
    fn render(&self, system_prompt: &str, examples_block: &str, query: &str) -> Option<String> {
        let mut values = HashMap::with_capacity(3);
        values.insert("system_prompt".to_owned(), system_prompt.to_owned());
        values.insert("examples".to_owned(), examples_block.to_owned());
        values.insert("query".to_owned(), query.to_owned());
        match self.parser.parse_and_render(&self.template, &values) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "template render failed, using fallback layout");
                None
            }
        }
    }
}

/// Enforce the shared input limits.
fn check_inputs(
    system_prompt: &str,
    examples: &[Example],
    query: &str,
) -> Result<(), FormatError> {
    if query.trim().is_empty() {
        return Err(FormatError::EmptyQuery);
    }
    let query_chars = query.chars().count();
    if query_chars > MAX_QUERY_CHARS {
        return Err(FormatError::QueryTooLong {
            max: MAX_QUERY_CHARS,
            actual: query_chars,
        });
    }
    check_system(system_prompt)?;
    check_examples(examples)
}

fn check_system(system_prompt: &str) -> Result<(), FormatError> {
    let chars = system_prompt.chars().count();
    if chars > MAX_SYSTEM_PROMPT_CHARS {
        return Err(FormatError::SystemPromptTooLong {
            max: MAX_SYSTEM_PROMPT_CHARS,
            actual: chars,
        });
    }
    Ok(())
}

fn check_examples(examples: &[Example]) -> Result<(), FormatError> {
    if examples.len() > MAX_EXAMPLES {
        return Err(FormatError::TooManyExamples {
            max: MAX_EXAMPLES,
            actual: examples.len(),
        });
    }
    for (index, example) in examples.iter().enumerate() {
        if example.input.chars().count() > MAX_EXAMPLE_FIELD_CHARS {
            return Err(FormatError::ExampleFieldTooLong {
                index,
                field: "input",
                max: MAX_EXAMPLE_FIELD_CHARS,
            });
        }
        if example.output.chars().count() > MAX_EXAMPLE_FIELD_CHARS {
            return Err(FormatError::ExampleFieldTooLong {
                index,
                field: "output",
                max: MAX_EXAMPLE_FIELD_CHARS,
            });
        }
    }
    Ok(())
}

/// `Input:`/`Output:` lines per example, blank line between examples.
fn render_examples(examples: &[Example]) -> String {
    let blocks: Vec<String> = examples
        .iter()
        .map(|e| format!("Input: {}\nOutput: {}\n", e.input, e.output))
        .collect();
    blocks.join("\n")
}

// ---------------------------------------------------------------------------
// XML-style formatter
// ---------------------------------------------------------------------------

/// Formatter for XML-tagged chat models (Anthropic family).
pub struct XmlFormatter {
    core: FormatterCore,
}

impl XmlFormatter {
    /// Build the formatter, validating the template once.
    pub fn new(template: impl Into<String>, parser: Arc<TemplateParser>) -> Self {
        Self {
            core: FormatterCore::new("xml", template.into(), parser),
        }
    }

    fn fallback(system_prompt: &str, examples: &[Example], query: &str) -> String {
        let mut out = format!("<instructions>\n{system_prompt}\n</instructions>\n\n");
        if !examples.is_empty() {
            out.push_str(&format!(
                "<examples>\n{}</examples>\n\n",
                render_examples(examples)
            ));
        }
        out.push_str(&format!("<query>\n{query}\n</query>\n\nJSON Response:"));
        out
    }
}

impl PromptFormatter for XmlFormatter {
    fn format_complete(
        &self,
        system_prompt: &str,
        examples: &[Example],
        query: &str,
    ) -> Result<String, FormatError> {
        check_inputs(system_prompt, examples, query)?;
        if !self.core.use_fallback() {
            if let Some(text) = self
                .core
                .render(system_prompt, &render_examples(examples), query)
            {
                return Ok(text);
            }
        }
        Ok(Self::fallback(system_prompt, examples, query))
    }

    fn format_system(&self, system_prompt: &str) -> Result<String, FormatError> {
        check_system(system_prompt)?;
        Ok(format!("<instructions>\n{system_prompt}\n</instructions>"))
    }

    fn format_examples(&self, examples: &[Example]) -> Result<String, FormatError> {
        check_examples(examples)?;
        Ok(render_examples(examples))
    }

    fn is_valid(&self) -> bool {
        self.core.template_valid
    }

    fn template_error(&self) -> Option<&str> {
        self.core.template_error.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Chat-style formatter
// ---------------------------------------------------------------------------

/// Formatter for plain chat models (OpenAI family).
pub struct ChatFormatter {
    core: FormatterCore,
}

impl ChatFormatter {
    /// Build the formatter, validating the template once.
    pub fn new(template: impl Into<String>, parser: Arc<TemplateParser>) -> Self {
        Self {
            core: FormatterCore::new("chat", template.into(), parser),
        }
    }

    fn fallback(system_prompt: &str, examples: &[Example], query: &str) -> String {
        let mut out = String::from(system_prompt);
        if !examples.is_empty() {
            out.push_str(&format!("\n\nExamples:\n{}", render_examples(examples)));
        }
        out.push_str(&format!("\n\nConvert this query to JSON: {query}"));
        out
    }
}

impl PromptFormatter for ChatFormatter {
    fn format_complete(
        &self,
        system_prompt: &str,
        examples: &[Example],
        query: &str,
    ) -> Result<String, FormatError> {
        check_inputs(system_prompt, examples, query)?;
        if !self.core.use_fallback() {
            if let Some(text) = self
                .core
                .render(system_prompt, &render_examples(examples), query)
            {
                return Ok(text);
            }
        }
        Ok(Self::fallback(system_prompt, examples, query))
    }

    fn format_system(&self, system_prompt: &str) -> Result<String, FormatError> {
        check_system(system_prompt)?;
        Ok(system_prompt.to_owned())
    }

    fn format_examples(&self, examples: &[Example]) -> Result<String, FormatError> {
        check_examples(examples)?;
        Ok(render_examples(examples))
    }

    fn is_valid(&self) -> bool {
        self.core.template_valid
    }

    fn template_error(&self) -> Option<&str> {
        self.core.template_error.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Generic formatter
// ---------------------------------------------------------------------------

/// Formatter for providers without a family-specific layout.
pub struct GenericFormatter {
    core: FormatterCore,
}

impl GenericFormatter {
    /// Build the formatter, validating the template once.
    pub fn new(template: impl Into<String>, parser: Arc<TemplateParser>) -> Self {
        Self {
            core: FormatterCore::new("generic", template.into(), parser),
        }
    }

    fn fallback(system_prompt: &str, examples: &[Example], query: &str) -> String {
        let mut out = String::new();
        if !system_prompt.is_empty() {
            out.push_str(&format!("{system_prompt}\n\n"));
        }
        if !examples.is_empty() {
            out.push_str(&format!("Examples:\n{}\n\n", render_examples(examples)));
        }
        out.push_str(&format!("Query: {query}\n\nJSON Response:"));
        out
    }
}

impl PromptFormatter for GenericFormatter {
    fn format_complete(
        &self,
        system_prompt: &str,
        examples: &[Example],
        query: &str,
    ) -> Result<String, FormatError> {
        check_inputs(system_prompt, examples, query)?;
        if !self.core.use_fallback() {
            if let Some(text) = self
                .core
                .render(system_prompt, &render_examples(examples), query)
            {
                return Ok(text);
            }
        }
        Ok(Self::fallback(system_prompt, examples, query))
    }

    fn format_system(&self, system_prompt: &str) -> Result<String, FormatError> {
        check_system(system_prompt)?;
        Ok(system_prompt.to_owned())
    }

    fn format_examples(&self, examples: &[Example]) -> Result<String, FormatError> {
        check_examples(examples)?;
        Ok(render_examples(examples))
    }

    fn is_valid(&self) -> bool {
        self.core.template_valid
    }

    fn template_error(&self) -> Option<&str> {
        self.core.template_error.as_deref()
    }
}
