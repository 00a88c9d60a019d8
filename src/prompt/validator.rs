//! Template validation.
//!
//! [`TemplateValidator::validate`] runs the full check sequence and
//! returns a structured report; [`TemplateValidator::quick_validate`]
//! runs the same error checks without the warning analysis and returns
//! the first failure. A template passes `quick_validate` exactly when
//! the full report says `is_valid`.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::TemplateError;

/// Placeholder names that must appear in a non-empty template.
pub const DEFAULT_REQUIRED_PLACEHOLDERS: &[&str] = &["system_prompt", "examples", "query"];

/// Placeholder names that render as the empty string when unset.
pub const DEFAULT_OPTIONAL_PLACEHOLDERS: &[&str] =
    &["timestamp", "session_id", "model_name", "provider"];

/// Template length above which a warning is emitted.
const LONG_TEMPLATE_CHARS: usize = 10_000;

/// Distinct placeholder count above which a warning is emitted.
const MANY_PLACEHOLDERS: usize = 20;

/// Characters of context reported around an unbalanced brace.
const CONTEXT_WINDOW: usize = 5;

/// How a placeholder name relates to the configured classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderKind {
    /// Must appear in every non-empty template.
    Required,
    /// Substituted with the empty string when no value is supplied.
    Optional,
    /// Not in either configured set.
    Unknown,
}

/// A single finding from validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// What was found.
    pub message: String,
    /// Byte offset in the template, when position is meaningful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<usize>,
    /// Surrounding characters for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// How to fix it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// The outcome of a full validation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Whether the template is usable.
    pub is_valid: bool,
    /// Fatal findings.
    pub errors: Vec<ValidationIssue>,
    /// Non-fatal findings.
    pub warnings: Vec<ValidationIssue>,
    /// Well-formed placeholder names, in order of first appearance.
    pub placeholders: Vec<String>,
}

/// A `{...}` span discovered during the scan.
#[derive(Debug, Clone)]
pub(crate) struct PlaceholderSpan {
    /// Text between the braces.
    pub body: String,
    /// Byte offset of the opening brace.
    pub position: usize,
    /// Byte length including both braces.
    pub length: usize,
}

/// Raw scan output shared by validation and parsing.
#[derive(Debug, Default)]
pub(crate) struct ScanOutcome {
    pub spans: Vec<PlaceholderSpan>,
    pub unbalanced: Vec<(usize, char)>,
}

/// Validates prompt templates against the placeholder grammar.
#[derive(Debug, Clone)]
pub struct TemplateValidator {
    required: Vec<String>,
    optional: Vec<String>,
    identifier: Regex,
}

impl Default for TemplateValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateValidator {
    /// Validator with the default placeholder classification.
    pub fn new() -> Self {
        Self::with_placeholders(
            DEFAULT_REQUIRED_PLACEHOLDERS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            DEFAULT_OPTIONAL_PLACEHOLDERS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        )
    }

    /// Validator with a custom required/optional classification.
    pub fn with_placeholders(required: Vec<String>, optional: Vec<String>) -> Self {
        // The pattern is a constant; compilation cannot fail.
        let identifier =
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("builtin identifier pattern");
        Self {
            required,
            optional,
            identifier,
        }
    }

    /// The configured required placeholder names.
    pub fn required(&self) -> &[String] {
        &self.required
    }

    /// The configured optional placeholder names.
    pub fn optional(&self) -> &[String] {
        &self.optional
    }

    /// Classify a placeholder name.
    pub fn classify(&self, name: &str) -> PlaceholderKind {
        if self.required.iter().any(|r| r == name) {
            PlaceholderKind::Required
        } else if self.optional.iter().any(|o| o == name) {
            PlaceholderKind::Optional
        } else {
            PlaceholderKind::Unknown
        }
    }

    /// Run the full check sequence.
    ///
    /// Empty and whitespace-only templates are valid; they signal that
    /// the fallback layout should be used.
    pub fn validate(&self, template: &str) -> ValidationReport {
        if template.trim().is_empty() {
            return ValidationReport {
                is_valid: true,
                errors: Vec::new(),
                warnings: Vec::new(),
                placeholders: Vec::new(),
            };
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for (position, message) in forbidden_characters(template) {
            errors.push(ValidationIssue {
                message,
                position: Some(position),
                context: None,
                suggestion: Some("remove the control character".to_owned()),
            });
        }

        let scan = scan_template(template);

        for (position, brace) in &scan.unbalanced {
            errors.push(ValidationIssue {
                message: format!("unmatched '{brace}'"),
                position: Some(*position),
                context: Some(context_window(template, *position)),
                suggestion: Some(format!("balance the '{brace}' or escape it with a backslash")),
            });
        }

        let mut placeholders: Vec<String> = Vec::new();
        for span in &scan.spans {
            match self.span_problem(span) {
                None => {
                    if !placeholders.iter().any(|p| p == &span.body) {
                        placeholders.push(span.body.clone());
                    }
                }
                Some((message, suggestion)) => errors.push(ValidationIssue {
                    message,
                    position: Some(span.position),
                    context: Some(format!("{{{}}}", span.body)),
                    suggestion: Some(suggestion),
                }),
            }
        }

        for name in &self.required {
            if !placeholders.iter().any(|p| p == name) {
                errors.push(ValidationIssue {
                    message: format!("required placeholder {{{name}}} is missing"),
                    position: None,
                    context: None,
                    suggestion: Some(format!("add {{{name}}} to your template")),
                });
            }
        }

        if template.chars().count() > LONG_TEMPLATE_CHARS {
            warnings.push(warning(format!(
                "template is longer than {LONG_TEMPLATE_CHARS} characters"
            )));
        }
        if placeholders.len() > MANY_PLACEHOLDERS {
            warnings.push(warning(format!(
                "template uses {} distinct placeholders (more than {MANY_PLACEHOLDERS})",
                placeholders.len()
            )));
        }
        if template.contains("{{") || template.contains("}}") {
            warnings.push(warning(
                "doubled braces found; they do not escape placeholders here".to_owned(),
            ));
        }
        for name in &placeholders {
            if let Some((head, tail)) = name.split_once('_') {
                if !head.is_empty() && head == tail {
                    warnings.push(warning(format!(
                        "placeholder {{{name}}} looks self-referential"
                    )));
                }
            }
        }

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            placeholders,
        }
    }

    /// Fast-path validation: the error checks without warning analysis.
    ///
    /// Returns the first failure. Formatters call this once at
    /// construction.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError`] describing the first fatal finding.
    pub fn quick_validate(&self, template: &str) -> Result<(), TemplateError> {
        if template.trim().is_empty() {
            return Ok(());
        }

        if let Some((position, message)) = forbidden_characters(template).into_iter().next() {
            return Err(TemplateError::Syntax { position, message });
        }

        let scan = scan_template(template);
        if let Some((position, _)) = scan.unbalanced.first() {
            return Err(TemplateError::Unbalanced {
                position: *position,
                context: context_window(template, *position),
            });
        }

        let mut seen: Vec<&str> = Vec::new();
        for span in &scan.spans {
            if let Some((message, _)) = self.span_problem(span) {
                return Err(TemplateError::MalformedPlaceholder {
                    span: format!("{{{}}}", span.body),
                    message,
                });
            }
            seen.push(span.body.as_str());
        }

        for name in &self.required {
            if !seen.iter().any(|p| p == name) {
                return Err(TemplateError::MissingRequired { name: name.clone() });
            }
        }

        Ok(())
    }

    /// Why a span is malformed, with a remediation suggestion.
    fn span_problem(&self, span: &PlaceholderSpan) -> Option<(String, String)> {
        if span.body.is_empty() {
            return Some((
                "empty placeholder".to_owned(),
                "name the placeholder or remove the braces".to_owned(),
            ));
        }
        if span.body.chars().any(char::is_whitespace) {
            return Some((
                format!("placeholder {{{}}} contains whitespace", span.body),
                "remove the spaces from the placeholder name".to_owned(),
            ));
        }
        if !self.identifier.is_match(&span.body) {
            return Some((
                format!("placeholder {{{}}} is not a valid identifier", span.body),
                "use letters, digits and underscores, starting with a letter or underscore"
                    .to_owned(),
            ));
        }
        None
    }
}

fn warning(message: String) -> ValidationIssue {
    ValidationIssue {
        message,
        position: None,
        context: None,
        suggestion: None,
    }
}

/// Null bytes and replacement characters with their byte positions.
fn forbidden_characters(template: &str) -> Vec<(usize, String)> {
    template
        .char_indices()
        .filter_map(|(i, ch)| match ch {
            '\0' => Some((i, "null byte".to_owned())),
            '\u{FFFD}' => Some((i, "replacement character".to_owned())),
            _ => None,
        })
        .collect()
}

/// Walk the template, collecting `{...}` spans and unbalanced braces.
///
/// A single backslash escapes the following brace, and doubled braces
/// (`{{`, `}}`) are literal text; both render verbatim instead of
/// opening a placeholder.
pub(crate) fn scan_template(template: &str) -> ScanOutcome {
    let chars: Vec<(usize, char)> = template.char_indices().collect();
    let mut outcome = ScanOutcome::default();
    let mut i = 0;

    while i < chars.len() {
        let (pos, ch) = chars[i];
        let next = chars.get(i.saturating_add(1)).map(|(_, c)| *c);
        match ch {
            '\\' => {
                // Skip the escaped character, if any.
                i = i.saturating_add(2);
            }
            '{' if next == Some('{') => {
                i = i.saturating_add(2);
            }
            '{' => {
                let mut j = i.saturating_add(1);
                let mut close: Option<usize> = None;
                while j < chars.len() {
                    let (_, cj) = chars[j];
                    if cj == '\\' {
                        j = j.saturating_add(2);
                        continue;
                    }
                    if cj == '}' || cj == '{' {
                        if cj == '}' {
                            close = Some(j);
                        }
                        break;
                    }
                    j = j.saturating_add(1);
                }
                match close {
                    Some(j) => {
                        let (close_pos, _) = chars[j];
                        let body_start = pos.saturating_add(ch.len_utf8());
                        outcome.spans.push(PlaceholderSpan {
                            body: template[body_start..close_pos].to_owned(),
                            position: pos,
                            length: close_pos.saturating_add(1).saturating_sub(pos),
                        });
                        i = j.saturating_add(1);
                    }
                    None => {
                        outcome.unbalanced.push((pos, '{'));
                        i = i.saturating_add(1);
                    }
                }
            }
            '}' if next == Some('}') => {
                i = i.saturating_add(2);
            }
            '}' => {
                outcome.unbalanced.push((pos, '}'));
                i = i.saturating_add(1);
            }
            _ => {
                i = i.saturating_add(1);
            }
        }
    }

    outcome
}

/// Up to [`CONTEXT_WINDOW`] characters on each side of a byte offset.
fn context_window(template: &str, position: usize) -> String {
    let chars: Vec<(usize, char)> = template.char_indices().collect();
    let center = chars
        .iter()
        .position(|(i, _)| *i >= position)
        .unwrap_or(chars.len());
    let start = center.saturating_sub(CONTEXT_WINDOW);
    let end = center.saturating_add(CONTEXT_WINDOW.saturating_add(1)).min(chars.len());
    chars[start..end].iter().map(|(_, c)| *c).collect()
}
