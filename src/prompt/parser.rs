//! Segment-compiling template parser with a use-counted cache.
//!
//! Templates are compiled once into an alternating literal/placeholder
//! segment list and cached by exact text. Rendering walks the segments
//! into a pre-sized buffer; missing placeholder values render as the
//! empty string.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use super::validator::{scan_template, PlaceholderKind, TemplateValidator};
use super::TemplateError;

/// Default maximum number of cached templates.
const DEFAULT_CACHE_CAPACITY: usize = 128;

/// One compiled template segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, emitted verbatim (escape backslashes removed).
    Literal(String),
    /// A placeholder to substitute at render time.
    Placeholder {
        /// Placeholder name.
        name: String,
        /// Classification against the validator's configured sets.
        kind: PlaceholderKind,
        /// Byte offset of the opening brace in the source.
        position: usize,
        /// Byte length of the span including braces.
        length: usize,
    },
}

/// A compiled template.
#[derive(Debug)]
pub struct ParsedTemplate {
    /// Original template text.
    pub source: String,
    /// Ordered literal/placeholder segments.
    pub segments: Vec<Segment>,
    /// Placeholder name → byte offset of first occurrence.
    pub placeholders: HashMap<String, usize>,
    /// Whether the template passed validation.
    pub is_valid: bool,
    /// Validation errors, when `is_valid` is false.
    pub errors: Vec<String>,
    /// When this entry was compiled.
    pub created_at: DateTime<Utc>,
    uses: AtomicU64,
}

impl ParsedTemplate {
    /// How many times this compiled template has been served.
    pub fn use_count(&self) -> u64 {
        self.uses.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.uses.fetch_add(1, Ordering::Relaxed);
    }
}

/// Cache counters exposed by [`TemplateParser::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParserStats {
    /// Cache hits.
    pub hits: u64,
    /// Cache misses (compilations).
    pub misses: u64,
    /// Entries currently cached.
    pub size: usize,
    /// `hits / (hits + misses)`, 0 when no lookups happened.
    pub hit_ratio: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
}

/// Compiles, caches, and renders prompt templates.
pub struct TemplateParser {
    validator: TemplateValidator,
    cache: RwLock<HashMap<String, Arc<ParsedTemplate>>>,
    counters: Mutex<Counters>,
    capacity: usize,
}

impl Default for TemplateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateParser {
    /// Parser with the default validator and cache capacity.
    pub fn new() -> Self {
        Self::with_validator(TemplateValidator::new(), DEFAULT_CACHE_CAPACITY)
    }

    /// Parser with a custom validator and cache capacity.
    pub fn with_validator(validator: TemplateValidator, capacity: usize) -> Self {
        Self {
            validator,
            cache: RwLock::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            capacity: capacity.max(1),
        }
    }

    /// The validator used to classify placeholders.
    pub fn validator(&self) -> &TemplateValidator {
        &self.validator
    }

    /// Compile a template, serving repeated texts from the cache.
    ///
    /// Parsing does not fail: a template with validation errors is
    /// returned with `is_valid == false` and the errors recorded;
    /// rendering such a template is what fails.
    pub fn parse(&self, template: &str) -> Arc<ParsedTemplate> {
        if let Ok(cache) = self.cache.read() {
            if let Some(parsed) = cache.get(template) {
                parsed.touch();
                self.count(|c| c.hits = c.hits.saturating_add(1));
                return Arc::clone(parsed);
            }
        }

        let parsed = Arc::new(self.compile(template));
        self.count(|c| c.misses = c.misses.saturating_add(1));

        if let Ok(mut cache) = self.cache.write() {
            if !cache.contains_key(template) {
                if cache.len() >= self.capacity {
                    evict_least_used(&mut cache);
                }
                cache.insert(template.to_owned(), Arc::clone(&parsed));
            }
        }

        parsed.touch();
        parsed
    }

    /// Render a compiled template with the given placeholder values.
    ///
    /// Missing values substitute as the empty string.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::InvalidTemplate`] when the template
    /// failed validation at compile time.
    pub fn render(
        &self,
        parsed: &ParsedTemplate,
        values: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        if !parsed.is_valid {
            return Err(TemplateError::InvalidTemplate {
                reasons: parsed.errors.join("; "),
            });
        }

        let value_bytes: usize = values.values().map(String::len).sum();
        let mut out = String::with_capacity(parsed.source.len().saturating_add(value_bytes));
        for segment in &parsed.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, .. } => {
                    if let Some(value) = values.get(name) {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Parse and render in one call.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`TemplateParser::render`].
    pub fn parse_and_render(
        &self,
        template: &str,
        values: &HashMap<String, String>,
    ) -> Result<String, TemplateError> {
        let parsed = self.parse(template);
        self.render(&parsed, values)
    }

    /// Current cache counters.
    pub fn stats(&self) -> ParserStats {
        let (hits, misses) = match self.counters.lock() {
            Ok(c) => (c.hits, c.misses),
            Err(_) => (0, 0),
        };
        let size = self.cache.read().map(|c| c.len()).unwrap_or(0);
        let lookups = hits.saturating_add(misses);
        #[allow(clippy::cast_precision_loss)]
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            (hits as f64) / (lookups as f64)
        };
        ParserStats {
            hits,
            misses,
            size,
            hit_ratio,
        }
    }

    /// Drop all cached templates and reset the counters.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
        self.count(|c| *c = Counters::default());
    }

    fn count(&self, f: impl FnOnce(&mut Counters)) {
        if let Ok(mut counters) = self.counters.lock() {
            f(&mut counters);
        }
    }

    /// Compile a template into segments.
    fn compile(&self, template: &str) -> ParsedTemplate {
        let report = self.validator.validate(template);
        let scan = scan_template(template);

        let mut segments = Vec::new();
        let mut placeholders = HashMap::new();
        let mut cursor = 0usize;

        for span in &scan.spans {
            if self.validator.classify(&span.body) == PlaceholderKind::Unknown
                && !report.placeholders.iter().any(|p| p == &span.body)
            {
                // Malformed span; leave it inside the literal text.
                continue;
            }
            if span.position > cursor {
                segments.push(Segment::Literal(unescape(&template[cursor..span.position])));
            }
            placeholders
                .entry(span.body.clone())
                .or_insert(span.position);
            segments.push(Segment::Placeholder {
                name: span.body.clone(),
                kind: self.validator.classify(&span.body),
                position: span.position,
                length: span.length,
            });
            cursor = span.position.saturating_add(span.length);
        }
        if cursor < template.len() {
            segments.push(Segment::Literal(unescape(&template[cursor..])));
        }

        ParsedTemplate {
            source: template.to_owned(),
            segments,
            placeholders,
            is_valid: report.is_valid,
            errors: report
                .errors
                .iter()
                .map(|issue| issue.message.clone())
                .collect(),
            created_at: Utc::now(),
            uses: AtomicU64::new(0),
        }
    }
}

/// Remove the single cache entry with the smallest use counter.
fn evict_least_used(cache: &mut HashMap<String, Arc<ParsedTemplate>>) {
    let victim = cache
        .iter()
        .min_by_key(|(_, parsed)| parsed.use_count())
        .map(|(key, _)| key.clone());
    if let Some(key) = victim {
        cache.remove(&key);
    }
}

/// Strip escape backslashes before braces; other text is untouched.
fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.peek() {
                Some('{' | '}') => continue,
                _ => out.push(ch),
            }
        } else {
            out.push(ch);
        }
    }
    out
}
