//! Source Extractor - Locate the Submitted Entry Point
//!
//! **Core Responsibility:**
//! Cut the declaration of one named function out of a loosely structured
//! JavaScript submission, so that only that declaration is installed in a
//! sandbox.
//!
//! **Recognized Declarations:**
//! - `var|let|const name = [async] function [inner](...) { ... }`
//! - `[async] function name(...) { ... }`
//! - `var|let|const name = [async] (...) => { ... }` (block or expression body)
//!
//! **Scanning Rules:**
//! - Candidate headers are found with a regex, then bodies are delimited with
//!   a brace-depth scanner
//! - String, template, regex literals and comments never contribute braces
//! - Headers starting inside a comment or literal are ignored
//!
//! Extraction failures are compile-time errors: they reject the whole
//! submission before any sandbox is started.

use arena_common::protocol::RESERVED_PREFIX;
use regex::Regex;
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    #[error("Function name '{0}' is not a valid identifier.")]
    InvalidName(String),

    #[error("Function name '{0}' uses the reserved prefix '__arena_'.")]
    ReservedName(String),

    #[error("Function '{0}' not found in your code.")]
    NotFound(String),

    #[error("Function '{name}' is defined {count} times in your code; keep a single definition.")]
    Ambiguous { name: String, count: usize },

    #[error("Function '{0}' has an unterminated body.")]
    Unterminated(String),

    #[error("Source code exceeds maximum size of {max} bytes ({actual} bytes submitted).")]
    SourceTooLarge { max: usize, actual: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationForm {
    /// `var|let|const name = function (...) { ... }`
    Assignment,
    /// `function name(...) { ... }`
    Declaration,
    /// `var|let|const name = (...) => ...`
    Arrow,
}

/// The declaration text of the requested function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    pub name: String,
    pub form: DeclarationForm,
    pub source: String,
}

impl ExtractedFunction {
    /// Script that defines the function and publishes it on the global object
    ///
    /// Lexical declarations (`let`/`const`) are not properties of the global
    /// object, so the entry point is assigned to `globalThis` explicitly.
    pub fn install_script(&self) -> String {
        format!(
            "{};\nglobalThis.{name} = {name};\n",
            self.source,
            name = self.name
        )
    }

    /// Call expression passing the given bound names positionally
    pub fn call_expression(&self, argument_names: &[String]) -> String {
        format!("{}({})", self.name, argument_names.join(", "))
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    max_source_bytes: usize,
}

impl Default for Extractor {
    fn default() -> Self {
        Self {
            max_source_bytes: 1024 * 1024,
        }
    }
}

impl Extractor {
    pub fn new(max_source_bytes: usize) -> Self {
        Self { max_source_bytes }
    }

    /// Extract the single declaration of `name` from `source`
    pub fn extract(&self, source: &str, name: &str) -> Result<ExtractedFunction, ExtractionError> {
        if source.len() > self.max_source_bytes {
            return Err(ExtractionError::SourceTooLarge {
                max: self.max_source_bytes,
                actual: source.len(),
            });
        }
        if !is_identifier(name) {
            return Err(ExtractionError::InvalidName(name.to_string()));
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(ExtractionError::ReservedName(name.to_string()));
        }

        let trivia = trivia_spans(source);
        let scanner = Scanner {
            bytes: source.as_bytes(),
            trivia: &trivia,
        };

        let mut headers = find_headers(source, name)
            .into_iter()
            .filter(|h| !scanner.in_trivia(h.start))
            .collect::<Vec<_>>();
        headers.sort_by_key(|h| h.start);

        let mut found: Vec<(DeclarationForm, Range<usize>)> = Vec::new();
        let mut unterminated = false;

        for header in headers {
            // A named function expression re-matches inside its own assignment
            if found.iter().any(|(_, span)| span.contains(&header.start)) {
                continue;
            }
            match scanner.declaration_end(&header) {
                Body::Complete(end) => found.push((header.form, header.start..end)),
                Body::Unterminated => unterminated = true,
                Body::NotAFunction => {}
            }
        }

        match found.len() {
            0 if unterminated => Err(ExtractionError::Unterminated(name.to_string())),
            0 => Err(ExtractionError::NotFound(name.to_string())),
            1 => {
                let (form, span) = found.remove(0);
                Ok(ExtractedFunction {
                    name: name.to_string(),
                    form,
                    source: source[span].trim_end().to_string(),
                })
            }
            count => Err(ExtractionError::Ambiguous {
                name: name.to_string(),
                count,
            }),
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderEnd {
    /// Match ends just past the `(` opening the parameter list
    ParameterList,
    /// Match ends just past `=>` of a single-parameter arrow
    Arrow,
}

#[derive(Debug, Clone)]
struct Header {
    start: usize,
    end: usize,
    form: DeclarationForm,
    kind: HeaderEnd,
}

fn find_headers(source: &str, name: &str) -> Vec<Header> {
    let name = regex::escape(name);
    let patterns = [
        (
            DeclarationForm::Assignment,
            format!(r"\b(?:var|let|const)\s+{name}\s*=\s*(?:async\s+)?function\b[^(]*\("),
        ),
        (
            DeclarationForm::Declaration,
            format!(r"\b(?:async\s+)?function(?:\s*\*\s*|\s+){name}\s*\("),
        ),
        (
            DeclarationForm::Arrow,
            format!(r"\b(?:var|let|const)\s+{name}\s*=\s*(?:async\s*)?(?:\(|[A-Za-z_$][\w$]*\s*=>)"),
        ),
    ];

    let mut headers = Vec::new();
    for (form, pattern) in patterns {
        // Escaped identifiers always produce a valid pattern
        let Ok(regex) = Regex::new(&pattern) else {
            continue;
        };
        for m in regex.find_iter(source) {
            let kind = if m.as_str().ends_with('(') {
                HeaderEnd::ParameterList
            } else {
                HeaderEnd::Arrow
            };
            headers.push(Header {
                start: m.start(),
                end: m.end(),
                form,
                kind,
            });
        }
    }
    headers
}

enum Body {
    /// Exclusive end offset of the declaration
    Complete(usize),
    Unterminated,
    /// The header matched something other than a function, e.g. `const x = (1 + 2)`
    NotAFunction,
}

struct Scanner<'a> {
    bytes: &'a [u8],
    trivia: &'a [Range<usize>],
}

impl<'a> Scanner<'a> {
    fn in_trivia(&self, pos: usize) -> bool {
        let idx = self.trivia.partition_point(|span| span.end <= pos);
        self.trivia.get(idx).is_some_and(|span| span.start <= pos)
    }

    /// First position at or after `pos` holding code that is not whitespace
    fn next_code(&self, mut pos: usize) -> Option<usize> {
        let mut idx = self.trivia.partition_point(|span| span.end <= pos);
        while pos < self.bytes.len() {
            if let Some(span) = self.trivia.get(idx) {
                if pos >= span.start {
                    pos = pos.max(span.end);
                    idx += 1;
                    continue;
                }
            }
            if !self.bytes[pos].is_ascii_whitespace() {
                return Some(pos);
            }
            pos += 1;
        }
        None
    }

    /// Position of the delimiter closing the one opened at `open_pos`
    fn matching(&self, open_pos: usize, open: u8, close: u8) -> Option<usize> {
        let mut depth = 0usize;
        let mut pos = open_pos;
        let mut idx = self.trivia.partition_point(|span| span.end <= pos);
        while pos < self.bytes.len() {
            if let Some(span) = self.trivia.get(idx) {
                if pos >= span.start {
                    pos = pos.max(span.end);
                    idx += 1;
                    continue;
                }
            }
            let c = self.bytes[pos];
            if c == open {
                depth += 1;
            } else if c == close {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(pos);
                }
            }
            pos += 1;
        }
        None
    }

    /// End of an arrow expression body: `;` or end of line at depth zero
    fn expression_end(&self, start: usize) -> usize {
        let mut depth = 0i32;
        let mut pos = start;
        let mut idx = self.trivia.partition_point(|span| span.end <= pos);
        while pos < self.bytes.len() {
            if let Some(span) = self.trivia.get(idx) {
                if pos >= span.start {
                    pos = pos.max(span.end);
                    idx += 1;
                    continue;
                }
            }
            match self.bytes[pos] {
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => {
                    depth -= 1;
                    if depth < 0 {
                        return pos;
                    }
                }
                b';' | b'\n' if depth == 0 => return pos,
                _ => {}
            }
            pos += 1;
        }
        self.bytes.len()
    }

    /// Where the declaration introduced by `header` ends
    fn declaration_end(&self, header: &Header) -> Body {
        let after_params = match header.kind {
            HeaderEnd::ParameterList => match self.matching(header.end - 1, b'(', b')') {
                Some(close) => close + 1,
                None => return Body::Unterminated,
            },
            HeaderEnd::Arrow => header.end,
        };

        let body_start = match (header.form, header.kind) {
            (DeclarationForm::Arrow, HeaderEnd::ParameterList) => {
                let Some(arrow) = self.next_code(after_params) else {
                    return Body::NotAFunction;
                };
                if !self.bytes[arrow..].starts_with(b"=>") {
                    return Body::NotAFunction;
                }
                self.next_code(arrow + 2)
            }
            _ => self.next_code(after_params),
        };
        let Some(body_start) = body_start else {
            return Body::Unterminated;
        };

        if self.bytes[body_start] == b'{' {
            match self.matching(body_start, b'{', b'}') {
                Some(close) => Body::Complete(close + 1),
                None => Body::Unterminated,
            }
        } else if header.form == DeclarationForm::Arrow {
            Body::Complete(self.expression_end(body_start))
        } else {
            Body::NotAFunction
        }
    }
}

/// Byte ranges of comments and string, template and regex literals
///
/// Template substitutions (`${ ... }`) are code and are left out of the
/// ranges, so braces inside them still balance.
fn trivia_spans(source: &str) -> Vec<Range<usize>> {
    let bytes = source.as_bytes();
    let len = bytes.len();
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut substitutions: Vec<usize> = Vec::new();
    let mut last_significant: Option<u8> = None;
    let mut i = 0;

    while i < len {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();
        match c {
            b'/' if next == Some(b'/') => {
                let start = i;
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                spans.push(start..i);
            }
            b'/' if next == Some(b'*') => {
                let start = i;
                i = find(bytes, i + 2, b"*/").map_or(len, |end| end + 2);
                spans.push(start..i);
            }
            b'\'' | b'"' => {
                let start = i;
                i = scan_string(bytes, i, c);
                spans.push(start..i);
                last_significant = Some(c);
            }
            b'`' => {
                let start = i;
                let (end, opened) = scan_template(bytes, i + 1);
                spans.push(start..end);
                if opened {
                    substitutions.push(depth);
                }
                i = end;
                last_significant = Some(c);
            }
            b'/' if regex_allowed(bytes, i, last_significant) => match scan_regex(bytes, i) {
                Some(end) => {
                    spans.push(i..end);
                    i = end;
                    // A regex literal behaves like an operand
                    last_significant = Some(b'a');
                }
                None => {
                    last_significant = Some(c);
                    i += 1;
                }
            },
            b'{' => {
                depth += 1;
                last_significant = Some(c);
                i += 1;
            }
            b'}' if substitutions.last() == Some(&depth) => {
                substitutions.pop();
                let start = i;
                let (end, opened) = scan_template(bytes, i + 1);
                spans.push(start..end);
                if opened {
                    substitutions.push(depth);
                }
                i = end;
                last_significant = Some(b'`');
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                last_significant = Some(c);
                i += 1;
            }
            c if c.is_ascii_whitespace() => i += 1,
            _ => {
                last_significant = Some(c);
                i += 1;
            }
        }
    }
    spans
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

/// End (exclusive) of a quoted string starting at `start`
fn scan_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Scan template text from `from`; reports whether it stopped at `${`
fn scan_template(bytes: &[u8], from: usize) -> (usize, bool) {
    let mut i = from;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return (i + 1, false),
            b'$' if bytes.get(i + 1) == Some(&b'{') => return (i + 2, true),
            _ => i += 1,
        }
    }
    (bytes.len(), false)
}

/// End (exclusive) of a regex literal at `start`, or None if it is not one
fn scan_regex(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return None,
            b']' if in_class => {
                in_class = false;
                i += 1;
            }
            b'[' => {
                in_class = true;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => i += 1,
        }
    }
    None
}

/// Whether a `/` at `pos` starts a regex literal rather than a division
fn regex_allowed(bytes: &[u8], pos: usize, last_significant: Option<u8>) -> bool {
    const KEYWORDS: [&str; 9] = [
        "return", "typeof", "case", "do", "else", "in", "of", "void", "yield",
    ];

    match last_significant {
        None => true,
        Some(c) if b"(,=:[!&|?{};+-*%<>~^}".contains(&c) => true,
        Some(c) if c.is_ascii_alphabetic() => {
            let mut start = pos;
            while start > 0 && bytes[start - 1].is_ascii_whitespace() {
                start -= 1;
            }
            let end = start;
            while start > 0 && (bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_') {
                start -= 1;
            }
            let word = std::str::from_utf8(&bytes[start..end]).unwrap_or("");
            KEYWORDS.contains(&word)
        }
        Some(_) => false,
    }
}
