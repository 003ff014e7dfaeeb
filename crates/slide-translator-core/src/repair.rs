//! Recovery of a flat `{id: text}` mapping from model output.
//!
//! Models wrap JSON in code fences, truncate it, forget quotes and commas,
//! or emit raw newlines inside strings. [`parse`] runs an ordered cascade
//! and returns the first strategy that yields a mapping:
//!
//! 1. strict parse of the (fence-stripped) text
//! 2. repair pass (string literals, bare keys, trailing commas, unbalanced
//!    braces, truncation) followed by a strict parse
//! 3. extraction of every balanced `{...}` block, each parsed as in 1-2,
//!    merged in order
//! 4. regex salvage of `"key": "value"` and `"key": number` pairs
//!
//! String values then have double-escaped `\n`, `\t` and vertical tabs
//! turned back into the real characters.

use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde_json::{Map, Number, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A value recovered from the model output.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedValue {
    Text(String),
    Number(Number),
}

impl ParsedValue {
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

impl From<&str> for ParsedValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

pub type ParsedMapping = IndexMap<String, ParsedValue>;

/// Which step of the cascade produced the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Strict,
    Repaired,
    Blocks,
    Salvage,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Strict => "strict parse",
            Self::Repaired => "repair pass",
            Self::Blocks => "block extraction",
            Self::Salvage => "regex salvage",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Parsed {
    pub mapping: ParsedMapping,
    pub strategy: Strategy,
}

/// Parse a model response into a mapping, trying every strategy in turn.
pub fn parse(raw: &str) -> Result<ParsedMapping> {
    parse_detailed(raw).map(|parsed| parsed.mapping)
}

/// Like [`parse`], also reporting the strategy that succeeded.
pub fn parse_detailed(raw: &str) -> Result<Parsed> {
    let text = strip_code_fences(raw);

    let with = |strategy: Strategy| {
        move |mapping: ParsedMapping| Parsed {
            mapping: normalize_values(mapping),
            strategy,
        }
    };

    strict(raw.trim())
        .or_else(|_| strict(text))
        .map(with(Strategy::Strict))
        .or_else(|e| {
            debug!("Strict parse failed: {}", e);
            repaired(text).map(with(Strategy::Repaired))
        })
        .or_else(|e| {
            debug!("Repair pass failed: {}", e);
            blocks(text).map(with(Strategy::Blocks))
        })
        .or_else(|e| {
            debug!("Block extraction failed: {}", e);
            salvage(raw).map(with(Strategy::Salvage))
        })
        .inspect(|parsed| {
            if parsed.strategy != Strategy::Strict {
                debug!(
                    "Recovered {} entries via {}",
                    parsed.mapping.len(),
                    parsed.strategy
                );
            }
        })
        .inspect_err(|e| warn!("All parse strategies failed: {}", e))
}

/// Extract the body of a ```json (or bare ```) fence wrapping the object.
///
/// Only a fence opened before the first `{` counts, so backticks inside
/// string values are left alone.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let first_brace = trimmed.find('{').unwrap_or(trimmed.len());
    let Some(open) = trimmed[..first_brace].find("```") else {
        return trimmed;
    };

    // Skip the info string (`json`, `JSON`, ...)
    let body = trimmed[open + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    body.rfind("```").map_or(body, |end| &body[..end]).trim()
}

// =============================================================================
// Strategy 1: strict
// =============================================================================

fn strict(text: &str) -> Result<ParsedMapping> {
    let value: Value = serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(from_object(map)),
        other => Err(Error::Parse(format!(
            "expected a JSON object, found {}",
            kind_of(&other)
        ))),
    }
}

fn from_object(map: Map<String, Value>) -> ParsedMapping {
    map.into_iter()
        .filter_map(|(key, value)| match value {
            Value::String(s) => Some((key, ParsedValue::Text(s))),
            Value::Number(n) => Some((key, ParsedValue::Number(n))),
            other => {
                debug!("Ignoring non-text value for {}: {}", key, kind_of(&other));
                None
            }
        })
        .collect()
}

const fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Strategy 2: repair pass
// =============================================================================

fn repaired(text: &str) -> Result<ParsedMapping> {
    let fixed = repair_strings(text);
    let structure = repair_structure(&fixed);
    if structure.more_objects {
        return Err(Error::Parse("several top-level objects".to_string()));
    }

    match strict(&structure.text) {
        Ok(mapping) => Ok(mapping),
        Err(first) => {
            // Truncated output: back off to the last complete pair
            for &cut in structure.pair_boundaries.iter().rev().take(3) {
                let candidate = format!("{}}}", &structure.text[..cut]);
                if let Ok(mapping) = strict(&candidate) {
                    debug!("Recovered truncated object at byte {}", cut);
                    return Ok(mapping);
                }
            }
            Err(first)
        }
    }
}

/// Normalize string literals.
///
/// Inside strings: line breaks and tabs become escapes, other control
/// characters are dropped, invalid backslash escapes are doubled, and a
/// line break that is followed by a key or a closing bracket terminates an
/// unterminated string. Outside
/// strings, control characters other than whitespace are dropped. A string
/// still open at the end is closed.
fn repair_strings(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if !in_string {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                '\n' | '\r' | '\t' => out.push(c),
                c if c.is_control() => {}
                c => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '\\' => match chars.get(i + 1) {
                Some(&n @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't')) => {
                    out.push('\\');
                    out.push(n);
                    i += 2;
                    continue;
                }
                Some('u')
                    if chars.len() >= i + 6
                        && chars[i + 2..i + 6].iter().all(char::is_ascii_hexdigit) =>
                {
                    out.extend(&chars[i..i + 6]);
                    i += 6;
                    continue;
                }
                _ => out.push_str("\\\\"),
            },
            '"' => {
                in_string = false;
                out.push(c);
            }
            '\n' | '\r' => match line_break_terminates(&chars, i) {
                Some(next_is_key) => {
                    if out.ends_with(',') {
                        out.pop();
                        out.push_str("\",");
                    } else {
                        out.push('"');
                        if next_is_key {
                            out.push(',');
                        }
                    }
                    in_string = false;
                    out.push(c);
                }
                None => out.push_str(if c == '\n' { "\\n" } else { "\\r" }),
            },
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
        i += 1;
    }

    if in_string {
        out.push('"');
    }
    out
}

/// Whether the line break at `i` (inside a string) really ends it.
///
/// Returns `Some(true)` when the next line starts with a `"key":`,
/// `Some(false)` when it starts with a closing bracket or the input ends,
/// and `None` when the break looks like part of the value.
fn line_break_terminates(chars: &[char], i: usize) -> Option<bool> {
    let mut j = i;
    while j < chars.len() && chars[j].is_whitespace() {
        j += 1;
    }
    match chars.get(j) {
        None | Some('}' | ']') => Some(false),
        Some('"') => {
            let mut k = j + 1;
            while k < chars.len() {
                match chars[k] {
                    '\\' => k += 2,
                    '"' => break,
                    '\n' => return None,
                    _ => k += 1,
                }
            }
            let after = next_non_ws(chars, k + 1);
            (after == Some(':')).then_some(true)
        }
        _ => None,
    }
}

struct Structure {
    text: String,
    /// Byte offsets just before each top-level comma
    pair_boundaries: Vec<usize>,
    /// Another object follows the first one
    more_objects: bool,
}

/// Fix the object structure outside string literals: drop text before the
/// first `{` and after the object closes, quote bare keys, remove trailing
/// commas and unmatched closers, and close whatever is still open.
fn repair_structure(text: &str) -> Structure {
    let body = match text.find('{') {
        Some(start) => &text[start..],
        None => {
            return Structure {
                text: format!("{{{text}}}"),
                pair_boundaries: Vec::new(),
                more_objects: false,
            };
        }
    };

    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut pair_boundaries = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    let mut more_objects = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '{' => {
                stack.push('}');
                out.push(c);
            }
            '[' => {
                stack.push(']');
                out.push(c);
            }
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                    out.push(c);
                    if stack.is_empty() {
                        more_objects = chars[i + 1..].contains(&'{');
                        break;
                    }
                }
            }
            ',' => {
                if !matches!(next_non_ws(&chars, i + 1), Some('}' | ']') | None) {
                    if stack.len() == 1 {
                        pair_boundaries.push(out.len());
                    }
                    out.push(c);
                }
            }
            c if is_key_start(c) && expects_key(&out) => {
                let mut j = i;
                while j < chars.len() && is_key_char(chars[j]) {
                    j += 1;
                }
                let word: String = chars[i..j].iter().collect();
                if next_non_ws(&chars, j) == Some(':') {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
                i = j;
                continue;
            }
            c => out.push(c),
        }
        i += 1;
    }

    if in_string {
        out.push('"');
    }
    if !stack.is_empty() {
        drop_dangling_tail(&mut out);
        while let Some(closer) = stack.pop() {
            out.push(closer);
        }
    }

    Structure {
        text: out,
        pair_boundaries,
        more_objects,
    }
}

/// Remove a trailing separator or a key left without its value.
fn drop_dangling_tail(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        match out.chars().next_back() {
            Some(',' | ':') => {
                out.pop();
            }
            Some('"') => {
                let Some(start) = last_string_start(out) else {
                    return;
                };
                let before = out[..start].trim_end().chars().next_back();
                if matches!(before, Some(',' | '{')) && !ends_after_colon(out, start) {
                    // A key with no value
                    out.truncate(start);
                } else {
                    return;
                }
            }
            _ => return,
        }
    }
}

fn ends_after_colon(out: &str, string_start: usize) -> bool {
    out[..string_start].trim_end().ends_with(':')
}

/// Byte offset of the opening quote of the string literal ending `out`.
fn last_string_start(out: &str) -> Option<usize> {
    let bytes = out.as_bytes();
    let mut idx = bytes.len().checked_sub(1)?;
    while idx > 0 {
        idx -= 1;
        if bytes[idx] == b'"' {
            let backslashes = bytes[..idx].iter().rev().take_while(|&&b| b == b'\\').count();
            if backslashes % 2 == 0 {
                return Some(idx);
            }
        }
    }
    None
}

fn expects_key(out: &str) -> bool {
    matches!(out.trim_end().chars().next_back(), Some('{' | ','))
}

fn is_key_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

fn next_non_ws(chars: &[char], from: usize) -> Option<char> {
    chars.iter().skip(from).copied().find(|c| !c.is_whitespace())
}

// =============================================================================
// Strategy 3: block extraction
// =============================================================================

fn blocks(text: &str) -> Result<ParsedMapping> {
    let normalized = repair_strings(text);
    let mut merged = ParsedMapping::new();
    let mut found = 0usize;

    for block in balanced_blocks(&normalized) {
        found += 1;
        match strict(block).or_else(|_| repaired(block)) {
            Ok(mapping) => merged.extend(mapping),
            Err(_) => {
                // Nested objects may still be intact
                let inner = &block[1..block.len() - 1];
                for nested in balanced_blocks(inner) {
                    if let Ok(mapping) = strict(nested).or_else(|_| repaired(nested)) {
                        merged.extend(mapping);
                    }
                }
            }
        }
    }

    if merged.is_empty() {
        return Err(Error::Parse(format!(
            "no parseable block among {found} balanced blocks"
        )));
    }
    Ok(merged)
}

/// Top-level balanced `{...}` substrings, tracking depth outside strings.
fn balanced_blocks(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(s) = start.take()
                {
                    out.push(&text[s..=idx]);
                }
            }
            _ => {}
        }
    }
    out
}

// =============================================================================
// Strategy 4: regex salvage
// =============================================================================

// Patterns are hardcoded and valid, expect is safe
#[allow(clippy::expect_used)]
static STRING_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid regex")
});

#[allow(clippy::expect_used)]
static NUMBER_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""((?:[^"\\]|\\.)*)"\s*:\s*(-?[0-9]+(?:\.[0-9]+)?)"#).expect("valid regex")
});

fn salvage(text: &str) -> Result<ParsedMapping> {
    let mut result = ParsedMapping::new();

    for caps in STRING_PAIR.captures_iter(text) {
        let key = unescape(&caps[1]);
        let value = unescape(&caps[2]);
        result.insert(key, ParsedValue::Text(value));
    }

    for caps in NUMBER_PAIR.captures_iter(text) {
        let key = unescape(&caps[1]);
        if result.contains_key(&key) {
            continue;
        }
        if let Ok(n) = caps[2].parse::<Number>() {
            result.insert(key, ParsedValue::Number(n));
        }
    }

    if result.is_empty() {
        return Err(Error::Parse("no key-value pairs found".to_string()));
    }
    debug!("Salvaged {} key-value pairs through regex", result.len());
    Ok(result)
}

/// Decode JSON escapes in a captured string body, falling back to
/// unescaping quotes only.
fn unescape(body: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{body}\""))
        .unwrap_or_else(|_| body.replace("\\\"", "\""))
}

// =============================================================================
// Value normalization
// =============================================================================

fn normalize_values(mapping: ParsedMapping) -> ParsedMapping {
    mapping
        .into_iter()
        .map(|(key, value)| match value {
            ParsedValue::Text(s) => (key, ParsedValue::Text(normalize_escapes(&s))),
            number @ ParsedValue::Number(_) => (key, number),
        })
        .collect()
}

/// Turn literal `\n`, `\t` and vertical-tab escapes into the characters.
pub fn normalize_escapes(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    text.replace("\\u000b", "\u{b}")
        .replace("\\v", "\u{b}")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}
