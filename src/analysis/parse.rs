//! Resilient extraction of structured output from completion text
//!
//! The backend is asked for JSON but nothing guarantees it. Recovery runs
//! in a fixed order:
//! 1. the interior of a fenced code block, else the span from the first
//!    `{`/`[` to the last matching closer, else the raw text
//! 2. a string-aware repair pass: trailing commas before `}`/`]` are
//!    removed, stray backslashes are escaped, raw control characters
//!    inside strings are escaped
//! 3. parse; on failure, salvage the known top-level arrays one by one
//!
//! Salvaged results are degraded, never silently presented as full.

use super::types::{
    AnalysisUnit, FailureKind, ParseError, UnitFailure, UnitOutcome, KNOWN_ARRAYS,
};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use tracing::{debug, warn};

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("static regex")
    })
}

/// Keys under which a grouped answer may wrap its array
const GROUP_WRAPPERS: &[&str] = &["results", "analyses", "chunks", "units"];

/// Step 1: the most likely JSON span in `raw`.
pub fn extract_json_text(raw: &str) -> &str {
    if let Some(inner) = fence_pattern()
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty())
    {
        return inner;
    }

    let open = raw.find(['{', '[']);
    if let Some(start) = open {
        let closer = if raw[start..].starts_with('{') { '}' } else { ']' };
        if let Some(end) = raw.rfind(closer).filter(|&end| end > start) {
            return &raw[start..=end];
        }
    }
    raw.trim()
}

/// Step 2: fix the common ways model output breaks JSON.
pub fn repair(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            match c {
                '\\' => {
                    let next = chars.get(i + 1).copied();
                    if next.is_some_and(|n| is_escape_start(n, &chars[i + 1..])) {
                        out.push('\\');
                        if let Some(n) = next {
                            out.push(n);
                        }
                        i += 2;
                        continue;
                    }
                    out.push_str("\\\\");
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                _ => out.push(c),
            }
        } else {
            match c {
                '"' => {
                    in_string = true;
                    out.push(c);
                }
                ',' => {
                    let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                    if !matches!(next, Some('}') | Some(']')) {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            }
        }
        i += 1;
    }
    out
}

/// Whether the characters after a backslash form a valid JSON escape.
fn is_escape_start(next: char, rest: &[char]) -> bool {
    match next {
        '"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't' => true,
        'u' => rest.len() >= 5 && rest[1..5].iter().all(|c| c.is_ascii_hexdigit()),
        _ => false,
    }
}

/// Steps 1 and 2 plus parse, without salvage.
pub fn parse_lenient(raw: &str) -> Result<Value, ParseError> {
    if raw.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let candidate = extract_json_text(raw);
    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }
    let repaired = repair(candidate);
    serde_json::from_str(&repaired).map_err(|e| {
        debug!(error = %e, "repaired response still not valid JSON");
        ParseError::Unrecoverable(e.to_string())
    })
}

/// Step 3: pull each known array out of otherwise broken text.
///
/// Returns an object holding whichever arrays parsed, or `None`.
pub fn salvage(raw: &str) -> Option<Value> {
    let mut recovered = Map::new();
    for name in KNOWN_ARRAYS {
        let Some(span) = array_after_key(raw, name) else {
            continue;
        };
        let repaired = repair(span);
        match serde_json::from_str::<Value>(&repaired) {
            Ok(value @ Value::Array(_)) => {
                recovered.insert(name.to_string(), value);
            }
            _ => {
                if let Some(items) = salvage_items(&repaired) {
                    recovered.insert(name.to_string(), Value::Array(items));
                }
            }
        }
    }
    (!recovered.is_empty()).then_some(Value::Object(recovered))
}

/// The `[...]` following `"name":`, bracket-matched outside strings. An
/// unterminated array runs to the end of the text.
fn array_after_key<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    let pattern = Regex::new(&format!(r#""{}"\s*:\s*\["#, regex::escape(name))).ok()?;
    let m = pattern.find(raw)?;
    let start = m.end() - 1;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&raw[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    Some(&raw[start..])
}

/// Objects inside a broken array that parse on their own.
fn salvage_items(array_text: &str) -> Option<Vec<Value>> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in array_text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(v) = serde_json::from_str::<Value>(&array_text[s..=i]) {
                            items.push(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    (!items.is_empty()).then_some(items)
}

/// Parse one slot's response into an outcome.
pub fn parse_unit(raw: &str) -> UnitOutcome {
    match parse_lenient(raw) {
        Ok(value) => {
            let value = unwrap_single(value);
            match AnalysisUnit::from_value(&value) {
                Ok(unit) => UnitOutcome::Ok { unit },
                Err(e) => UnitOutcome::failed(e),
            }
        }
        Err(parse_error) => match salvage(raw) {
            Some(value) => match AnalysisUnit::from_salvaged(&value) {
                Ok(unit) => {
                    warn!(error = %parse_error, "response salvaged, result degraded");
                    UnitOutcome::Degraded {
                        unit,
                        reason: parse_error.to_string(),
                    }
                }
                Err(e) => UnitOutcome::failed(e),
            },
            None => UnitOutcome::failed(parse_error),
        },
    }
}

/// A one-element array answering a single-slot prompt.
fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    }
}

/// Parse a grouped response into exactly `expected` outcomes.
///
/// Missing entries become explicit `missing analysis` markers; surplus
/// entries are discarded with a warning. When the array itself is broken,
/// the entries that still parse on their own are kept as degraded results.
pub fn parse_group(raw: &str, expected: usize) -> Vec<UnitOutcome> {
    let (items, degraded) = match parse_lenient(raw) {
        Ok(Value::Array(items)) => (items, None),
        Ok(Value::Object(object)) => match GROUP_WRAPPERS
            .iter()
            .find_map(|k| object.get(*k).and_then(Value::as_array))
        {
            Some(items) => (items.clone(), None),
            None => (vec![Value::Object(object)], None),
        },
        Ok(other) => (vec![other], None),
        Err(e) => match salvage_group(raw) {
            Some(items) => {
                warn!(
                    error = %e,
                    recovered = items.len(),
                    expected,
                    "grouped response salvaged, results degraded"
                );
                (items, Some(e.to_string()))
            }
            None => {
                warn!(error = %e, expected, "grouped response unrecoverable");
                return (0..expected)
                    .map(|_| UnitOutcome::failed(UnitFailure::from(e.clone())))
                    .collect();
            }
        },
    };

    if items.len() > expected {
        warn!(got = items.len(), expected, "grouped response has surplus entries, discarding");
    } else if items.len() < expected {
        warn!(got = items.len(), expected, "grouped response short, padding with error markers");
    }

    let mut outcomes: Vec<UnitOutcome> = items
        .iter()
        .take(expected)
        .map(|item| match item.get("error").and_then(Value::as_str) {
            Some(error) if item.get("extractedMappings").is_none() => {
                UnitOutcome::failed(UnitFailure::new(FailureKind::Completion, error))
            }
            _ => match (AnalysisUnit::from_value(item), &degraded) {
                (Ok(unit), None) => UnitOutcome::Ok { unit },
                (Ok(unit), Some(reason)) => UnitOutcome::Degraded {
                    unit,
                    reason: reason.clone(),
                },
                (Err(e), _) => UnitOutcome::failed(e),
            },
        })
        .collect();
    outcomes.resize_with(expected, || UnitOutcome::failed(UnitFailure::missing()));
    outcomes
}

/// Complete entry objects of a broken grouped array, in order.
///
/// Scans the raw text rather than the bracket span: a truncated array's
/// last `]` may belong to an inner array.
fn salvage_group(raw: &str) -> Option<Vec<Value>> {
    let span = GROUP_WRAPPERS
        .iter()
        .find_map(|k| array_after_key(raw, k))
        .unwrap_or(raw);
    salvage_items(&repair(span))
}
