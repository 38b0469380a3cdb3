//! Recover the worker's JSON payload from output mixed with log text.
//!
//! Workers print diagnostics on stdout alongside their result, so the payload
//! is located with three strategies, in order:
//!
//! 1. the whole output parsed as one document
//! 2. the last line that starts with `{` or `[` and parses on its own
//! 3. the longest balanced `{…}` / `[…]` span embedded anywhere in the text
//!
//! Only objects and arrays count as a payload. When every strategy fails the
//! caller gets `None`, never an empty structure.

use serde_json::Value;

/// Extract exactly one JSON object or array from `output`.
pub fn extract_json(output: &str) -> Option<Value> {
    let text = output.trim();
    if text.is_empty() {
        return None;
    }
    parse_container(text)
        .or_else(|| from_trailing_lines(text))
        .or_else(|| embedded_span(text))
}

fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn parse_container(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(is_container)
}

fn from_trailing_lines(text: &str) -> Option<Value> {
    text.lines()
        .rev()
        .map(str::trim)
        .filter(|line| line.starts_with('{') || line.starts_with('['))
        .find_map(parse_container)
}

/// Try every opening bracket as the start of a value and keep the longest one
/// that parses. The streaming deserializer stops at the matching closing
/// bracket, so trailing log text after the payload is ignored.
fn embedded_span(text: &str) -> Option<Value> {
    let mut best: Option<(usize, Value)> = None;
    let mut resume_at = 0;

    for (start, ch) in text.char_indices() {
        if start < resume_at || (ch != '{' && ch != '[') {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        let Some(Ok(value)) = stream.next() else {
            continue;
        };
        if !is_container(&value) {
            continue;
        }
        let len = stream.byte_offset();
        // Anything starting inside this span is nested in it and shorter.
        resume_at = start + len;
        if best.as_ref().is_none_or(|(best_len, _)| len > *best_len) {
            best = Some((len, value));
        }
    }

    best.map(|(_, value)| value)
}
