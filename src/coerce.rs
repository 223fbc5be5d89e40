//! Scalar coercion for string-typed configuration values.
//!
//! Environment variables and other text-only sources arrive as strings; the
//! binder turns the obvious ones into typed scalars so `PORT=8080` reads back
//! as an integer and `ENABLED=true` as a boolean.

use regex_lite::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("valid integer pattern"));

static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?\d+\.\d+$").expect("valid decimal pattern"));

/// Coerce a raw string into the most specific scalar it looks like.
///
/// - `^[+-]?\d+$` becomes an integer (left as a string if it overflows `i64`)
/// - `^[+-]?\d+\.\d+$` becomes a float
/// - `true` / `false` in any case become booleans
/// - anything else stays a string
pub fn coerce_str(raw: &str) -> Value {
    if INTEGER.is_match(raw) {
        if let Ok(n) = raw.parse::<i64>() {
            return Value::Number(n.into());
        }
        return Value::String(raw.to_string());
    }
    if DECIMAL.is_match(raw)
        && let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64)
    {
        return Value::Number(n);
    }
    if raw.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(raw.to_string())
}

/// Interpret a value as a boolean.
///
/// Accepts literal booleans and the strings `true`/`false` in any case,
/// ignoring surrounding whitespace.
pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("true") {
                Some(true)
            } else if trimmed.eq_ignore_ascii_case("false") {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Interpret a value as a signed integer.
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a value as a float.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Interpret a value as a string. Numbers and booleans are rendered.
pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
