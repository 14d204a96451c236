// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The document value type shared by inputs, step outputs, and resolved
//! expressions.
//!
//! `serde_json::Value` already is the tagged
//! `Null | Bool | Number | String | Array | Object` variant the resolver
//! needs; these are the handful of domain operations (truthiness, deep
//! equality via numeric coercion, sequence/map indexing) the condition
//! grammar and path resolution require on top of it.

use serde_json::Value;

/// Truthiness used by `if`/`when`/`&&`/`||`/`!` operands: `null`, `false`,
/// `0`, and empty string/sequence/mapping are falsy; everything else is
/// truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Condition-expression equality: two numbers compare numerically; a
/// string `"true"`/`"false"` matches the corresponding boolean literal;
/// otherwise deep structural equality.
pub fn expr_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::String(s), Value::Bool(b)) | (Value::Bool(b), Value::String(s)) => {
            (s == "true" && *b) || (s == "false" && !*b)
        }
        _ => a == b,
    }
}

/// Numeric ordering for `<`, `<=`, `>`, `>=`. Returns `None` if either side
/// is not a number.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Index into an array with an integer-literal path segment, or a map with
/// a string key. Returns `None` on out-of-range or wrong-shape lookups —
/// callers turn that into `NullReference`.
pub fn index_segment<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(seq) => segment.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    }
}
