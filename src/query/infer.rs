//! Type inference for raw string filter values.

use crate::errors::QueryError;
use bson::Bson;
use bson::oid::ObjectId;

use super::parse::{is_json_literal, parse_json, predicate_from_json};
use super::types::{Pattern, Predicate};

/// Classifies `raw` and maps it to a predicate for `field`.
///
/// Order of precedence: brace-delimited JSON, 24-hex identifier, number, boolean,
/// then case-insensitive substring match. A 24-digit value is an identifier, not a
/// number. Regex metacharacters other than `+` reach the pattern unescaped, so `^ab`
/// anchors. An empty value compiles to the empty pattern, which matches every string.
///
/// # Errors
/// `MalformedJson` when a brace-delimited value does not parse, `InvalidPattern` when the
/// substring value is not a valid regular expression.
pub fn infer(field: &str, raw: &str) -> Result<Predicate, QueryError> {
    if is_json_literal(raw) {
        let v = parse_json(field, raw)?;
        return predicate_from_json(field, &v);
    }
    if let Some(oid) = parse_object_id(raw) {
        return Ok(Predicate::Id(oid));
    }
    if let Some(n) = parse_number(raw) {
        return Ok(Predicate::Exact(n));
    }
    if let Some(b) = parse_boolean(raw) {
        return Ok(Predicate::Exact(Bson::Boolean(b)));
    }
    let pattern = Pattern::new(&like_pattern(raw), true)
        .map_err(|source| QueryError::InvalidPattern { field: field.to_string(), source })?;
    Ok(Predicate::Regex(pattern))
}

/// Finite numbers, surrounding whitespace allowed. Integral values that fit become `Int64`.
#[must_use]
pub fn parse_number(raw: &str) -> Option<Bson> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Bson::Int64(i));
    }
    // Rust accepts "inf" and "nan" spellings; neither is finite.
    let f = s.parse::<f64>().ok().filter(|f| f.is_finite())?;
    Some(Bson::Double(f))
}

/// `"true"` / `"false"`. `"0"` and `"1"` are caught earlier as numbers.
#[must_use]
pub fn parse_boolean(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[must_use]
pub fn parse_object_id(raw: &str) -> Option<ObjectId> {
    if raw.len() == 24 && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        ObjectId::parse_str(raw).ok()
    } else {
        None
    }
}

/// Escapes `+` so free text such as `c++` still compiles; everything else is kept verbatim.
#[must_use]
pub fn like_pattern(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    let mut escaped = false;
    for c in raw.chars() {
        if c == '+' && !escaped {
            out.push('\\');
        }
        escaped = c == '\\' && !escaped;
        out.push(c);
    }
    out
}
