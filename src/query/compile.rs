//! Compiles raw request parameters into a [`CompiledQuery`].

use crate::errors::QueryError;
use crate::schema::CollectionSchema;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

use super::geo::resolve_near;
use super::infer::infer;
use super::parse::{filter_set_from_json, is_json_literal, parse_json, parse_sort, split_list};
use super::pipeline::parse_pipeline;
use super::types::{CONTROL_PREFIX, CompiledQuery, DEFAULT_LIMIT, FilterSet, Predicate};

/// Control parameters recognised after the `__` prefix.
pub const CONTROL_KEYS: [&str; 10] = [
    "count", "populate", "sort", "skip", "limit", "near", "where", "operator", "distinct",
    "aggregate",
];

/// Compiles raw request parameters against a collection schema.
///
/// Control keys are always stripped from the filter set. Field filters go through
/// [`infer`]; `__near` overrides any filter on the spatial field; the `__operator`
/// overlay is merged last and wins over inferred predicates. No I/O happens here.
///
/// # Errors
/// `MalformedJson` for unparsable brace-delimited values or overlay, `MissingGeoIndex` for
/// `__near` on a collection without a spatial field, `InvalidParameter` for malformed
/// control values.
pub fn compile<I, K, V>(schema: &CollectionSchema, params: I) -> Result<CompiledQuery, QueryError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut control: HashMap<&'static str, String> = HashMap::new();
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    for (k, v) in params {
        let (k, v) = (k.as_ref(), v.as_ref());
        match k.strip_prefix(CONTROL_PREFIX) {
            Some(name) => match CONTROL_KEYS.iter().find(|c| **c == name) {
                Some(c) => {
                    control.insert(*c, v.to_string());
                }
                None => log::debug!("ignoring unknown control parameter `{k}` on {}", schema.name),
            },
            None => {
                fields.insert(k.to_string(), v.to_string());
            }
        }
    }

    let mut query = CompiledQuery {
        count: control.contains_key("count"),
        limit: parse_count(&control, "limit")?.unwrap_or(DEFAULT_LIMIT),
        skip: parse_count(&control, "skip")?.unwrap_or(0),
        ..CompiledQuery::default()
    };

    for (field, raw) in &fields {
        query.filter.insert(field.clone(), infer(field, raw)?);
    }

    if let Some(raw) = control.get("near") {
        let (field, near) = resolve_near(schema, raw)?;
        query.filter.insert(field, Predicate::Near(near));
    }

    if let Some(raw) = control.get("operator") {
        let overlay = parse_overlay(raw)?;
        merge_overlay(&mut query.filter, overlay);
    }

    if let Some(raw) = control.get("sort") {
        query.sort = parse_sort(raw)?;
    }
    if let Some(raw) = control.get("populate") {
        query.populate = split_list(raw).map(str::to_string).collect();
    }
    if let Some(raw) = control.get("distinct") {
        let field = raw.trim();
        if field.is_empty() {
            return Err(QueryError::invalid("__distinct", "field name required"));
        }
        query.distinct = Some(field.to_string());
    }
    if let Some(raw) = control.get("aggregate") {
        query.aggregate = Some(parse_pipeline(raw)?);
    }
    if let Some(raw) = control.get("where") {
        query.where_value = Some(raw.clone());
    }
    Ok(query)
}

/// Leading decimal digits of a `__limit`/`__skip` value; trailing text is ignored and an
/// empty value counts as absent.
fn parse_count(control: &HashMap<&'static str, String>, key: &str) -> Result<Option<usize>, QueryError> {
    let Some(raw) = control.get(key) else { return Ok(None) };
    let s = raw.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s[..end]
        .parse::<usize>()
        .map(Some)
        .map_err(|_| QueryError::invalid(&format!("__{key}"), format!("`{raw}` is not a non-negative integer")))
}

fn parse_overlay(raw: &str) -> Result<FilterSet, QueryError> {
    if !is_json_literal(raw) {
        return Err(QueryError::invalid("__operator", "expected a JSON object"));
    }
    match parse_json("__operator", raw)? {
        Value::Object(map) => filter_set_from_json("__operator", &map),
        _ => Err(QueryError::invalid("__operator", "expected a JSON object")),
    }
}

fn merge_overlay(filter: &mut FilterSet, overlay: FilterSet) {
    for (field, predicate) in overlay.fields {
        let merged = match filter.fields.remove(&field) {
            Some(existing) => existing.merge(predicate),
            None => predicate,
        };
        filter.fields.insert(field, merged);
    }
    filter.logical.extend(overlay.logical);
}
