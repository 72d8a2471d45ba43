//! JSON fragments (filter literals, the operator overlay, sort objects) into typed predicates.

use crate::errors::QueryError;
use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde_json::{Map, Value};

use super::types::{
    Condition, FilterSet, LogicalOp, MAX_IN_SET, MAX_LOGICAL_DEPTH, Order, Pattern, Predicate,
    SortSpec,
};

/// `^{.*}$`: brace-delimited on a single line.
#[must_use]
pub fn is_json_literal(raw: &str) -> bool {
    raw.len() >= 2
        && raw.starts_with('{')
        && raw.ends_with('}')
        && !raw.contains(['\n', '\r', '\u{2028}', '\u{2029}'])
}

pub(crate) fn parse_json(param: &str, raw: &str) -> Result<Value, QueryError> {
    serde_json::from_str(raw)
        .map_err(|source| QueryError::MalformedJson { param: param.to_string(), source })
}

/// Converts a JSON value into BSON. `{"$oid": "<hex>"}` becomes an `ObjectId`; integers
/// become `Int32` when they fit, else `Int64`; other numbers become `Double`.
#[must_use]
pub fn json_to_bson(v: &Value) -> Bson {
    match v {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i).map_or(Bson::Int64(i), Bson::Int32)
            } else {
                Bson::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => {
            if map.len() == 1
                && let Some(Value::String(hex)) = map.get("$oid")
                && let Ok(oid) = ObjectId::parse_str(hex)
            {
                return Bson::ObjectId(oid);
            }
            Bson::Document(json_object_to_document(map))
        }
    }
}

#[must_use]
pub fn json_object_to_document(map: &Map<String, Value>) -> Document {
    let mut doc = Document::new();
    for (k, v) in map {
        doc.insert(k.clone(), json_to_bson(v));
    }
    doc
}

/// Relaxed extended JSON rendering of a BSON value.
#[must_use]
pub fn bson_to_json(b: &Bson) -> Value {
    b.clone().into_relaxed_extjson()
}

fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Predicate for a parsed JSON filter value: operator objects become `Range`,
/// `{"$oid": ..}` becomes `Id`, anything else is an exact match.
pub(crate) fn predicate_from_json(field: &str, v: &Value) -> Result<Predicate, QueryError> {
    match v {
        Value::Object(map) if is_operator_object(map) => {
            if let Bson::ObjectId(oid) = json_to_bson(v) {
                return Ok(Predicate::Id(oid));
            }
            Ok(Predicate::Range(conditions_from_json(field, map)?))
        }
        other => Ok(Predicate::Exact(json_to_bson(other))),
    }
}

fn array_operand(field: &str, op: &str, v: &Value) -> Result<Vec<Bson>, QueryError> {
    match v {
        Value::Array(items) => Ok(items.iter().take(MAX_IN_SET).map(json_to_bson).collect()),
        _ => Err(QueryError::invalid(field, format!("{op} requires an array"))),
    }
}

fn conditions_from_json(field: &str, map: &Map<String, Value>) -> Result<Vec<Condition>, QueryError> {
    let case_insensitive = match map.get("$options") {
        None => false,
        Some(Value::String(opts)) => opts.contains('i'),
        Some(_) => return Err(QueryError::invalid(field, "$options must be a string")),
    };
    let mut out = Vec::with_capacity(map.len());
    for (op, v) in map {
        let cond = match op.as_str() {
            "$eq" => Condition::Eq(json_to_bson(v)),
            "$ne" => Condition::Ne(json_to_bson(v)),
            "$gt" => Condition::Gt(json_to_bson(v)),
            "$gte" => Condition::Gte(json_to_bson(v)),
            "$lt" => Condition::Lt(json_to_bson(v)),
            "$lte" => Condition::Lte(json_to_bson(v)),
            "$in" => Condition::In(array_operand(field, op, v)?),
            "$nin" => Condition::Nin(array_operand(field, op, v)?),
            "$all" => Condition::All(array_operand(field, op, v)?),
            "$exists" => Condition::Exists(match v {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                _ => return Err(QueryError::invalid(field, "$exists requires a boolean")),
            }),
            "$size" => match v.as_u64().and_then(|n| usize::try_from(n).ok()) {
                Some(n) => Condition::Size(n),
                None => {
                    return Err(QueryError::invalid(field, "$size requires a non-negative integer"));
                }
            },
            "$regex" => {
                let Value::String(src) = v else {
                    return Err(QueryError::invalid(field, "$regex must be a string"));
                };
                let pattern = Pattern::new(src, case_insensitive).map_err(|source| {
                    QueryError::InvalidPattern { field: field.to_string(), source }
                })?;
                Condition::Regex(pattern)
            }
            "$options" => continue,
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        };
        out.push(cond);
    }
    Ok(out)
}

/// Parses a JSON object of `field -> value` pairs, with `$and` / `$or` / `$nor` groups.
pub(crate) fn filter_set_from_json(
    param: &str,
    map: &Map<String, Value>,
) -> Result<FilterSet, QueryError> {
    filter_set_at_depth(param, map, 0)
}

fn filter_set_at_depth(
    param: &str,
    map: &Map<String, Value>,
    depth: usize,
) -> Result<FilterSet, QueryError> {
    if depth > MAX_LOGICAL_DEPTH {
        return Err(QueryError::invalid(param, "logical operators nested too deeply"));
    }
    let mut set = FilterSet::new();
    for (key, v) in map {
        let op = match key.as_str() {
            "$and" => Some(LogicalOp::And),
            "$or" => Some(LogicalOp::Or),
            "$nor" => Some(LogicalOp::Nor),
            k if k.starts_with('$') => return Err(QueryError::UnsupportedOperator(k.to_string())),
            _ => None,
        };
        if let Some(op) = op {
            let Value::Array(items) = v else {
                return Err(QueryError::invalid(param, format!("{key} requires an array")));
            };
            let mut groups = Vec::with_capacity(items.len());
            for item in items {
                let Value::Object(inner) = item else {
                    return Err(QueryError::invalid(param, format!("{key} entries must be objects")));
                };
                groups.push(filter_set_at_depth(param, inner, depth + 1)?);
            }
            set.logical.push((op, groups));
        } else {
            set.insert(key.clone(), predicate_from_json(key, v)?);
        }
    }
    Ok(set)
}

/// `"-age name"`, `"age,-name"` or `{"age": -1, "name": "asc"}`.
pub(crate) fn parse_sort(raw: &str) -> Result<Vec<SortSpec>, QueryError> {
    if is_json_literal(raw) {
        let Value::Object(map) = parse_json("__sort", raw)? else {
            return Err(QueryError::invalid("__sort", "expected an object"));
        };
        return map
            .iter()
            .map(|(field, dir)| Ok(SortSpec { field: field.clone(), order: sort_order(dir)? }))
            .collect();
    }
    Ok(split_list(raw)
        .map(|tok| match tok.strip_prefix('-') {
            Some(field) => SortSpec::desc(field),
            None => SortSpec::asc(tok.strip_prefix('+').unwrap_or(tok)),
        })
        .collect())
}

pub(crate) fn sort_order(dir: &Value) -> Result<Order, QueryError> {
    match dir {
        Value::Number(n) if n.as_f64().is_some_and(|f| f > 0.0) => Ok(Order::Asc),
        Value::Number(n) if n.as_f64().is_some_and(|f| f < 0.0) => Ok(Order::Desc),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Order::Asc),
            "desc" | "descending" => Ok(Order::Desc),
            _ => Err(QueryError::invalid("__sort", format!("unknown direction `{s}`"))),
        },
        other => Err(QueryError::invalid("__sort", format!("unknown direction `{other}`"))),
    }
}

/// Splits on commas and whitespace, dropping empty tokens.
pub(crate) fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ',' || c.is_whitespace()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_literal_detection() {
        assert!(is_json_literal("{}"));
        assert!(is_json_literal(r#"{"$gt": 5}"#));
        assert!(!is_json_literal("{"));
        assert!(!is_json_literal("{\n}"));
        assert!(!is_json_literal("[1]"));
    }

    #[test]
    fn operator_objects_become_conditions() {
        let p = predicate_from_json("age", &json!({"$gt": 5, "$lte": 10})).unwrap();
        let Predicate::Range(conds) = p else { panic!("expected range") };
        assert_eq!(conds.len(), 2);
        assert!(conds.contains(&Condition::Gt(Bson::Int32(5))));
        assert!(conds.contains(&Condition::Lte(Bson::Int32(10))));
    }

    #[test]
    fn plain_object_is_exact() {
        let p = predicate_from_json("meta", &json!({"a": 1})).unwrap();
        assert_eq!(p, Predicate::Exact(Bson::Document(bson::doc! {"a": 1})));
    }

    #[test]
    fn oid_object_is_id() {
        let oid = ObjectId::new();
        let p = predicate_from_json("_id", &json!({"$oid": oid.to_hex()})).unwrap();
        assert_eq!(p, Predicate::Id(oid));
    }

    #[test]
    fn unknown_operator_rejected() {
        let err = predicate_from_json("x", &json!({"$where": "1"})).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator(op) if op == "$where"));
    }

    #[test]
    fn regex_options_respected() {
        let p = predicate_from_json("x", &json!({"$regex": "^ab", "$options": "i"})).unwrap();
        let Predicate::Range(conds) = p else { panic!("expected range") };
        let Condition::Regex(pat) = &conds[0] else { panic!("expected regex") };
        assert!(pat.is_case_insensitive());
        assert!(pat.is_match("ABc"));
    }

    #[test]
    fn sort_forms() {
        assert_eq!(
            parse_sort("-age name").unwrap(),
            vec![SortSpec::desc("age"), SortSpec::asc("name")]
        );
        assert_eq!(parse_sort("a,+b").unwrap(), vec![SortSpec::asc("a"), SortSpec::asc("b")]);
        assert_eq!(
            parse_sort(r#"{"age": -1, "name": "asc"}"#).unwrap(),
            vec![SortSpec::desc("age"), SortSpec::asc("name")]
        );
        assert!(parse_sort(r#"{"age": 0}"#).is_err());
    }
}
