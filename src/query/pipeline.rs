use crate::errors::QueryError;
use serde_json::{Map, Value};

use super::parse::{filter_set_from_json, parse_json, sort_order};
use super::types::{Accumulator, GroupStage, MAX_PIPELINE_STAGES, SortSpec, Stage, SumArg};

const PARAM: &str = "__aggregate";

/// Parses an aggregate pipeline: a JSON array of single-key stage objects (a lone
/// stage object is accepted too).
///
/// # Errors
/// `MalformedJson` on unparsable input, `UnsupportedStage` for unknown stages and
/// `InvalidParameter` for stages with the wrong shape.
pub fn parse_pipeline(raw: &str) -> Result<Vec<Stage>, QueryError> {
    let stages = match parse_json(PARAM, raw)? {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => return Err(QueryError::invalid(PARAM, "expected an array of stages")),
    };
    if stages.len() > MAX_PIPELINE_STAGES {
        return Err(QueryError::invalid(PARAM, "too many stages"));
    }
    stages.iter().map(parse_stage).collect()
}

fn parse_stage(v: &Value) -> Result<Stage, QueryError> {
    let Some((name, body)) = v.as_object().filter(|m| m.len() == 1).and_then(|m| m.iter().next())
    else {
        return Err(QueryError::invalid(PARAM, "each stage must be an object with one key"));
    };
    match name.as_str() {
        "$match" => Ok(Stage::Match(filter_set_from_json(PARAM, object(name, body)?)?)),
        "$group" => parse_group(object(name, body)?),
        "$sort" => {
            let sort = object(name, body)?
                .iter()
                .map(|(f, dir)| Ok(SortSpec { field: f.clone(), order: sort_order(dir)? }))
                .collect::<Result<Vec<_>, QueryError>>()?;
            Ok(Stage::Sort(sort))
        }
        "$skip" => Ok(Stage::Skip(count(name, body)?)),
        "$limit" => Ok(Stage::Limit(count(name, body)?)),
        "$project" => {
            let mut fields = Vec::new();
            let mut exclude_id = false;
            for (f, flag) in object(name, body)? {
                let include = match flag {
                    Value::Bool(b) => *b,
                    Value::Number(n) => n.as_f64().is_some_and(|x| x != 0.0),
                    _ => return Err(QueryError::invalid(PARAM, "$project values must be 0/1")),
                };
                if include {
                    fields.push(f.clone());
                } else if f == "_id" {
                    exclude_id = true;
                } else {
                    return Err(QueryError::invalid(PARAM, "$project only supports inclusion"));
                }
            }
            Ok(Stage::Project { fields, exclude_id })
        }
        "$count" => match body {
            Value::String(s) if !s.is_empty() && !s.starts_with('$') => Ok(Stage::Count(s.clone())),
            _ => Err(QueryError::invalid(PARAM, "$count requires a field name")),
        },
        other => Err(QueryError::UnsupportedStage(other.to_string())),
    }
}

fn object<'a>(stage: &str, body: &'a Value) -> Result<&'a Map<String, Value>, QueryError> {
    body.as_object().ok_or_else(|| QueryError::invalid(PARAM, format!("{stage} requires an object")))
}

fn count(stage: &str, body: &Value) -> Result<usize, QueryError> {
    body.as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| QueryError::invalid(PARAM, format!("{stage} requires a non-negative integer")))
}

fn field_ref(v: &Value) -> Option<String> {
    v.as_str().and_then(|s| s.strip_prefix('$')).filter(|s| !s.is_empty()).map(str::to_string)
}

fn parse_group(body: &Map<String, Value>) -> Result<Stage, QueryError> {
    let key = match body.get("_id") {
        Some(Value::Null) => None,
        Some(v) => Some(
            field_ref(v).ok_or_else(|| QueryError::invalid(PARAM, "$group _id must be \"$field\" or null"))?,
        ),
        None => return Err(QueryError::invalid(PARAM, "$group requires _id")),
    };
    let mut accumulators = Vec::new();
    for (out, decl) in body.iter().filter(|(k, _)| k.as_str() != "_id") {
        let Some((op, arg)) = decl.as_object().filter(|m| m.len() == 1).and_then(|m| m.iter().next())
        else {
            return Err(QueryError::invalid(PARAM, format!("accumulator `{out}` must have one operator")));
        };
        let field = || {
            field_ref(arg).ok_or_else(|| QueryError::invalid(PARAM, format!("{op} requires \"$field\"")))
        };
        let acc = match op.as_str() {
            "$sum" => match arg {
                Value::Number(n) => Accumulator::Sum(SumArg::Constant(n.as_f64().unwrap_or(0.0))),
                _ => Accumulator::Sum(SumArg::Field(field()?)),
            },
            "$avg" => Accumulator::Avg(field()?),
            "$min" => Accumulator::Min(field()?),
            "$max" => Accumulator::Max(field()?),
            "$push" => Accumulator::Push(field()?),
            "$addToSet" => Accumulator::AddToSet(field()?),
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        };
        accumulators.push((out.clone(), acc));
    }
    Ok(Stage::Group(GroupStage { key, accumulators }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_group_and_sort() {
        let stages = parse_pipeline(
            r#"[{"$match": {"genre": "scifi"}},
                {"$group": {"_id": "$author", "n": {"$sum": 1}, "pages": {"$avg": "$pages"}}},
                {"$sort": {"n": -1}}, {"$limit": 5}]"#,
        )
        .unwrap();
        assert_eq!(stages.len(), 4);
        let Stage::Group(g) = &stages[1] else { panic!("expected group") };
        assert_eq!(g.key.as_deref(), Some("author"));
        assert_eq!(g.accumulators[0], ("n".to_string(), Accumulator::Sum(SumArg::Constant(1.0))));
        assert_eq!(g.accumulators[1], ("pages".to_string(), Accumulator::Avg("pages".into())));
        assert_eq!(stages[3], Stage::Limit(5));
    }

    #[test]
    fn single_stage_object_accepted() {
        assert_eq!(parse_pipeline(r#"{"$count": "total"}"#).unwrap(), vec![Stage::Count("total".into())]);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert!(matches!(parse_pipeline(r#"[{"$lookup": {}}]"#), Err(QueryError::UnsupportedStage(_))));
        assert!(matches!(parse_pipeline("[{"), Err(QueryError::MalformedJson { .. })));
        assert!(matches!(parse_pipeline(r#"[{"$limit": -1}]"#), Err(QueryError::InvalidParameter { .. })));
        assert!(parse_pipeline(r#"[{"$project": {"a": 0}}]"#).is_err());
    }
}
