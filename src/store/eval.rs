use bson::{Bson, Document};
use std::cmp::Ordering;

use crate::query::{
    Condition, FilterSet, LogicalOp, MAX_IN_SET, MAX_SORT_FIELDS, Order, Predicate, SortSpec,
};

const MAX_PATH_DEPTH: usize = 32;

pub fn matches(doc: &Document, filter: &FilterSet) -> bool {
    filter.fields.iter().all(|(path, p)| matches_predicate(get_path(doc, path), p))
        && filter.logical.iter().all(|(op, groups)| match op {
            LogicalOp::And => groups.iter().all(|g| matches(doc, g)),
            LogicalOp::Or => groups.iter().any(|g| matches(doc, g)),
            LogicalOp::Nor => !groups.iter().any(|g| matches(doc, g)),
        })
}

/// Any top-level field holding exactly `value` as a string.
pub fn matches_where(doc: &Document, value: &str) -> bool {
    doc.iter().any(|(_, v)| matches!(v, Bson::String(s) if s == value))
}

fn matches_predicate(value: Option<&Bson>, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Exact(expected) => value.is_some_and(|v| eq_or_contains(v, expected)),
        Predicate::Id(oid) => value.is_some_and(|v| eq_or_contains(v, &Bson::ObjectId(*oid))),
        Predicate::Regex(p) => value.is_some_and(|v| any_element(v, |x| match x {
            Bson::String(s) => p.is_match(s),
            _ => false,
        })),
        Predicate::Range(conds) => conds.iter().all(|c| matches_condition(value, c)),
        Predicate::Near(near) => value.is_some_and(|v| near.contains(v)),
    }
}

fn matches_condition(value: Option<&Bson>, cond: &Condition) -> bool {
    match cond {
        Condition::Exists(exists) => value.is_some() == *exists,
        Condition::Ne(x) => !value.is_some_and(|v| eq_or_contains(v, x)),
        Condition::Nin(xs) => !value.is_some_and(|v| is_in_set(v, xs)),
        Condition::Size(n) => matches!(value, Some(Bson::Array(a)) if a.len() == *n),
        Condition::All(xs) => match value {
            Some(Bson::Array(a)) => xs.iter().all(|x| a.iter().any(|y| values_equal(x, y))),
            _ => false,
        },
        Condition::Eq(x) => value.is_some_and(|v| eq_or_contains(v, x)),
        Condition::In(xs) => value.is_some_and(|v| is_in_set(v, xs)),
        Condition::Regex(p) => value.is_some_and(|v| any_element(v, |x| match x {
            Bson::String(s) => p.is_match(s),
            _ => false,
        })),
        Condition::Gt(x) => value.is_some_and(|v| any_element(v, |y| ordered(y, x) == Some(Ordering::Greater))),
        Condition::Gte(x) => value.is_some_and(|v| {
            any_element(v, |y| matches!(ordered(y, x), Some(Ordering::Greater | Ordering::Equal)))
        }),
        Condition::Lt(x) => value.is_some_and(|v| any_element(v, |y| ordered(y, x) == Some(Ordering::Less))),
        Condition::Lte(x) => value.is_some_and(|v| {
            any_element(v, |y| matches!(ordered(y, x), Some(Ordering::Less | Ordering::Equal)))
        }),
    }
}

/// Array fields match when any element does.
fn any_element(v: &Bson, f: impl Fn(&Bson) -> bool) -> bool {
    match v {
        Bson::Array(items) => items.iter().any(&f),
        other => f(other),
    }
}

fn eq_or_contains(v: &Bson, expected: &Bson) -> bool {
    values_equal(v, expected) || matches!(v, Bson::Array(items) if items.iter().any(|x| values_equal(x, expected)))
}

fn is_in_set(v: &Bson, set: &[Bson]) -> bool {
    set.iter().take(MAX_IN_SET).any(|x| eq_or_contains(v, x))
}

/// Range comparisons only between comparable kinds (numbers with numbers, strings with strings...).
fn ordered(a: &Bson, b: &Bson) -> Option<Ordering> {
    if (is_num(a) && is_num(b)) || type_rank(a) == type_rank(b) {
        Some(compare_bson(a, b))
    } else {
        None
    }
}

/// Equality with the loose casting a schema-aware store applies: numbers compare by value,
/// booleans equal numeric 0/1, and an `ObjectId` equals its 24-hex string form.
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    use bson::Bson as T;
    match (a, b) {
        (T::ObjectId(o), T::String(s)) | (T::String(s), T::ObjectId(o)) => {
            s.eq_ignore_ascii_case(&o.to_hex())
        }
        (T::Boolean(x), n) | (n, T::Boolean(x)) if is_num(n) => {
            as_f64_num(n) == if *x { 1.0 } else { 0.0 }
        }
        _ if is_num(a) && is_num(b) => as_f64_num(a) == as_f64_num(b),
        _ => a == b,
    }
}

pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    if path.is_empty() || path.len() > 1024 {
        return None;
    }
    let mut parts = path.split('.');
    let mut cur = doc.get(parts.next()?)?;
    for (depth, part) in parts.enumerate() {
        if depth + 1 >= MAX_PATH_DEPTH {
            return None;
        }
        match cur {
            Bson::Document(d) => cur = d.get(part)?,
            _ => return None,
        }
    }
    Some(cur)
}

pub fn compare_docs(a: &Document, b: &Document, sort: &[SortSpec]) -> Ordering {
    for s in sort.iter().take(MAX_SORT_FIELDS) {
        let ord = match (get_path(a, &s.field), get_path(b, &s.field)) {
            (Some(x), Some(y)) => compare_bson(x, y),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return if s.order == Order::Asc { ord } else { ord.reverse() };
        }
    }
    Ordering::Equal
}

fn is_num(x: &Bson) -> bool {
    matches!(x, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

#[allow(clippy::cast_precision_loss)]
pub fn as_f64_num(x: &Bson) -> f64 {
    match x {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    use bson::Bson as T;
    if is_num(a) && is_num(b) {
        return as_f64_num(a).total_cmp(&as_f64_num(b));
    }
    match (a, b) {
        (T::String(x), T::String(y)) => x.cmp(y),
        (T::Boolean(x), T::Boolean(y)) => x.cmp(y),
        (T::ObjectId(x), T::ObjectId(y)) => x.cmp(y),
        (T::DateTime(x), T::DateTime(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(v: &Bson) -> u8 {
    use bson::Bson as T;
    match v {
        T::Null => 0,
        T::Boolean(_) => 1,
        T::Int32(_) => 2,
        T::Int64(_) => 3,
        T::Double(_) => 4,
        T::String(_) => 5,
        T::Array(_) => 6,
        T::Document(_) => 7,
        T::Binary(_) => 8,
        T::ObjectId(_) => 9,
        T::DateTime(_) => 10,
        T::RegularExpression(_) => 11,
        T::Timestamp(_) => 12,
        T::Symbol(_) => 13,
        T::Decimal128(_) => 14,
        T::Undefined => 15,
        T::DbPointer(_) => 16,
        T::JavaScriptCode(_) => 17,
        T::JavaScriptCodeWithScope(_) => 18,
        T::MaxKey => 250,
        T::MinKey => 251,
    }
}

pub fn project_fields(doc: &Document, fields: &[String], exclude_id: bool) -> Document {
    let mut out = Document::new();
    if !exclude_id && let Some(id) = doc.get("_id") {
        out.insert("_id", id.clone());
    }
    for f in fields.iter().filter(|f| f.as_str() != "_id") {
        if let Some(v) = get_path(doc, f) {
            out.insert(f.clone(), v.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compile;
    use crate::schema::CollectionSchema;
    use bson::doc;
    use bson::oid::ObjectId;

    fn filter(params: &[(&str, &str)]) -> FilterSet {
        compile(&CollectionSchema::new("t"), params.iter().copied()).unwrap().filter
    }

    #[test]
    fn numeric_and_boolean_equality() {
        let d = doc! { "age": 30, "score": 2.5, "active": true };
        assert!(matches(&d, &filter(&[("age", "30")])));
        assert!(matches(&d, &filter(&[("score", "2.5")])));
        assert!(matches(&d, &filter(&[("active", "true")])));
        assert!(matches(&d, &filter(&[("active", "1")])));
        assert!(!matches(&d, &filter(&[("active", "0")])));
    }

    #[test]
    fn ids_match_scalars_and_arrays() {
        let a = ObjectId::new();
        let hex = a.to_hex();
        let d = doc! { "owner": a, "friends": [ObjectId::new(), a], "legacy": hex.clone() };
        assert!(matches(&d, &filter(&[("owner", hex.as_str())])));
        assert!(matches(&d, &filter(&[("friends", hex.as_str())])));
        assert!(matches(&d, &filter(&[("legacy", hex.as_str())])));
    }

    #[test]
    fn regex_and_ranges() {
        let d = doc! { "name": "Alice", "tags": ["red", "Blue"], "age": 30 };
        assert!(matches(&d, &filter(&[("name", "lic")])));
        assert!(matches(&d, &filter(&[("tags", "blu")])));
        assert!(matches(&d, &filter(&[("age", r#"{"$gte": 30, "$lt": 31}"#)])));
        assert!(!matches(&d, &filter(&[("age", r#"{"$gt": "20"}"#)])));
        assert!(matches(&d, &filter(&[("missing", r#"{"$exists": false}"#)])));
        assert!(matches(&d, &filter(&[("tags", r#"{"$size": 2}"#)])));
        assert!(matches(&d, &filter(&[("age", r#"{"$nin": [1, 2]}"#)])));
    }

    #[test]
    fn empty_value_requires_string_field() {
        let f = filter(&[("name", "")]);
        assert!(matches(&doc! { "name": "" }, &f));
        assert!(!matches(&doc! { "name": 5 }, &f));
        assert!(!matches(&doc! {}, &f));
    }

    #[test]
    fn logical_groups() {
        let f = filter(&[("__operator", r#"{"$or": [{"a": 1}, {"b": 2}]}"#)]);
        assert!(matches(&doc! { "b": 2 }, &f));
        assert!(!matches(&doc! { "a": 2 }, &f));
        let f = filter(&[("__operator", r#"{"$nor": [{"a": 1}]}"#)]);
        assert!(matches(&doc! { "a": 2 }, &f));
    }

    #[test]
    fn where_matches_any_top_level_string() {
        let d = doc! { "city": "Oslo", "n": 1 };
        assert!(matches_where(&d, "Oslo"));
        assert!(!matches_where(&d, "1"));
    }

    #[test]
    fn sort_and_project() {
        let a = doc! { "_id": 1, "n": 1, "x": "a" };
        let b = doc! { "_id": 2, "n": 2 };
        assert_eq!(compare_docs(&a, &b, &[SortSpec::desc("n")]), Ordering::Greater);
        let p = project_fields(&a, &["x".to_string()], false);
        assert_eq!(p, doc! { "_id": 1, "x": "a" });
    }
}
