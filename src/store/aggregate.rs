use bson::{Bson, Document};
use std::collections::HashMap;

use super::eval::{as_f64_num, compare_bson, compare_docs, get_path, matches, project_fields, values_equal};
use crate::query::{Accumulator, GroupStage, Stage, SumArg};

/// Runs `stages` in order over `docs`.
pub fn run_pipeline(mut docs: Vec<Document>, stages: &[Stage]) -> Vec<Document> {
    for stage in stages {
        docs = match stage {
            Stage::Match(filter) => docs.into_iter().filter(|d| matches(d, filter)).collect(),
            Stage::Group(group) => run_group(&docs, group),
            Stage::Sort(sort) => {
                docs.sort_by(|a, b| compare_docs(a, b, sort));
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Project { fields, exclude_id } => {
                docs.iter().map(|d| project_fields(d, fields, *exclude_id)).collect()
            }
            Stage::Count(name) => {
                let mut out = Document::new();
                out.insert(name.clone(), i64::try_from(docs.len()).unwrap_or(i64::MAX));
                vec![out]
            }
        };
    }
    docs
}

/// Hashable group key; numbers collapse to their f64 bits so `1` and `1.0` share a bucket.
fn key_repr(v: Option<&Bson>) -> String {
    match v {
        None | Some(Bson::Null) => "null".to_string(),
        Some(b @ (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))) => {
            format!("n:{}", as_f64_num(b).to_bits())
        }
        Some(other) => format!("{other:?}"),
    }
}

fn run_group(docs: &[Document], group: &GroupStage) -> Vec<Document> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, (Bson, Vec<&Document>)> = HashMap::new();
    for d in docs {
        let value = group.key.as_deref().and_then(|k| get_path(d, k));
        let repr = key_repr(value);
        buckets
            .entry(repr.clone())
            .or_insert_with(|| {
                order.push(repr);
                (value.cloned().unwrap_or(Bson::Null), Vec::new())
            })
            .1
            .push(d);
    }
    order
        .iter()
        .filter_map(|k| buckets.get(k))
        .map(|(key, members)| {
            let mut out = bson::doc! { "_id": key.clone() };
            for (name, acc) in &group.accumulators {
                out.insert(name.clone(), accumulate(acc, members));
            }
            out
        })
        .collect()
}

fn numbers<'a>(members: &'a [&Document], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    members
        .iter()
        .filter_map(move |d| get_path(d, field))
        .map(as_f64_num)
        .filter(|f| !f.is_nan())
}

fn accumulate(acc: &Accumulator, members: &[&Document]) -> Bson {
    match acc {
        #[allow(clippy::cast_precision_loss)]
        Accumulator::Sum(SumArg::Constant(c)) => Bson::Double(c * members.len() as f64),
        Accumulator::Sum(SumArg::Field(f)) => Bson::Double(numbers(members, f).sum()),
        Accumulator::Avg(f) => {
            let (sum, n) = numbers(members, f).fold((0.0, 0u32), |(s, n), x| (s + x, n + 1));
            if n == 0 { Bson::Null } else { Bson::Double(sum / f64::from(n)) }
        }
        Accumulator::Min(f) => members
            .iter()
            .filter_map(|d| get_path(d, f))
            .min_by(|a, b| compare_bson(a, b))
            .cloned()
            .unwrap_or(Bson::Null),
        Accumulator::Max(f) => members
            .iter()
            .filter_map(|d| get_path(d, f))
            .max_by(|a, b| compare_bson(a, b))
            .cloned()
            .unwrap_or(Bson::Null),
        Accumulator::Push(f) => {
            Bson::Array(members.iter().filter_map(|d| get_path(d, f)).cloned().collect())
        }
        Accumulator::AddToSet(f) => {
            let mut set: Vec<Bson> = Vec::new();
            for v in members.iter().filter_map(|d| get_path(d, f)) {
                if !set.iter().any(|x| values_equal(x, v)) {
                    set.push(v.clone());
                }
            }
            Bson::Array(set)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_pipeline;
    use bson::doc;

    fn books() -> Vec<Document> {
        vec![
            doc! { "author": "le guin", "pages": 300, "genre": "scifi" },
            doc! { "author": "banks", "pages": 500, "genre": "scifi" },
            doc! { "author": "le guin", "pages": 200.0, "genre": "fantasy" },
        ]
    }

    #[test]
    fn group_sum_avg_sorted() {
        let stages = parse_pipeline(
            r#"[{"$group": {"_id": "$author", "n": {"$sum": 1}, "avg": {"$avg": "$pages"},
                 "genres": {"$addToSet": "$genre"}}}, {"$sort": {"n": -1}}]"#,
        )
        .unwrap();
        let out = run_pipeline(books(), &stages);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get_str("_id").unwrap(), "le guin");
        assert_eq!(out[0].get_f64("n").unwrap(), 2.0);
        assert_eq!(out[0].get_f64("avg").unwrap(), 250.0);
        assert_eq!(out[0].get_array("genres").unwrap().len(), 2);
    }

    #[test]
    fn match_then_count() {
        let stages = parse_pipeline(r#"[{"$match": {"genre": "scifi"}}, {"$count": "total"}]"#).unwrap();
        let out = run_pipeline(books(), &stages);
        assert_eq!(out, vec![doc! { "total": 2_i64 }]);
    }

    #[test]
    fn null_group_and_max() {
        let stages =
            parse_pipeline(r#"[{"$group": {"_id": null, "max": {"$max": "$pages"}}}]"#).unwrap();
        let out = run_pipeline(books(), &stages);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("_id"), Some(&Bson::Null));
        assert_eq!(out[0].get_i32("max").unwrap(), 500);
    }
}
