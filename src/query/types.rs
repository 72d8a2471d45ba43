use bson::Bson;
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prefix marking a control parameter.
pub const CONTROL_PREFIX: &str = "__";
/// Page size applied when `__limit` is absent.
pub const DEFAULT_LIMIT: usize = 500;

// Safety limits to prevent resource abuse
pub(crate) const MAX_IN_SET: usize = 1000;
pub(crate) const MAX_SORT_FIELDS: usize = 8;
pub(crate) const MAX_PIPELINE_STAGES: usize = 32;
pub(crate) const MAX_LOGICAL_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub order: Order,
}

impl SortSpec {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Asc }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self { field: field.into(), order: Order::Desc }
    }
}

/// A compiled regular expression that keeps its source for inspection.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    case_insensitive: bool,
    regex: regex::Regex,
}

impl Pattern {
    /// # Errors
    /// Returns an error if `source` is not a valid regular expression.
    pub fn new(source: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let regex = regex::RegexBuilder::new(source)
            .case_insensitive(case_insensitive)
            .size_limit(1 << 20)
            .build()?;
        Ok(Self { source: source.to_string(), case_insensitive, regex })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_case_insensitive(&self) -> bool {
        self.case_insensitive
    }

    #[must_use]
    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.case_insensitive == other.case_insensitive
    }
}

/// Proximity search on a spherical surface. Distances are in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearSphere {
    pub longitude: f64,
    pub latitude: f64,
    pub max_distance: Option<f64>,
}

/// A single store-native operator, e.g. `{"$gt": 5}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Bson),
    Ne(Bson),
    Gt(Bson),
    Gte(Bson),
    Lt(Bson),
    Lte(Bson),
    In(Vec<Bson>),
    Nin(Vec<Bson>),
    Exists(bool),
    Regex(Pattern),
    All(Vec<Bson>),
    Size(usize),
}

impl Condition {
    #[must_use]
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Eq(_) => "$eq",
            Self::Ne(_) => "$ne",
            Self::Gt(_) => "$gt",
            Self::Gte(_) => "$gte",
            Self::Lt(_) => "$lt",
            Self::Lte(_) => "$lte",
            Self::In(_) => "$in",
            Self::Nin(_) => "$nin",
            Self::Exists(_) => "$exists",
            Self::Regex(_) => "$regex",
            Self::All(_) => "$all",
            Self::Size(_) => "$size",
        }
    }
}

/// What a single field must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Exact scalar or document match.
    Exact(Bson),
    /// Document identifier match.
    Id(ObjectId),
    /// Case-insensitive substring match.
    Regex(Pattern),
    /// Store-native operators, all of which must hold.
    Range(Vec<Condition>),
    Near(NearSphere),
}

impl Predicate {
    /// Overlays `other` onto `self`. Two operator sets merge per operator with `other`
    /// winning; any other combination is replaced by `other`.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        match (self, other) {
            (Self::Range(mut base), Self::Range(overlay)) => {
                for cond in overlay {
                    base.retain(|c| c.operator() != cond.operator());
                    base.push(cond);
                }
                Self::Range(base)
            }
            (_, other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nor,
}

/// Field predicates (all must hold) plus top-level logical groups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub fields: BTreeMap<String, Predicate>,
    pub logical: Vec<(LogicalOp, Vec<FilterSet>)>,
}

impl FilterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, predicate: Predicate) {
        self.fields.insert(field.into(), predicate);
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Predicate> {
        self.fields.get(field)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.logical.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// The proximity predicate, if any field carries one.
    #[must_use]
    pub fn near(&self) -> Option<(&str, &NearSphere)> {
        self.fields.iter().find_map(|(k, p)| match p {
            Predicate::Near(n) => Some((k.as_str(), n)),
            _ => None,
        })
    }
}

/// Argument of a `$sum` accumulator.
#[derive(Debug, Clone, PartialEq)]
pub enum SumArg {
    Constant(f64),
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(SumArg),
    Avg(String),
    Min(String),
    Max(String),
    Push(String),
    AddToSet(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    /// Field to group by; `None` groups everything into one bucket.
    pub key: Option<String>,
    pub accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(FilterSet),
    Group(GroupStage),
    Sort(Vec<SortSpec>),
    Skip(usize),
    Limit(usize),
    Project { fields: Vec<String>, exclude_id: bool },
    Count(String),
}

/// Structured, store-agnostic form of a search request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub filter: FilterSet,
    pub count: bool,
    /// Zero means unlimited.
    pub limit: usize,
    pub skip: usize,
    pub sort: Vec<SortSpec>,
    pub populate: Vec<String>,
    pub distinct: Option<String>,
    pub aggregate: Option<Vec<Stage>>,
    /// Matches documents where any top-level field equals this value.
    pub where_value: Option<String>,
}

impl Default for CompiledQuery {
    fn default() -> Self {
        Self {
            filter: FilterSet::default(),
            count: false,
            limit: DEFAULT_LIMIT,
            skip: 0,
            sort: Vec::new(),
            populate: Vec::new(),
            distinct: None,
            aggregate: None,
            where_value: None,
        }
    }
}

impl CompiledQuery {
    /// A query matching `filter` with default modifiers.
    #[must_use]
    pub fn with_filter(filter: FilterSet) -> Self {
        Self { filter, ..Self::default() }
    }
}
