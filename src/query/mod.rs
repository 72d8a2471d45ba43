//! Query translation: raw string parameters into a `CompiledQuery`.

// Submodules for separation of concerns
mod compile;
pub mod geo;
mod infer;
mod parse;
mod pipeline;
mod types;

// Public API re-exports
pub use compile::{CONTROL_KEYS, compile};
pub use infer::{infer, like_pattern, parse_boolean, parse_number, parse_object_id};
pub use parse::{bson_to_json, is_json_literal, json_object_to_document, json_to_bson};
pub use pipeline::parse_pipeline;
pub use types::{
    Accumulator, CONTROL_PREFIX, CompiledQuery, Condition, DEFAULT_LIMIT, FilterSet, GroupStage,
    LogicalOp, NearSphere, Order, Pattern, Predicate, SortSpec, Stage, SumArg,
};
pub(crate) use types::{MAX_IN_SET, MAX_SORT_FIELDS};
