use thiserror::Error;

/// Failures while turning raw request parameters into a `CompiledQuery`.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed JSON in `{param}`: {source}")]
    MalformedJson {
        param: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "Geospatial index not found on `{0}`: $nearSphere requires a 2dsphere index on a GeoJSON point field"
    )]
    MissingGeoIndex(String),

    #[error("Invalid value for `{param}`: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Unsupported aggregate stage: {0}")]
    UnsupportedStage(String),

    #[error("Invalid pattern for `{field}`: {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
}

impl QueryError {
    pub(crate) fn invalid(param: &str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter { param: param.to_string(), reason: reason.into() }
    }
}

/// Failures reported by a `DocumentStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("Duplicate _id {id} in {collection}")]
    Conflict { collection: String, id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Store rejected operation: {0}")]
    Rejected(String),
}

/// Errors returned to callers of the resource operations.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Collection has no schema: {0}")]
    UnknownCollection(String),

    #[error("{collection}.{field} references unknown collection `{related}`")]
    UnknownRelatedCollection { collection: String, field: String, related: String },

    #[error("Resource not found.")]
    NotFound,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("No tokio runtime available to dispatch relationship updates")]
    NoRuntime,
}

impl ResourceError {
    /// HTTP-equivalent status code for the error.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Query(_) | Self::InvalidPayload(_) => 400,
            Self::NotFound => 404,
            Self::UnknownCollection(_)
            | Self::UnknownRelatedCollection { .. }
            | Self::Store(_)
            | Self::NoRuntime => 500,
        }
    }
}

/// Failures while loading configuration or schema files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Duplicate schema for collection `{0}`")]
    DuplicateCollection(String),
}
