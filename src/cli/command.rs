use std::path::PathBuf;

/// Programmatic CLI commands; each maps onto one resource operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search {
        collection: String,
        params: Vec<(String, String)>,
    },
    Create {
        collection: String,
        payload: String,
        // None falls back to the configured default
        relate: Option<bool>,
    },
    Read {
        collection: String,
        id: String,
        populate: Option<String>,
    },
    Update {
        collection: String,
        id: String,
        payload: String,
    },
    Delete {
        collection: String,
        id: String,
        relate: Option<bool>,
    },
    Relationships {
        collection: String,
    },
    Import {
        collection: String,
        file: PathBuf,
    },
    Export {
        collection: String,
        file: PathBuf,
    },
    Collections,
    Metrics,
}

impl Command {
    /// Whether the command changes stored data and must be written back.
    #[must_use]
    pub fn mutates(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Update { .. } | Self::Delete { .. } | Self::Import { .. }
        )
    }
}
