//! Layered application configuration.
//!
//! Precedence: CLI > env > config files > defaults. The CLI layer is applied by the
//! binary through [`AppConfig::merge`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::errors::ConfigError;

pub const CONFIG_FILE_NAME: &str = "resourcekit.toml";
pub const DEFAULT_SCHEMA_PATH: &str = "schema.toml";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub schema_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub log_retention: Option<u32>,
    pub default_relate: Option<bool>,
}

impl AppConfig {
    /// Fills every unset field of `self` from `lower`.
    #[must_use]
    pub fn merge(self, lower: Self) -> Self {
        Self {
            schema_path: self.schema_path.or(lower.schema_path),
            data_dir: self.data_dir.or(lower.data_dir),
            log_dir: self.log_dir.or(lower.log_dir),
            log_level: self.log_level.or(lower.log_level),
            log_retention: self.log_retention.or(lower.log_retention),
            default_relate: self.default_relate.or(lower.default_relate),
        }
    }

    #[must_use]
    pub fn schema_path(&self) -> PathBuf {
        self.schema_path.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_SCHEMA_PATH))
    }

    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    #[must_use]
    pub fn default_relate(&self) -> bool {
        self.default_relate.unwrap_or(false)
    }

    /// # Errors
    /// `Io` if the file cannot be read, `Toml` if it does not parse.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        Ok(toml::from_str(&s)?)
    }

    /// Values taken from `RESOURCEKIT_*` variables through `var`.
    #[must_use]
    pub fn from_env_with(var: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            schema_path: var("RESOURCEKIT_SCHEMA").map(PathBuf::from),
            data_dir: var("RESOURCEKIT_DATA_DIR").map(PathBuf::from),
            log_dir: var("RESOURCEKIT_LOG_DIR").map(PathBuf::from),
            log_level: var("RESOURCEKIT_LOG_LEVEL"),
            log_retention: var("RESOURCEKIT_LOG_RETENTION").and_then(|s| s.parse().ok()),
            default_relate: var("RESOURCEKIT_RELATE")
                .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes")),
        }
    }
}

/// Candidate config files in precedence order: explicit path, `RESOURCEKIT_CONFIG`,
/// the working directory, then the user config directory.
#[must_use]
pub fn config_paths(explicit: Option<&Path>, var: &impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if let Some(p) = explicit {
        paths.push(p.to_path_buf());
    }
    if let Some(p) = var("RESOURCEKIT_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Ok(cur) = std::env::current_dir() {
        paths.push(cur.join(CONFIG_FILE_NAME));
    }
    if let Some(dir) = dirs_next::config_dir() {
        paths.push(dir.join(CONFIG_FILE_NAME));
    }
    paths
}

/// Resolves env and config-file layers using `var` for environment lookups.
///
/// # Errors
/// An explicit path that cannot be read, or any existing file that fails to parse.
pub fn load_with(explicit: Option<&Path>, var: impl Fn(&str) -> Option<String>) -> Result<AppConfig, ConfigError> {
    let mut cfg = AppConfig::from_env_with(&var);
    if let Some(p) = explicit
        && !p.exists()
    {
        return Err(ConfigError::Io {
            path: p.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    }
    for path in config_paths(explicit, &var) {
        if path.exists() {
            log::debug!("reading config {}", path.display());
            cfg = cfg.merge(AppConfig::from_file(&path)?);
        }
    }
    Ok(cfg)
}

/// [`load_with`] against the process environment.
///
/// # Errors
/// As [`load_with`].
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    load_with(explicit, |k| std::env::var(k).ok())
}
