//! Configuration management for the sync tool.

use shelfsync_engine::{ColumnPlan, ColumnSpec};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// What to do with conflicts when no resolutions file answers them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave them pending and write them out for later resolution
    #[default]
    Defer,
    /// Skip all of them for this run
    Skip,
}

/// Configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Kobo database (`KoboReader.sqlite`)
    pub kobo_db_path: PathBuf,
    /// Roots walked for Calibre libraries
    pub search_paths: Vec<PathBuf>,
    /// A library whose name contains this (case-insensitive) is primary
    pub primary_marker: String,
    /// Explicit `calibredb` executable; detected when unset
    pub calibredb_path: Option<PathBuf>,
    /// Bound on each mutating `calibredb` call
    pub calibredb_timeout: Duration,
    pub backup_dir: PathBuf,
    pub report_dir: PathBuf,
    pub dry_run: bool,
    pub conflict_policy: ConflictPolicy,
    /// JSON list of resolution decisions to apply before updating
    pub resolutions_file: Option<PathBuf>,
    pub columns: ColumnPlan,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let kobo_db_path = var("KOBO_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("KoboReader.sqlite"));

        let search_paths = match var("LIBRARY_SEARCH_PATHS") {
            Some(paths) => env::split_paths(&paths).collect(),
            None => vec![PathBuf::from(".")],
        };

        let primary_marker = var("PRIMARY_LIBRARY").unwrap_or_else(|| "mcr".to_string());

        let calibredb_path = var("CALIBREDB_PATH").map(PathBuf::from);

        let calibredb_timeout = match var("CALIBREDB_TIMEOUT_SECS") {
            Some(secs) => secs
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::InvalidTimeout(secs))?,
            None => Duration::from_secs(30),
        };

        let backup_dir = var("BACKUP_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("backups"));

        let report_dir = var("REPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("logs"));

        let dry_run = match var("DRY_RUN") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::InvalidBool {
                var: "DRY_RUN",
                value,
            })?,
            None => true,
        };

        let conflict_policy = match var("CONFLICT_POLICY").as_deref().map(str::trim) {
            None => ConflictPolicy::Defer,
            Some(p) if p.eq_ignore_ascii_case("defer") => ConflictPolicy::Defer,
            Some(p) if p.eq_ignore_ascii_case("skip") => ConflictPolicy::Skip,
            Some(other) => return Err(ConfigError::InvalidConflictPolicy(other.to_string())),
        };

        let resolutions_file = var("RESOLUTIONS_FILE").map(PathBuf::from);

        let defaults = ColumnPlan::default();
        let columns = ColumnPlan {
            ratings: ColumnSpec::new(
                var("RATINGS_COLUMN").unwrap_or(defaults.ratings.label),
                defaults.ratings.display_name,
            ),
            genres: ColumnSpec::new(
                var("GENRES_COLUMN").unwrap_or(defaults.genres.label),
                defaults.genres.display_name,
            ),
        };
        if columns.ratings.label == columns.genres.label {
            return Err(ConfigError::DuplicateColumn(columns.ratings.label));
        }

        Ok(Self {
            kobo_db_path,
            search_paths,
            primary_marker,
            calibredb_path,
            calibredb_timeout,
            backup_dir,
            report_dir,
            dry_run,
            conflict_policy,
            resolutions_file,
            columns,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {var} value: {value}")]
    InvalidBool { var: &'static str, value: String },

    #[error("Invalid CALIBREDB_TIMEOUT_SECS value: {0}")]
    InvalidTimeout(String),

    #[error("Invalid CONFLICT_POLICY value: {0} (expected 'defer' or 'skip')")]
    InvalidConflictPolicy(String),

    #[error("RATINGS_COLUMN and GENRES_COLUMN must differ, both are '{0}'")]
    DuplicateColumn(String),
}
