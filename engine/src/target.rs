//! Target-side types: Calibre libraries and their book records.

use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A target metadata store (one Calibre library).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetStore {
    /// Display name (library directory name)
    pub name: String,
    /// Library directory
    pub path: PathBuf,
    /// The persisted database file (`metadata.db`)
    pub db_path: PathBuf,
    /// Searched first; a hit here suppresses all other stores
    pub is_primary: bool,
}

impl TargetStore {
    /// Create a secondary store whose database lives at `<path>/metadata.db`.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: name.into(),
            db_path: path.join("metadata.db"),
            path,
            is_primary: false,
        }
    }

    /// Mark this store as primary.
    pub fn primary(mut self) -> Self {
        self.is_primary = true;
        self
    }
}

/// A book record read from a target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRecord {
    pub id: RecordId,
    pub title: String,
    /// All authors joined by the store (Calibre uses " & ")
    pub authors: String,
}

impl TargetRecord {
    pub fn new(id: RecordId, title: impl Into<String>, authors: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            authors: authors.into(),
        }
    }
}

/// A custom column as listed by a target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomColumn {
    /// Lookup label without the leading `#`
    pub label: String,
    pub display_name: String,
}
