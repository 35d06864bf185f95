//! Conflict files: pending requests out, decisions back in.
//!
//! Pending conflicts are written as a JSON list of resolution requests.
//! A resolutions file answers them by item id, so it stays valid across
//! runs even when conflict indices shift:
//!
//! ```json
//! [
//!   {"itemId": "file:///mnt/onboard/a.epub", "action": {"select": 1}},
//!   {"itemId": "file:///mnt/onboard/b.epub", "action": "selectAll"},
//!   {"action": "skipAll"}
//! ]
//! ```

use crate::error::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use shelfsync_engine::report::conflicts_file_name;
use shelfsync_engine::{ConflictSet, ItemId, ResolutionAction, ResolutionDecision, ResolutionRequest};
use std::path::{Path, PathBuf};

/// One line of a resolutions file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionEntry {
    /// Not needed for `skipAll`
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub action: ResolutionAction,
}

/// Read a resolutions file.
pub async fn load(path: &Path) -> Result<Vec<ResolutionEntry>> {
    let text = tokio::fs::read_to_string(path).await?;
    let entries: Vec<ResolutionEntry> = serde_json::from_str(&text)?;
    tracing::info!("Loaded {} resolution(s) from {}", entries.len(), path.display());
    Ok(entries)
}

/// Turn entries into decisions against `conflicts`.
///
/// Entries naming an item with no conflict are logged and dropped.
pub fn to_decisions(entries: &[ResolutionEntry], conflicts: &ConflictSet) -> Vec<ResolutionDecision> {
    let mut decisions = Vec::new();
    for entry in entries {
        if entry.action == ResolutionAction::SkipAll {
            decisions.push(ResolutionDecision::new(0, ResolutionAction::SkipAll));
            continue;
        }
        let Some(item_id) = &entry.item_id else {
            tracing::warn!("Ignoring resolution without itemId: {:?}", entry.action);
            continue;
        };
        match conflicts.position(item_id) {
            Some(index) => decisions.push(ResolutionDecision::new(index, entry.action)),
            None => tracing::warn!("No conflict for item {}, ignoring its resolution", item_id),
        }
    }
    decisions
}

/// Write pending requests to `conflicts_<timestamp>.json` under `dir`.
pub async fn write_pending(
    dir: &Path,
    generated_at: NaiveDateTime,
    requests: &[ResolutionRequest],
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(conflicts_file_name(generated_at));
    let json = serde_json::to_string_pretty(requests)?;
    tokio::fs::write(&path, json).await?;
    tracing::info!(
        "{} unresolved conflict(s) written to {}",
        requests.len(),
        path.display()
    );
    Ok(path)
}
