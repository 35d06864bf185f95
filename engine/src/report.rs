//! Report text for the end of a run.
//!
//! The engine only renders text; the caller decides where it goes. File
//! names embed the run's timestamp, which is passed in so rendering stays
//! deterministic.

use crate::stats::RunStatistics;
use crate::{SourceItem, TargetStore};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const PREVIEW_ITEMS: usize = 5;
const PREVIEW_LABELS: usize = 3;

/// Timestamp fragment used in backup and report file names.
pub fn file_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// `unmatched_books_<timestamp>.txt`
pub fn unmatched_file_name(at: NaiveDateTime) -> String {
    format!("unmatched_books_{}.txt", file_timestamp(at))
}

/// `conflicts_<timestamp>.json`
pub fn conflicts_file_name(at: NaiveDateTime) -> String {
    format!("conflicts_{}.json", file_timestamp(at))
}

/// `<store>_metadata_<timestamp>.db`
pub fn backup_file_name(store: &str, at: NaiveDateTime) -> String {
    format!("{}_metadata_{}.db", store, file_timestamp(at))
}

/// Detailed listing of unmatched items that carried labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedReport {
    pub file_name: String,
    pub contents: String,
    /// Short text for display next to the summary
    pub preview: String,
    pub with_tags: usize,
    pub without_tags: usize,
}

/// Everything `generate_reports` produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reports {
    pub summary: String,
    /// `None` when every labelled item was matched
    pub unmatched: Option<UnmatchedReport>,
}

/// Render the run summary.
pub fn summary(stats: &RunStatistics, stores: &[TargetStore]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Kobo-to-Calibre Sync Summary");
    let _ = writeln!(out, "============================");
    let _ = writeln!(out);
    let _ = writeln!(out, "Libraries discovered: {}", stats.stores_discovered);
    let _ = writeln!(out, "Kobo books processed: {}", stats.total_items);
    let _ = writeln!(out, "Books with collections: {}", stats.items_with_tags);
    let _ = writeln!(out, "Books matched: {}", stats.matched);
    let _ = writeln!(out, "Books unmatched: {}", stats.unmatched);
    let _ = writeln!(
        out,
        "Conflicts: {} ({} resolved, {} pending)",
        stats.conflicts, stats.conflicts_resolved, stats.conflicts_pending
    );
    let _ = writeln!(
        out,
        "Updates{}: {} successful, {} failed",
        if stats.dry_run { " (dry run)" } else { "" },
        stats.successful_updates,
        stats.failed_updates
    );
    if !stats.stores_touched.is_empty() {
        let _ = writeln!(out, "Libraries updated: {}", stats.stores_touched.join(", "));
    }

    if !stores.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Libraries:");
        for store in stores {
            let primary = if store.is_primary { " (PRIMARY)" } else { "" };
            let _ = writeln!(out, "  • {}{}: {}", store.name, primary, store.path.display());
        }
    }
    out
}

/// Render the unmatched report, or `None` if no unmatched item had labels.
///
/// Items without labels are only counted; they were never expected to
/// carry anything over.
pub fn unmatched(items: &[SourceItem], generated_at: NaiveDateTime) -> Option<UnmatchedReport> {
    let tagged: Vec<&SourceItem> = items.iter().filter(|i| i.has_tags()).collect();
    if tagged.is_empty() {
        return None;
    }
    let without_tags = items.len() - tagged.len();
    let file_name = unmatched_file_name(generated_at);

    let mut contents = String::new();
    let _ = writeln!(contents, "Books with Collections - No Match Found");
    let _ = writeln!(contents, "======================================");
    let _ = writeln!(
        contents,
        "Generated: {}",
        generated_at.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(contents, "Books with collections but no match: {}", tagged.len());
    let _ = writeln!(contents, "Total unmatched books: {}", items.len());
    let _ = writeln!(contents, "Books without collections (expected): {without_tags}");
    let _ = writeln!(contents);
    let _ = writeln!(contents, "Detailed Analysis:");
    let _ = writeln!(contents, "{}", "=".repeat(60));
    let _ = writeln!(contents);

    for (n, item) in tagged.iter().enumerate() {
        let _ = writeln!(contents, "{:3}. Title: {}", n + 1, item.title);
        let _ = writeln!(contents, "     Author: {}", item.author);
        let _ = writeln!(contents, "     Collections: {}", item.tags.join(", "));
        let _ = writeln!(contents, "     Read Status: {}", item.read_status);
        let _ = writeln!(contents, "     Progress: {}%", item.percent_read);
        if let Some(last_read) = &item.last_read {
            let _ = writeln!(contents, "     Last Read: {last_read}");
        }
        let _ = writeln!(contents, "{}", "-".repeat(70));
        let _ = writeln!(contents);
    }

    let mut preview = String::new();
    let _ = writeln!(
        preview,
        "Found {} books with collections that need investigation.",
        tagged.len()
    );
    let _ = writeln!(
        preview,
        "({without_tags} books without collections were excluded as expected.)"
    );
    for item in tagged.iter().take(PREVIEW_ITEMS) {
        let mut labels = item
            .tags
            .iter()
            .take(PREVIEW_LABELS)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if item.tags.len() > PREVIEW_LABELS {
            let _ = write!(labels, " (+{} more)", item.tags.len() - PREVIEW_LABELS);
        }
        let _ = writeln!(preview, "  • '{}' by {} [{}]", item.title, item.author, labels);
    }
    if tagged.len() > PREVIEW_ITEMS {
        let _ = writeln!(
            preview,
            "  ... and {} more (see {})",
            tagged.len() - PREVIEW_ITEMS,
            file_name
        );
    }

    Some(UnmatchedReport {
        file_name,
        contents,
        preview,
        with_tags: tagged.len(),
        without_tags,
    })
}
