//! Per-run statistics.

use crate::applier::UpdateReport;
use crate::matcher::MatchOutcome;
use serde::{Deserialize, Serialize};

/// Counters accumulated across the stages of one run.
///
/// Each stage overwrites its own fields. Running the update stage twice
/// replaces the update counters rather than adding to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatistics {
    pub stores_discovered: usize,
    pub total_items: usize,
    pub items_with_tags: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub conflicts: usize,
    pub conflicts_resolved: usize,
    pub conflicts_pending: usize,
    pub successful_updates: usize,
    pub failed_updates: usize,
    pub stores_touched: Vec<String>,
    pub dry_run: bool,
}

impl RunStatistics {
    pub(crate) fn record_matching(&mut self, outcome: &MatchOutcome) {
        self.matched = outcome.matched.len();
        self.unmatched = outcome.unmatched.len();
        self.conflicts = outcome.conflicts.len();
        self.conflicts_resolved = 0;
        self.conflicts_pending = outcome.conflicts.len();
    }

    pub(crate) fn record_update(&mut self, report: &UpdateReport) {
        self.successful_updates = report.successful;
        self.failed_updates = report.failed;
        self.stores_touched = report.stores_touched.clone();
        self.dry_run = report.dry_run;
    }

    /// Items that carried no collection label at all.
    pub fn items_without_tags(&self) -> usize {
        self.total_items.saturating_sub(self.items_with_tags)
    }
}
