//! Update application: writing classified labels into target stores.
//!
//! # Algorithm
//!
//! 1. Partition matches by target store, keeping first-seen order
//! 2. Per store, sequentially:
//!    a. probe connectivity
//!    b. back up the store's database file
//!    c. ensure the ratings and genres columns exist
//!    d. write both fields for every match
//! 3. Any failure in a-c fails the whole partition and moves on to the
//!    next store. A failed match never affects its siblings.
//!
//! In dry-run mode only the read-only checks of a and c run. Nothing is
//! backed up or written and every match is counted as successful.

use crate::error::{Error, Result};
use crate::labels;
use crate::matcher::Match;
use crate::target::CustomColumn;
use crate::TargetStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

/// Mutating and probing access to target stores.
pub trait StoreWriter: Send + Sync {
    /// Trivial read that fails when the store cannot be opened for writing.
    fn probe(&self, store: &TargetStore) -> impl Future<Output = Result<()>> + Send;

    /// Copy the store's database file aside. Returns the backup path.
    fn backup(&self, store: &TargetStore) -> impl Future<Output = Result<PathBuf>> + Send;

    /// Custom columns currently defined in the store.
    fn list_columns(
        &self,
        store: &TargetStore,
    ) -> impl Future<Output = Result<Vec<CustomColumn>>> + Send;

    /// Create a multi-valued text column. Reports
    /// [`Error::ColumnAlreadyExists`] when the column is already there.
    fn add_column(
        &self,
        store: &TargetStore,
        column: &ColumnSpec,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Overwrite one field of one record with `value`.
    fn set_field(
        &self,
        store: &TargetStore,
        record_id: crate::RecordId,
        column: &ColumnSpec,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// A classification column: lookup label plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSpec {
    pub label: String,
    pub display_name: String,
}

impl ColumnSpec {
    pub fn new(label: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            display_name: display_name.into(),
        }
    }
}

/// The two columns labels are written into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnPlan {
    pub ratings: ColumnSpec,
    pub genres: ColumnSpec,
}

impl Default for ColumnPlan {
    fn default() -> Self {
        Self {
            ratings: ColumnSpec::new("myratings", "My Ratings"),
            genres: ColumnSpec::new("my_genres", "My Genres"),
        }
    }
}

impl ColumnPlan {
    fn columns(&self) -> [&ColumnSpec; 2] {
        [&self.ratings, &self.genres]
    }
}

/// Whether the update stage writes or only previews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyMode {
    /// Read-only preview
    #[default]
    DryRun,
    /// Back up and write
    Live,
}

impl ApplyMode {
    pub fn is_dry_run(self) -> bool {
        self == ApplyMode::DryRun
    }
}

/// What happened to one store's partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum StoreStatus {
    /// Writes were attempted
    Updated {
        backup: PathBuf,
        created_columns: Vec<String>,
    },
    /// The partition failed before any record was written
    Skipped { error: Error },
    /// Dry run: what a live run would find
    Preview {
        probe_error: Option<Error>,
        missing_columns: Vec<String>,
    },
}

/// Per-store result of the update stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOutcome {
    pub store: String,
    pub matches: usize,
    pub successful: usize,
    pub failed: usize,
    pub status: StoreStatus,
}

/// A match whose field writes failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFailure {
    pub store: String,
    pub item_title: String,
    pub record_id: crate::RecordId,
    pub error: Error,
}

/// Aggregate result of one update stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Stores mutated (or, in a dry run, that would be), in processing order
    pub stores_touched: Vec<String>,
    pub dry_run: bool,
    pub stores: Vec<StoreOutcome>,
    pub failures: Vec<MatchFailure>,
}

impl UpdateReport {
    fn touch(&mut self, store: &str) {
        if !self.stores_touched.iter().any(|s| s == store) {
            self.stores_touched.push(store.to_string());
        }
    }
}

/// Partition matches by store, preserving the order stores are first seen.
pub fn partition_by_store(matches: &[Match]) -> Vec<(TargetStore, Vec<&Match>)> {
    let mut index: HashMap<&PathBuf, usize> = HashMap::new();
    let mut partitions: Vec<(TargetStore, Vec<&Match>)> = Vec::new();

    for m in matches {
        match index.get(&m.store.path) {
            Some(&i) => partitions[i].1.push(m),
            None => {
                index.insert(&m.store.path, partitions.len());
                partitions.push((m.store.clone(), vec![m]));
            }
        }
    }

    partitions
}

/// Applies confirmed matches to target stores.
pub struct UpdateApplier<'a, W> {
    writer: &'a W,
    columns: ColumnPlan,
}

impl<'a, W: StoreWriter> UpdateApplier<'a, W> {
    pub fn new(writer: &'a W, columns: ColumnPlan) -> Self {
        Self { writer, columns }
    }

    /// Run the update stage over `matches`.
    pub async fn apply(&self, matches: &[Match], mode: ApplyMode) -> UpdateReport {
        let mut report = UpdateReport {
            total: matches.len(),
            dry_run: mode.is_dry_run(),
            ..UpdateReport::default()
        };

        if mode.is_dry_run() {
            tracing::info!("Dry run: no backups are taken and no store is modified");
        }

        for (store, partition) in partition_by_store(matches) {
            tracing::info!("Updating {} records in {}", partition.len(), store.name);
            let outcome = match mode {
                ApplyMode::DryRun => self.preview_store(&store, &partition, &mut report).await,
                ApplyMode::Live => self.update_store(&store, &partition, &mut report).await,
            };
            report.successful += outcome.successful;
            report.failed += outcome.failed;
            report.stores.push(outcome);
        }

        tracing::info!(
            "Update complete: {} successful, {} failed, stores touched: {}",
            report.successful,
            report.failed,
            report.stores_touched.join(", ")
        );
        report
    }

    async fn update_store(
        &self,
        store: &TargetStore,
        partition: &[&Match],
        report: &mut UpdateReport,
    ) -> StoreOutcome {
        let skipped = |error: Error| {
            tracing::error!("Skipping {}: {}", store.name, error);
            StoreOutcome {
                store: store.name.clone(),
                matches: partition.len(),
                successful: 0,
                failed: partition.len(),
                status: StoreStatus::Skipped { error },
            }
        };

        if let Err(e) = self.writer.probe(store).await {
            return skipped(e);
        }

        let backup = match self.writer.backup(store).await {
            Ok(path) => path,
            Err(e) => return skipped(e),
        };
        tracing::info!("Created backup: {}", backup.display());

        let created_columns = match self.provision_columns(store).await {
            Ok(created) => created,
            Err(e) => return skipped(e),
        };
        if !created_columns.is_empty() {
            report.touch(&store.name);
        }

        let mut successful = 0;
        let mut failed = 0;
        for m in partition {
            match self.update_match(m).await {
                Ok(wrote) => {
                    successful += 1;
                    if wrote {
                        report.touch(&store.name);
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        "Failed to update '{}' (record {}) in {}: {}",
                        m.item.title,
                        m.record_id,
                        store.name,
                        error
                    );
                    failed += 1;
                    report.failures.push(MatchFailure {
                        store: store.name.clone(),
                        item_title: m.item.title.clone(),
                        record_id: m.record_id,
                        error,
                    });
                }
            }
        }

        StoreOutcome {
            store: store.name.clone(),
            matches: partition.len(),
            successful,
            failed,
            status: StoreStatus::Updated {
                backup,
                created_columns,
            },
        }
    }

    async fn preview_store(
        &self,
        store: &TargetStore,
        partition: &[&Match],
        report: &mut UpdateReport,
    ) -> StoreOutcome {
        let probe_error = self.writer.probe(store).await.err();
        if let Some(e) = &probe_error {
            tracing::warn!("A live run would skip {}: {}", store.name, e);
        }

        let missing_columns = match self.writer.list_columns(store).await {
            Ok(existing) => self.missing_columns(&existing),
            Err(e) => {
                tracing::warn!("Could not list columns of {}: {}", store.name, e);
                self.columns
                    .columns()
                    .iter()
                    .map(|c| c.label.clone())
                    .collect()
            }
        };

        tracing::info!("Would update {} records in {}:", partition.len(), store.name);
        for m in partition.iter().take(5) {
            let classification = labels::classify(&m.item.tags);
            tracing::info!("  '{}' by {}", m.item.title, m.item.author);
            if let Some(ratings) = classification.ratings_value() {
                tracing::info!("    {}: {}", self.columns.ratings.display_name, ratings);
            }
            if let Some(genres) = classification.genres_value() {
                tracing::info!("    {}: {}", self.columns.genres.display_name, genres);
            }
        }
        if partition.len() > 5 {
            tracing::info!("  ... and {} more", partition.len() - 5);
        }

        report.touch(&store.name);
        StoreOutcome {
            store: store.name.clone(),
            matches: partition.len(),
            successful: partition.len(),
            failed: 0,
            status: StoreStatus::Preview {
                probe_error,
                missing_columns,
            },
        }
    }

    /// Ensure both classification columns exist. Returns the labels created.
    ///
    /// Safe to call repeatedly: existing columns are left alone and an
    /// "already exists" answer from the store counts as success.
    pub async fn provision_columns(&self, store: &TargetStore) -> Result<Vec<String>> {
        let missing = match self.writer.list_columns(store).await {
            Ok(existing) => self.missing_columns(&existing),
            Err(e) => {
                tracing::warn!(
                    "Could not list columns of {}, creating both: {}",
                    store.name,
                    e
                );
                self.columns
                    .columns()
                    .iter()
                    .map(|c| c.label.clone())
                    .collect()
            }
        };

        let mut created = Vec::new();
        for column in self.columns.columns() {
            if !missing.contains(&column.label) {
                tracing::debug!("Column '{}' already exists in {}", column.label, store.name);
                continue;
            }
            tracing::info!(
                "Creating column '{}' ({}) in {}",
                column.label,
                column.display_name,
                store.name
            );
            match self.writer.add_column(store, column).await {
                Ok(()) => created.push(column.label.clone()),
                Err(Error::ColumnAlreadyExists { .. }) => {
                    tracing::info!("Column '{}' already exists in {}", column.label, store.name);
                }
                Err(e @ Error::ColumnProvisionFailed { .. }) => return Err(e),
                Err(e) => {
                    return Err(Error::ColumnProvisionFailed {
                        store: store.name.clone(),
                        column: column.label.clone(),
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(created)
    }

    /// Write both fields of one match. Returns whether any call was issued.
    async fn update_match(&self, m: &Match) -> Result<bool> {
        let classification = labels::classify(&m.item.tags);
        let mut wrote = false;

        let fields = [
            (&self.columns.ratings, classification.ratings_value()),
            (&self.columns.genres, classification.genres_value()),
        ];
        for (column, value) in fields {
            let Some(value) = value else {
                continue;
            };
            tracing::debug!(
                "Setting #{} of record {} in {} to '{}'",
                column.label,
                m.record_id,
                m.store.name,
                value
            );
            self.writer
                .set_field(&m.store, m.record_id, column, &value)
                .await?;
            wrote = true;
        }

        Ok(wrote)
    }

    fn missing_columns(&self, existing: &[CustomColumn]) -> Vec<String> {
        self.columns
            .columns()
            .iter()
            .filter(|c| !existing.iter().any(|e| e.label == c.label))
            .map(|c| c.label.clone())
            .collect()
    }
}
