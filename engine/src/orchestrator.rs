//! The sync pipeline.
//!
//! # Algorithm
//!
//! 1. Discover target stores (zero stores or several primaries is fatal)
//! 2. Load source items with their labels
//! 3. Match every item across the stores
//! 4. Expose conflicts; the caller resolves them and merges the result
//! 5. Apply the matches (live or dry run)
//! 6. Render reports
//!
//! Stages must run in that order. Calling one early fails with
//! [`Error::MissingPrerequisite`] instead of running on empty data.

use crate::applier::{ApplyMode, ColumnPlan, StoreWriter, UpdateApplier, UpdateReport};
use crate::conflict::{ConflictSet, ResolutionAction, ResolutionDecision, ResolutionRequest};
use crate::error::{Error, Result};
use crate::matcher::{self, Catalog, Match};
use crate::report::{self, Reports};
use crate::stats::RunStatistics;
use crate::{SourceCollection, SourceItem, TargetStore};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;

/// Read access to the source store.
pub trait SourceStore: Send + Sync {
    /// Every visible collection.
    fn get_collections(&self) -> impl Future<Output = Result<Vec<SourceCollection>>> + Send;

    /// Every item with its collection labels attached, ordered by title.
    fn get_items_with_tags(&self) -> impl Future<Output = Result<Vec<SourceItem>>> + Send;
}

/// Enumerates target stores.
pub trait StoreRegistry: Send + Sync {
    /// Find the stores under `search_paths`. At most one should be primary.
    fn discover(
        &self,
        search_paths: &[PathBuf],
    ) -> impl Future<Output = Result<Vec<TargetStore>>> + Send;
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Discover,
    Load,
    Match,
    Apply,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discover => "discover stores",
            Stage::Load => "load source items",
            Stage::Match => "match",
            Stage::Apply => "apply updates",
            Stage::Report => "generate reports",
        };
        f.write_str(name)
    }
}

/// Settings for one orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub search_paths: Vec<PathBuf>,
    pub columns: ColumnPlan,
}

/// Result of [`SyncOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub statistics: RunStatistics,
    pub update: UpdateReport,
    pub reports: Reports,
}

/// Drives one run over a source store, a store registry and a writer.
pub struct SyncOrchestrator<S, L, W> {
    source: S,
    libraries: L,
    writer: W,
    options: SyncOptions,

    stores: Option<Vec<TargetStore>>,
    collections: Vec<SourceCollection>,
    items: Option<Vec<SourceItem>>,
    matched: Option<Vec<Match>>,
    unmatched: Vec<SourceItem>,
    conflicts: ConflictSet,
    update: Option<UpdateReport>,
    stats: RunStatistics,
}

impl<S, L, W> SyncOrchestrator<S, L, W>
where
    S: SourceStore,
    L: StoreRegistry + Catalog,
    W: StoreWriter,
{
    pub fn new(source: S, libraries: L, writer: W, options: SyncOptions) -> Self {
        Self {
            source,
            libraries,
            writer,
            options,
            stores: None,
            collections: Vec::new(),
            items: None,
            matched: None,
            unmatched: Vec::new(),
            conflicts: ConflictSet::default(),
            update: None,
            stats: RunStatistics::default(),
        }
    }

    /// Discover target stores.
    pub async fn discover_stores(&mut self) -> Result<&[TargetStore]> {
        tracing::info!(
            "Discovering libraries in {} search path(s)",
            self.options.search_paths.len()
        );
        let stores = self.libraries.discover(&self.options.search_paths).await?;

        if stores.is_empty() {
            return Err(Error::NoTargetStores {
                searched: self.options.search_paths.len(),
            });
        }
        let primaries: Vec<String> = stores
            .iter()
            .filter(|s| s.is_primary)
            .map(|s| s.name.clone())
            .collect();
        if primaries.len() > 1 {
            return Err(Error::MultiplePrimaryStores(primaries));
        }

        tracing::info!("Discovered {} libraries", stores.len());
        for store in &stores {
            let primary = if store.is_primary { " (PRIMARY)" } else { "" };
            tracing::info!("  {}{}: {}", store.name, primary, store.path.display());
        }
        if primaries.is_empty() {
            tracing::warn!("No primary library found; every library is searched");
        }

        self.stats.stores_discovered = stores.len();
        Ok(self.stores.insert(stores).as_slice())
    }

    /// Load source items and their labels.
    pub async fn load_source_items(&mut self) -> Result<&[SourceItem]> {
        self.require(Stage::Load, Stage::Discover, self.stores.is_some())?;

        match self.source.get_collections().await {
            Ok(collections) => {
                let ratings = collections.iter().filter(|c| c.is_rating).count();
                tracing::info!(
                    "Found {} unique collections, {} of them ratings",
                    collections.len(),
                    ratings
                );
                self.collections = collections;
            }
            Err(e) => tracing::warn!("Could not read collections: {}", e),
        }

        let items = self.source.get_items_with_tags().await?;
        let with_tags = items.iter().filter(|i| i.has_tags()).count();
        tracing::info!("Loaded {} books, {} with collections", items.len(), with_tags);

        self.stats.total_items = items.len();
        self.stats.items_with_tags = with_tags;
        Ok(self.items.insert(items).as_slice())
    }

    /// Match every loaded item against the discovered stores.
    pub async fn match_items(&mut self) -> Result<&RunStatistics> {
        let (Some(stores), Some(items)) = (&self.stores, &self.items) else {
            return Err(self.missing(Stage::Match, Stage::Load));
        };

        let outcome = matcher::match_all(&self.libraries, items, stores).await;
        self.stats.record_matching(&outcome);
        self.unmatched = outcome.unmatched;
        self.conflicts = ConflictSet::new(outcome.conflicts);
        self.matched = Some(outcome.matched);
        self.update = None;
        Ok(&self.stats)
    }

    /// The conflict set of the last match stage.
    pub fn conflicts(&self) -> Result<&ConflictSet> {
        self.require(Stage::Match, Stage::Match, self.matched.is_some())?;
        Ok(&self.conflicts)
    }

    /// One request per conflict still pending.
    pub fn resolution_requests(&self) -> Result<Vec<ResolutionRequest>> {
        Ok(self.conflicts()?.requests())
    }

    /// Decide conflicts and merge the selected matches.
    ///
    /// Decisions are applied one at a time, so matches selected before a
    /// failing decision are kept. Returns the number of matches merged.
    pub fn resolve_conflicts(&mut self, decisions: &[ResolutionDecision]) -> Result<usize> {
        self.require(Stage::Match, Stage::Match, self.matched.is_some())?;

        let mut merged = 0;
        let mut result = Ok(());
        for decision in decisions {
            match self.conflicts.decide(*decision) {
                Ok(selected) => merged += self.merge(selected),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
            if decision.action == ResolutionAction::SkipAll {
                break;
            }
        }

        self.stats.conflicts_resolved = self.conflicts.resolved_count();
        self.stats.conflicts_pending = self.conflicts.pending_count();
        if merged > 0 {
            tracing::info!("Applied {} resolved matches from conflicts", merged);
        }
        result.map(|()| merged)
    }

    /// Fold externally resolved matches into the matched set.
    ///
    /// A match for an (item, store) pair already present is ignored.
    /// Returns the number added.
    pub fn merge_resolved(&mut self, matches: Vec<Match>) -> Result<usize> {
        self.require(Stage::Match, Stage::Match, self.matched.is_some())?;
        Ok(self.merge(matches))
    }

    fn merge(&mut self, matches: Vec<Match>) -> usize {
        let Some(matched) = self.matched.as_mut() else {
            return 0;
        };
        let mut seen: HashSet<(String, PathBuf)> = matched
            .iter()
            .map(|m| (m.item.id.clone(), m.store.path.clone()))
            .collect();

        let before = matched.len();
        for m in matches {
            if seen.insert((m.item.id.clone(), m.store.path.clone())) {
                matched.push(m);
            } else {
                tracing::debug!("Ignoring duplicate match for '{}' in {}", m.item.title, m.store.name);
            }
        }
        let added = matched.len() - before;
        self.stats.matched = matched.len();
        added
    }

    /// Apply the matched set. Update statistics are replaced on every call.
    pub async fn apply_updates(&mut self, mode: ApplyMode) -> Result<&UpdateReport> {
        let Some(matched) = &self.matched else {
            return Err(self.missing(Stage::Apply, Stage::Match));
        };

        let pending = self.conflicts.pending_count();
        if pending > 0 {
            tracing::info!("{} unresolved conflict(s) are excluded from this update", pending);
        }

        let applier = UpdateApplier::new(&self.writer, self.options.columns.clone());
        let report = applier.apply(matched, mode).await;
        self.stats.record_update(&report);
        Ok(&*self.update.insert(report))
    }

    /// Render the summary and unmatched reports.
    pub fn generate_reports(&self, generated_at: NaiveDateTime) -> Result<Reports> {
        self.require(Stage::Report, Stage::Apply, self.update.is_some())?;
        let stores = self.stores.as_deref().unwrap_or_default();

        let unmatched = report::unmatched(&self.unmatched, generated_at);
        match &unmatched {
            Some(r) => tracing::info!(
                "{} unmatched books with collections need investigation",
                r.with_tags
            ),
            None => tracing::info!("All books with collections were successfully matched"),
        }

        Ok(Reports {
            summary: report::summary(&self.stats, stores),
            unmatched,
        })
    }

    /// Run every stage without resolving conflicts.
    pub async fn run(&mut self, mode: ApplyMode, generated_at: NaiveDateTime) -> Result<RunOutcome> {
        tracing::info!("Starting sync (dry run: {})", mode.is_dry_run());

        self.discover_stores().await?;
        self.load_source_items().await?;
        self.match_items().await?;
        if !self.conflicts.is_empty() {
            tracing::info!("Found {} conflicts that need resolution", self.conflicts.len());
        }
        let update = self.apply_updates(mode).await?.clone();
        let reports = self.generate_reports(generated_at)?;

        tracing::info!("Sync completed");
        Ok(RunOutcome {
            statistics: self.stats.clone(),
            update,
            reports,
        })
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn stores(&self) -> &[TargetStore] {
        self.stores.as_deref().unwrap_or_default()
    }

    pub fn collections(&self) -> &[SourceCollection] {
        &self.collections
    }

    pub fn items(&self) -> &[SourceItem] {
        self.items.as_deref().unwrap_or_default()
    }

    pub fn matches(&self) -> &[Match] {
        self.matched.as_deref().unwrap_or_default()
    }

    pub fn unmatched(&self) -> &[SourceItem] {
        &self.unmatched
    }

    pub fn last_update(&self) -> Option<&UpdateReport> {
        self.update.as_ref()
    }

    fn require(&self, stage: Stage, missing: Stage, done: bool) -> Result<()> {
        if done {
            Ok(())
        } else {
            Err(self.missing(stage, missing))
        }
    }

    fn missing(&self, stage: Stage, missing: Stage) -> Error {
        // Report the earliest stage that has not run.
        let missing = if self.stores.is_none() {
            Stage::Discover
        } else if self.items.is_none() && missing > Stage::Load {
            Stage::Load
        } else {
            missing
        };
        Error::MissingPrerequisite { stage, missing }
    }
}
