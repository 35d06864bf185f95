//! One sync run, wired from configuration.

use crate::calibredb::{self, Calibredb};
use crate::config::{ConflictPolicy, Config};
use crate::db::{CalibreLibraries, KoboDatabase};
use crate::error::{AppError, Result};
use crate::resolutions;
use chrono::{Local, NaiveDateTime};
use shelfsync_engine::{
    ApplyMode, Catalog, ResolutionAction, ResolutionDecision, RunStatistics, SourceStore,
    StoreRegistry, StoreWriter, SyncOptions, SyncOrchestrator, UpdateReport,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What a finished run hands back to `main`.
#[derive(Debug)]
pub struct SyncSummary {
    pub statistics: RunStatistics,
    pub update: UpdateReport,
    pub summary: String,
    pub unmatched_preview: Option<String>,
    pub unmatched_file: Option<PathBuf>,
    pub conflicts_file: Option<PathBuf>,
}

/// Build the collaborators from `config` and run every stage.
pub async fn run(config: Config) -> Result<SyncSummary> {
    let mode = if config.dry_run {
        ApplyMode::DryRun
    } else {
        ApplyMode::Live
    };

    let program = match calibredb::locate(config.calibredb_path.as_deref()).await {
        Some(program) => program,
        None if mode.is_dry_run() => {
            tracing::warn!("calibredb not found; the preview will report every library unreachable");
            config
                .calibredb_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("calibredb"))
        }
        None => return Err(AppError::CalibredbNotFound),
    };
    let probe_timeout = config.calibredb_timeout.min(Duration::from_secs(10));
    let writer = Calibredb::new(program, &config.backup_dir)
        .with_timeouts(probe_timeout, config.calibredb_timeout);

    let source = KoboDatabase::open(&config.kobo_db_path).await?;
    let libraries = CalibreLibraries::new(&config.primary_marker);

    run_with(&config, source, libraries, writer, mode, Local::now().naive_local()).await
}

/// Run every stage over the given collaborators.
pub async fn run_with<S, L, W>(
    config: &Config,
    source: S,
    libraries: L,
    writer: W,
    mode: ApplyMode,
    generated_at: NaiveDateTime,
) -> Result<SyncSummary>
where
    S: SourceStore,
    L: StoreRegistry + Catalog,
    W: StoreWriter,
{
    let options = SyncOptions {
        search_paths: config.search_paths.clone(),
        columns: config.columns.clone(),
    };
    let mut sync = SyncOrchestrator::new(source, libraries, writer, options);

    sync.discover_stores().await?;
    sync.load_source_items().await?;
    sync.match_items().await?;

    let conflicts_file = settle_conflicts(&mut sync, config, generated_at).await?;

    let update = sync.apply_updates(mode).await?.clone();
    let reports = sync.generate_reports(generated_at)?;

    let (unmatched_preview, unmatched_file) = match reports.unmatched {
        Some(report) => {
            let path = write_report(&config.report_dir, &report.file_name, &report.contents).await;
            (Some(report.preview), path)
        }
        None => (None, None),
    };

    Ok(SyncSummary {
        statistics: sync.statistics().clone(),
        update,
        summary: reports.summary,
        unmatched_preview,
        unmatched_file,
        conflicts_file,
    })
}

/// Apply the resolutions file and the conflict policy. Returns the path of
/// the pending-conflicts file when one was written.
async fn settle_conflicts<S, L, W>(
    sync: &mut SyncOrchestrator<S, L, W>,
    config: &Config,
    generated_at: NaiveDateTime,
) -> Result<Option<PathBuf>>
where
    S: SourceStore,
    L: StoreRegistry + Catalog,
    W: StoreWriter,
{
    if sync.conflicts()?.is_empty() {
        return Ok(None);
    }

    if let Some(path) = &config.resolutions_file {
        let entries = resolutions::load(path).await?;
        let decisions = resolutions::to_decisions(&entries, sync.conflicts()?);
        for decision in decisions {
            // A bad decision only loses itself.
            if let Err(e) = sync.resolve_conflicts(&[decision]) {
                tracing::warn!("Resolution for conflict {} rejected: {}", decision.conflict, e);
            }
        }
    }

    let conflicts = sync.conflicts()?;
    if conflicts.pending_count() == 0 || conflicts.is_closed() {
        return Ok(None);
    }

    match config.conflict_policy {
        ConflictPolicy::Skip => {
            tracing::info!(
                "Skipping {} unresolved conflict(s)",
                conflicts.pending_count()
            );
            sync.resolve_conflicts(&[ResolutionDecision::new(0, ResolutionAction::SkipAll)])?;
            Ok(None)
        }
        ConflictPolicy::Defer => {
            let requests = sync.resolution_requests()?;
            match resolutions::write_pending(&config.report_dir, generated_at, &requests).await {
                Ok(path) => Ok(Some(path)),
                Err(e) => {
                    tracing::warn!("Could not write pending conflicts: {}", e);
                    Ok(None)
                }
            }
        }
    }
}

/// Write the unmatched report. A failure is logged and yields `None`.
async fn write_report(dir: &Path, file_name: &str, contents: &str) -> Option<PathBuf> {
    let path = dir.join(file_name);
    let written = match tokio::fs::create_dir_all(dir).await {
        Ok(()) => tokio::fs::write(&path, contents).await,
        Err(e) => Err(e),
    };
    match written {
        Ok(()) => {
            tracing::info!("Unmatched books report saved to: {}", path.display());
            Some(path)
        }
        Err(e) => {
            tracing::warn!("Could not write {}: {}", path.display(), e);
            None
        }
    }
}
