//! Shelfsync - carry Kobo collections into Calibre custom columns.
//!
//! Reads the reader's `KoboReader.sqlite`, matches its books against every
//! Calibre library found under the configured search paths, and writes
//! ratings and genres into two custom columns through `calibredb`.
//! Configuration comes from the environment (optionally a `.env` file).

mod calibredb;
mod config;
mod db;
mod error;
mod resolutions;
mod sync;

#[cfg(test)]
mod fixtures;

use crate::config::Config;
use crate::error::AppError;
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfsync=info,shelfsync_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting sync of {} (dry run: {})",
        config.kobo_db_path.display(),
        config.dry_run
    );

    // Run the pipeline in the background; the result arrives exactly once.
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let result = sync::run(config).await;
        let _ = done_tx.send(result);
    });

    let summary = match done_rx.await.map_err(|_| AppError::TaskAborted)? {
        Ok(summary) => summary,
        Err(e) => {
            if e.is_fatal_sync_error() {
                tracing::error!("Sync aborted: {}", e);
            } else {
                tracing::error!("Sync failed: {}", e);
            }
            return Err(e.into());
        }
    };

    println!("{}", summary.summary);
    if let Some(preview) = &summary.unmatched_preview {
        println!("{preview}");
    }
    if let Some(path) = &summary.unmatched_file {
        println!("Detailed report saved to: {}", path.display());
    }
    if let Some(path) = &summary.conflicts_file {
        println!(
            "{} conflict(s) need a decision; see {} and set RESOLUTIONS_FILE to apply them",
            summary.statistics.conflicts_pending,
            path.display()
        );
    }
    if summary.update.dry_run {
        println!("Dry run: no library was modified. Set DRY_RUN=false to apply.");
    }

    Ok(())
}
