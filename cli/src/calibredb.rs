//! Library writes through the `calibredb` command-line tool.
//!
//! Every call runs as a child process bounded by a timeout. The child is
//! killed if the timeout fires first.

use crate::db;
use chrono::Local;
use shelfsync_engine::report::backup_file_name;
use shelfsync_engine::{
    ColumnSpec, CustomColumn, Error, RecordId, Result, StoreWriter, TargetStore, Unreachable,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Places `calibredb` is usually installed, tried in order.
const COMMON_PATHS: [&str; 5] = [
    "calibredb",
    "/Applications/calibre.app/Contents/MacOS/calibredb",
    "/usr/bin/calibredb",
    "/usr/local/bin/calibredb",
    "C:\\Program Files\\Calibre2\\calibredb.exe",
];

const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Printed when the Calibre GUI or content server has the library open.
const LOCKED_MESSAGE: &str = "Another calibre program";

/// Find a working `calibredb`: the configured path if given, otherwise the
/// first common location that answers `--version`.
pub async fn locate(configured: Option<&Path>) -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => COMMON_PATHS.iter().map(PathBuf::from).collect(),
    };

    for candidate in candidates {
        let mut command = Command::new(&candidate);
        command.arg("--version").kill_on_drop(true);
        match timeout(VERSION_TIMEOUT, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                tracing::info!("Found calibredb at: {}", candidate.display());
                return Some(candidate);
            }
            _ => tracing::debug!("No working calibredb at {}", candidate.display()),
        }
    }

    tracing::error!("calibredb not found in any common location");
    None
}

/// Why a call produced no usable output.
enum CallError {
    TimedOut(Error),
    Spawn(String),
}

/// [`StoreWriter`] backed by `calibredb`.
pub struct Calibredb {
    program: PathBuf,
    backup_dir: PathBuf,
    probe_timeout: Duration,
    call_timeout: Duration,
}

impl Calibredb {
    pub fn new(program: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            backup_dir: backup_dir.into(),
            probe_timeout: PROBE_TIMEOUT,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Override the probe and mutating-call timeouts.
    pub fn with_timeouts(mut self, probe: Duration, call: Duration) -> Self {
        self.probe_timeout = probe;
        self.call_timeout = call;
        self
    }

    async fn call(
        &self,
        operation: &str,
        args: Vec<OsString>,
        limit: Duration,
    ) -> std::result::Result<Output, CallError> {
        tracing::debug!(
            "Running {} {}",
            self.program.display(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let mut command = Command::new(&self.program);
        command.args(&args).kill_on_drop(true);

        timeout(limit, command.output())
            .await
            .map_err(|_| {
                CallError::TimedOut(Error::OperationTimeout {
                    operation: format!("calibredb {operation}"),
                    seconds: limit.as_secs(),
                })
            })?
            .map_err(|e| CallError::Spawn(format!("failed to start calibredb: {e}")))
    }

    fn library_args(command: &str, store: &TargetStore) -> Vec<OsString> {
        vec![
            command.into(),
            "--library-path".into(),
            store.path.clone().into_os_string(),
        ]
    }
}

/// Non-empty stderr and stdout, for error messages.
fn describe(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let text = match (stderr.is_empty(), stdout.is_empty()) {
        (false, false) => format!("{stderr}\n{stdout}"),
        (false, true) => stderr,
        (true, false) => stdout,
        (true, true) => "(no output)".to_string(),
    };
    format!("{} ({})", text, output.status)
}

fn output_contains(output: &Output, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    [&output.stderr, &output.stdout]
        .iter()
        .any(|stream| String::from_utf8_lossy(stream).to_lowercase().contains(&needle))
}

impl StoreWriter for Calibredb {
    async fn probe(&self, store: &TargetStore) -> Result<()> {
        let mut args = Self::library_args("list", store);
        args.extend([OsString::from("--limit"), OsString::from("1")]);

        let unreachable = |reason: Unreachable| Error::StoreUnreachable {
            store: store.name.clone(),
            reason,
        };
        let output = match self.call("list", args, self.probe_timeout).await {
            Ok(output) => output,
            Err(CallError::TimedOut(e)) => return Err(e),
            Err(CallError::Spawn(msg)) => return Err(unreachable(Unreachable::Unavailable(msg))),
        };

        if output.status.success() {
            tracing::debug!("calibredb can reach {}", store.name);
            Ok(())
        } else if output_contains(&output, LOCKED_MESSAGE) {
            Err(unreachable(Unreachable::LockedByOtherProcess))
        } else {
            Err(unreachable(Unreachable::Unavailable(describe(&output))))
        }
    }

    async fn backup(&self, store: &TargetStore) -> Result<PathBuf> {
        let failed = |e: std::io::Error| Error::BackupFailed {
            store: store.name.clone(),
            reason: e.to_string(),
        };

        tokio::fs::create_dir_all(&self.backup_dir)
            .await
            .map_err(failed)?;
        let dest = self
            .backup_dir
            .join(backup_file_name(&store.name, Local::now().naive_local()));
        tokio::fs::copy(&store.db_path, &dest)
            .await
            .map_err(failed)?;

        Ok(dest)
    }

    async fn list_columns(&self, store: &TargetStore) -> Result<Vec<CustomColumn>> {
        db::list_custom_columns(store).await
    }

    async fn add_column(&self, store: &TargetStore, column: &ColumnSpec) -> Result<()> {
        let mut args = Self::library_args("add_custom_column", store);
        args.extend(
            [
                column.label.as_str(),
                column.display_name.as_str(),
                "text",
                "--display",
                "{}",
                "--is-multiple",
            ]
            .map(OsString::from),
        );

        let failed = |reason: String| Error::ColumnProvisionFailed {
            store: store.name.clone(),
            column: column.label.clone(),
            reason,
        };
        let output = match self.call("add_custom_column", args, self.call_timeout).await {
            Ok(output) => output,
            Err(CallError::TimedOut(e)) => return Err(e),
            Err(CallError::Spawn(msg)) => return Err(failed(msg)),
        };

        if output.status.success() {
            Ok(())
        } else if output_contains(&output, "already exists") {
            Err(Error::ColumnAlreadyExists {
                store: store.name.clone(),
                column: column.label.clone(),
            })
        } else {
            tracing::error!("calibredb add_custom_column failed: {}", describe(&output));
            Err(failed(describe(&output)))
        }
    }

    async fn set_field(
        &self,
        store: &TargetStore,
        record_id: RecordId,
        column: &ColumnSpec,
        value: &str,
    ) -> Result<()> {
        let mut args = Self::library_args("set_metadata", store);
        args.extend([
            OsString::from(record_id.to_string()),
            OsString::from("--field"),
            OsString::from(format!("#{}:{}", column.label, value)),
        ]);

        let failed = |reason: String| Error::FieldUpdateFailed {
            store: store.name.clone(),
            record: record_id,
            field: column.label.clone(),
            reason,
        };
        let output = match self.call("set_metadata", args, self.call_timeout).await {
            Ok(output) => output,
            Err(CallError::TimedOut(e)) => return Err(e),
            Err(CallError::Spawn(msg)) => return Err(failed(msg)),
        };

        if output.status.success() {
            Ok(())
        } else {
            Err(failed(describe(&output)))
        }
    }
}
