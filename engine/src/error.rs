//! Error types for the sync engine.

use crate::orchestrator::Stage;
use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a target store could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Unreachable {
    /// Another process (Calibre GUI or content server) holds the library open
    LockedByOtherProcess,
    /// Any other connectivity failure
    Unavailable(String),
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unreachable::LockedByOtherProcess => {
                write!(f, "another program has the library open; close it and retry")
            }
            Unreachable::Unavailable(reason) => write!(f, "{reason}"),
        }
    }
}

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Error {
    // Fatal errors
    #[error("source store not found: {0}")]
    SourceNotFound(String),

    #[error("source store could not be read: {0}")]
    SourceRead(String),

    #[error("no target stores found in {searched} search path(s)")]
    NoTargetStores { searched: usize },

    #[error("more than one primary store: {}", .0.join(", "))]
    MultiplePrimaryStores(Vec<String>),

    // Store-level errors, isolated to one store
    #[error("query failed in store '{store}': {reason}")]
    StoreQuery { store: String, reason: String },

    #[error("store '{store}' is unreachable: {reason}")]
    StoreUnreachable { store: String, reason: Unreachable },

    #[error("backup of store '{store}' failed: {reason}")]
    BackupFailed { store: String, reason: String },

    #[error("could not create column '{column}' in store '{store}': {reason}")]
    ColumnProvisionFailed {
        store: String,
        column: String,
        reason: String,
    },

    #[error("column '{column}' already exists in store '{store}'")]
    ColumnAlreadyExists { store: String, column: String },

    // Match-level errors
    #[error("could not set '{field}' on record {record} in store '{store}': {reason}")]
    FieldUpdateFailed {
        store: String,
        record: RecordId,
        field: String,
        reason: String,
    },

    #[error("{operation} timed out after {seconds}s")]
    OperationTimeout { operation: String, seconds: u64 },

    // Pipeline contract errors
    #[error("cannot run {stage}: {missing} has not completed")]
    MissingPrerequisite { stage: Stage, missing: Stage },

    // Conflict resolution errors
    #[error("conflict not found: {0}")]
    UnknownConflict(usize),

    #[error("conflict {0} has already been decided")]
    ConflictNotPending(usize),

    #[error("conflict {conflict} has {candidates} candidate(s), cannot select {index}")]
    InvalidSelection {
        conflict: usize,
        index: usize,
        candidates: usize,
    },

    #[error("conflict resolution was closed by skip-all")]
    ResolutionClosed,
}

impl Error {
    /// Whether this error aborts the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::SourceNotFound(_)
                | Error::SourceRead(_)
                | Error::NoTargetStores { .. }
                | Error::MultiplePrimaryStores(_)
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
