//! # Shelfsync Engine
//!
//! Core logic for carrying Kobo collection membership into Calibre
//! custom columns.
//!
//! The engine matches books read from one source store against the
//! records of any number of target stores, exposes ambiguous matches as
//! conflicts for the caller to resolve, and writes the classified labels
//! back through a writer it does not own.
//!
//! ## Design Principles
//!
//! - **No IO**: every read and write goes through a collaborator trait
//! - **Exact**: two books match only when normalized title and author agree
//! - **Explicit**: conflicts are never resolved on the caller's behalf
//! - **Isolated**: one failing store or record never aborts its siblings
//!
//! ## Core Concepts
//!
//! ### Items and Stores
//!
//! A [`SourceItem`] is a book on the reader together with its raw
//! collection labels. A [`TargetStore`] is one library; its
//! [`TargetRecord`]s are read through a [`Catalog`]. At most one store is
//! primary, and a hit there ends the search for that item.
//!
//! ### Labels
//!
//! [`labels::classify`] splits raw labels into ratings (a fixed
//! vocabulary) and genres (everything else).
//!
//! ### Conflicts
//!
//! An item found in several secondary stores becomes a [`Conflict`]. The
//! [`ConflictSet`] hands out [`ResolutionRequest`]s and accepts
//! [`ResolutionDecision`]s.
//!
//! ### Updates
//!
//! The [`UpdateApplier`] probes, backs up, provisions columns and writes
//! fields per store, or previews all of that in dry-run mode.
//!
//! ## Quick Start
//!
//! ```rust
//! use shelfsync_engine::labels::classify;
//! use shelfsync_engine::normalize::{normalize_author, normalize_title};
//!
//! // Identity normalization
//! assert_eq!(
//!     normalize_title("The Desert Here and the Desert Far Away"),
//!     "desert here and the desert far away"
//! );
//! assert_eq!(normalize_author("Smith, Jane"), "jane smith");
//!
//! // Label classification
//! let labels = classify(&["Evergreen", "sweet fluff", "killjoys"]);
//! assert_eq!(labels.ratings_value().as_deref(), Some("Evergreen"));
//! assert_eq!(labels.genres_value().as_deref(), Some("sweet fluff,killjoys"));
//! ```
//!
//! A full run wires a [`SourceStore`], a [`StoreRegistry`] + [`Catalog`]
//! and a [`StoreWriter`] into a [`SyncOrchestrator`].

pub mod applier;
pub mod conflict;
pub mod error;
pub mod item;
pub mod labels;
pub mod matcher;
pub mod normalize;
pub mod orchestrator;
pub mod report;
pub mod stats;
pub mod target;

// Re-export main types at crate root
pub use applier::{
    ApplyMode, ColumnPlan, ColumnSpec, MatchFailure, StoreOutcome, StoreStatus, StoreWriter,
    UpdateApplier, UpdateReport,
};
pub use conflict::{
    Candidate, Conflict, ConflictSet, ConflictState, ResolutionAction, ResolutionDecision,
    ResolutionRequest, Selection,
};
pub use error::{Error, Result, Unreachable};
pub use item::{ReadStatus, SourceCollection, SourceItem};
pub use labels::Classification;
pub use matcher::{Catalog, Match, MatchKind, MatchOutcome};
pub use orchestrator::{RunOutcome, SourceStore, Stage, StoreRegistry, SyncOptions, SyncOrchestrator};
pub use report::{Reports, UnmatchedReport};
pub use stats::RunStatistics;
pub use target::{CustomColumn, TargetRecord, TargetStore};

/// Type aliases for clarity
pub type ItemId = String;
pub type RecordId = i64;
