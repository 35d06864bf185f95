//! Conflicts: items found in more than one secondary store.
//!
//! The engine never picks a store on the caller's behalf. Each pending
//! conflict is exposed as a [`ResolutionRequest`]; the caller answers
//! with [`ResolutionDecision`]s and receives the matches to apply.
//!
//! State machine per conflict:
//!
//! ```text
//! Pending ──Select/SelectAll/SelectNone──▶ Resolved(selection)
//!    │
//!    └──────────────Skip─────────────────▶ Skipped
//! ```
//!
//! Both end states are terminal. `SkipAll` stops processing and leaves
//! every conflict not yet decided in `Pending`.

use crate::error::{Error, Result};
use crate::matcher::Match;
use crate::{ItemId, RecordId, SourceItem};
use serde::{Deserialize, Serialize};

/// Which candidate matches a resolved conflict applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Selection {
    One(Match),
    All(Vec<Match>),
    None,
}

impl Selection {
    /// The matches this selection contributes to the update stage.
    pub fn matches(&self) -> Vec<Match> {
        match self {
            Selection::One(m) => vec![m.clone()],
            Selection::All(ms) => ms.clone(),
            Selection::None => Vec::new(),
        }
    }
}

/// Lifecycle of a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictState {
    #[default]
    Pending,
    Resolved(Selection),
    Skipped,
}

impl ConflictState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ConflictState::Pending)
    }
}

/// An item with two or more candidate matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub item: SourceItem,
    pub matches: Vec<Match>,
    pub state: ConflictState,
}

impl Conflict {
    /// Create a pending conflict.
    pub fn new(item: SourceItem, matches: Vec<Match>) -> Self {
        Self {
            item,
            matches,
            state: ConflictState::Pending,
        }
    }
}

/// What the caller decided for one conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResolutionAction {
    /// Apply to the candidate at this index only
    Select(usize),
    /// Apply to every candidate store
    SelectAll,
    /// Resolve without applying anywhere
    SelectNone,
    /// Skip this conflict
    Skip,
    /// Stop resolving; everything not yet decided stays pending
    SkipAll,
}

/// A decision addressed to a conflict by its index in the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionDecision {
    pub conflict: usize,
    pub action: ResolutionAction,
}

impl ResolutionDecision {
    pub fn new(conflict: usize, action: ResolutionAction) -> Self {
        Self { conflict, action }
    }
}

/// One candidate shown to whoever resolves a conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub index: usize,
    pub store: String,
    pub record_id: RecordId,
    pub record_title: String,
    pub record_authors: String,
}

/// Everything a frontend needs to ask about one pending conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub conflict: usize,
    pub item_id: ItemId,
    pub title: String,
    pub author: String,
    pub tags: Vec<String>,
    pub candidates: Vec<Candidate>,
}

/// The conflicts of one run and their resolution progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    conflicts: Vec<Conflict>,
    closed: bool,
}

impl ConflictSet {
    pub fn new(conflicts: Vec<Conflict>) -> Self {
        Self {
            conflicts,
            closed: false,
        }
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn get(&self, index: usize) -> Option<&Conflict> {
        self.conflicts.get(index)
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Whether a skip-all ended resolution.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Index of the conflict for a source item.
    pub fn position(&self, item_id: &str) -> Option<usize> {
        self.conflicts.iter().position(|c| c.item.id == item_id)
    }

    pub fn pending_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.state.is_pending()).count()
    }

    pub fn resolved_count(&self) -> usize {
        self.conflicts
            .iter()
            .filter(|c| matches!(c.state, ConflictState::Resolved(_)))
            .count()
    }

    /// Requests for every conflict still pending, in set order.
    pub fn requests(&self) -> Vec<ResolutionRequest> {
        self.conflicts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.state.is_pending())
            .map(|(index, c)| ResolutionRequest {
                conflict: index,
                item_id: c.item.id.clone(),
                title: c.item.title.clone(),
                author: c.item.author.clone(),
                tags: c.item.tags.clone(),
                candidates: c
                    .matches
                    .iter()
                    .enumerate()
                    .map(|(i, m)| Candidate {
                        index: i,
                        store: m.store.name.clone(),
                        record_id: m.record_id,
                        record_title: m.record_title.clone(),
                        record_authors: m.record_authors.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Apply one decision and return the matches it selects.
    pub fn decide(&mut self, decision: ResolutionDecision) -> Result<Vec<Match>> {
        if self.closed {
            return Err(Error::ResolutionClosed);
        }
        if decision.action == ResolutionAction::SkipAll {
            self.closed = true;
            tracing::info!(
                "Skip-all requested, {} conflict(s) left unresolved",
                self.pending_count()
            );
            return Ok(Vec::new());
        }

        let conflict = self
            .conflicts
            .get_mut(decision.conflict)
            .ok_or(Error::UnknownConflict(decision.conflict))?;
        if !conflict.state.is_pending() {
            return Err(Error::ConflictNotPending(decision.conflict));
        }

        conflict.state = match decision.action {
            ResolutionAction::Select(index) => {
                let chosen = conflict.matches.get(index).cloned().ok_or_else(|| {
                    Error::InvalidSelection {
                        conflict: decision.conflict,
                        index,
                        candidates: conflict.matches.len(),
                    }
                })?;
                ConflictState::Resolved(Selection::One(chosen))
            }
            ResolutionAction::SelectAll => {
                ConflictState::Resolved(Selection::All(conflict.matches.clone()))
            }
            ResolutionAction::SelectNone => ConflictState::Resolved(Selection::None),
            ResolutionAction::Skip => ConflictState::Skipped,
            ResolutionAction::SkipAll => return Ok(Vec::new()),
        };

        Ok(match &conflict.state {
            ConflictState::Resolved(selection) => selection.matches(),
            _ => Vec::new(),
        })
    }

    /// Apply decisions in order, stopping at the first skip-all.
    ///
    /// Returns all selected matches. On error, decisions before the failing
    /// one stay applied and their matches are lost to the caller, so callers
    /// that need them should use [`ConflictSet::decide`] one at a time.
    pub fn resolve(&mut self, decisions: &[ResolutionDecision]) -> Result<Vec<Match>> {
        let mut selected = Vec::new();
        for decision in decisions {
            let stop = decision.action == ResolutionAction::SkipAll;
            selected.extend(self.decide(*decision)?);
            if stop {
                break;
            }
        }
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchKind;
    use crate::TargetStore;

    fn conflict(title: &str, stores: &[&str]) -> Conflict {
        let item = SourceItem::new(format!("id-{title}"), title, "Author", vec!["romance".into()]);
        let matches = stores
            .iter()
            .enumerate()
            .map(|(i, name)| Match {
                item: item.clone(),
                store: TargetStore::new(*name, format!("/lib/{name}")),
                record_id: i as i64 + 10,
                record_title: title.to_string(),
                record_authors: "Author".into(),
                kind: MatchKind::Exact,
            })
            .collect();
        Conflict::new(item, matches)
    }

    fn three_conflicts() -> ConflictSet {
        ConflictSet::new(vec![
            conflict("One", &["A", "B"]),
            conflict("Two", &["A", "B", "C"]),
            conflict("Three", &["B", "C"]),
        ])
    }

    #[test]
    fn select_one() {
        let mut set = three_conflicts();
        let selected = set
            .decide(ResolutionDecision::new(1, ResolutionAction::Select(2)))
            .unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].store.name, "C");
        assert!(matches!(
            set.get(1).unwrap().state,
            ConflictState::Resolved(Selection::One(_))
        ));
    }

    #[test]
    fn select_all_expands_per_store() {
        let mut set = three_conflicts();
        let selected = set
            .decide(ResolutionDecision::new(1, ResolutionAction::SelectAll))
            .unwrap();

        let stores: Vec<_> = selected.iter().map(|m| m.store.name.as_str()).collect();
        assert_eq!(stores, vec!["A", "B", "C"]);
    }

    #[test]
    fn skip_and_select_none_select_nothing() {
        let mut set = three_conflicts();
        let skipped = set
            .decide(ResolutionDecision::new(0, ResolutionAction::Skip))
            .unwrap();
        let none = set
            .decide(ResolutionDecision::new(2, ResolutionAction::SelectNone))
            .unwrap();

        assert!(skipped.is_empty());
        assert!(none.is_empty());
        assert_eq!(set.get(0).unwrap().state, ConflictState::Skipped);
        assert_eq!(
            set.get(2).unwrap().state,
            ConflictState::Resolved(Selection::None)
        );
        assert_eq!(set.pending_count(), 1);
    }

    #[test]
    fn terminal_conflicts_cannot_be_revisited() {
        let mut set = three_conflicts();
        set.decide(ResolutionDecision::new(0, ResolutionAction::Skip))
            .unwrap();

        let err = set
            .decide(ResolutionDecision::new(0, ResolutionAction::SelectAll))
            .unwrap_err();
        assert_eq!(err, Error::ConflictNotPending(0));
        assert_eq!(set.get(0).unwrap().state, ConflictState::Skipped);
    }

    #[test]
    fn invalid_selection_leaves_conflict_pending() {
        let mut set = three_conflicts();
        let err = set
            .decide(ResolutionDecision::new(0, ResolutionAction::Select(5)))
            .unwrap_err();

        assert_eq!(
            err,
            Error::InvalidSelection {
                conflict: 0,
                index: 5,
                candidates: 2
            }
        );
        assert!(set.get(0).unwrap().state.is_pending());
    }

    #[test]
    fn unknown_conflict() {
        let mut set = three_conflicts();
        let err = set
            .decide(ResolutionDecision::new(9, ResolutionAction::Skip))
            .unwrap_err();
        assert_eq!(err, Error::UnknownConflict(9));
    }

    #[test]
    fn skip_all_leaves_remaining_pending() {
        let mut set = three_conflicts();
        let selected = set
            .resolve(&[
                ResolutionDecision::new(0, ResolutionAction::Select(0)),
                ResolutionDecision::new(1, ResolutionAction::SkipAll),
                ResolutionDecision::new(2, ResolutionAction::SelectAll),
            ])
            .unwrap();

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].item.title, "One");
        assert!(set.is_closed());
        assert!(set.get(1).unwrap().state.is_pending());
        assert!(set.get(2).unwrap().state.is_pending());
        assert_eq!(set.pending_count(), 2);
        assert_eq!(set.resolved_count(), 1);

        let err = set
            .decide(ResolutionDecision::new(2, ResolutionAction::SelectAll))
            .unwrap_err();
        assert_eq!(err, Error::ResolutionClosed);
    }

    #[test]
    fn requests_cover_pending_only() {
        let mut set = three_conflicts();
        set.decide(ResolutionDecision::new(1, ResolutionAction::Skip))
            .unwrap();

        let requests = set.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].conflict, 0);
        assert_eq!(requests[1].conflict, 2);
        assert_eq!(requests[1].candidates[1].store, "C");
        assert_eq!(requests[1].candidates[1].index, 1);
        assert_eq!(set.position("id-Three"), Some(2));
    }

    #[test]
    fn decisions_deserialize_from_json() {
        let json = r#"[
            {"conflict": 0, "action": {"select": 1}},
            {"conflict": 1, "action": "selectAll"},
            {"conflict": 2, "action": "skipAll"}
        ]"#;
        let decisions: Vec<ResolutionDecision> = serde_json::from_str(json).unwrap();

        assert_eq!(decisions[0].action, ResolutionAction::Select(1));
        assert_eq!(decisions[1].action, ResolutionAction::SelectAll);
        assert_eq!(decisions[2].action, ResolutionAction::SkipAll);
    }
}
