//! Cross-store matching of source items to target records.
//!
//! # Algorithm
//!
//! 1. Normalize the item's title and author
//! 2. Search the primary store; a hit there is final
//! 3. Otherwise search every secondary store and collect all hits
//! 4. Classify: one hit is a match, none is unmatched, several are a conflict
//!
//! Only exact equality of both normalized fields counts as a hit. Nothing
//! is scored and nothing is guessed.

use crate::conflict::Conflict;
use crate::error::Result;
use crate::normalize::{normalize_author, normalize_title};
use crate::{RecordId, SourceItem, TargetRecord, TargetStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

/// Read access to the records of target stores.
pub trait Catalog: Send + Sync {
    /// All records of `store` with their full author string, in store order.
    fn query_all_records(
        &self,
        store: &TargetStore,
    ) -> impl Future<Output = Result<Vec<TargetRecord>>> + Send;
}

/// How a match was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchKind {
    /// Normalized title and author are equal. The only kind produced.
    #[default]
    Exact,
}

/// A confirmed correspondence between a source item and one target record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub item: SourceItem,
    pub store: TargetStore,
    pub record_id: RecordId,
    pub record_title: String,
    pub record_authors: String,
    pub kind: MatchKind,
}

impl Match {
    fn exact(item: &SourceItem, store: &TargetStore, record: &TargetRecord) -> Self {
        Self {
            item: item.clone(),
            store: store.clone(),
            record_id: record.id,
            record_title: record.title.clone(),
            record_authors: record.authors.clone(),
            kind: MatchKind::Exact,
        }
    }

    /// Whether this match targets the same record slot as `other`
    /// (same item, same store).
    pub fn same_target(&self, other: &Match) -> bool {
        self.item.id == other.item.id && self.store.path == other.store.path
    }
}

/// Normalized identity of a source item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchKey {
    pub title: String,
    pub author: String,
}

impl MatchKey {
    pub fn of_item(item: &SourceItem) -> Self {
        Self {
            title: normalize_title(&item.title),
            author: normalize_author(&item.author),
        }
    }

    pub fn of_record(record: &TargetRecord) -> Self {
        Self {
            title: normalize_title(&record.title),
            author: normalize_author(&record.authors),
        }
    }
}

/// Result of matching every source item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: Vec<Match>,
    pub unmatched: Vec<SourceItem>,
    pub conflicts: Vec<Conflict>,
}

impl MatchOutcome {
    /// Number of matches per store name, ordered by name.
    pub fn matches_per_store(&self) -> BTreeMap<String, usize> {
        let mut tally = BTreeMap::new();
        for m in &self.matched {
            *tally.entry(m.store.name.clone()).or_insert(0) += 1;
        }
        tally
    }
}

/// Find the first record equal to `key`.
///
/// When several records are equal, the first one in slice order wins.
pub fn find_in_records<'r>(key: &MatchKey, records: &'r [TargetRecord]) -> Option<&'r TargetRecord> {
    records
        .iter()
        .find(|record| MatchKey::of_record(record) == *key)
}

/// Search one store for an item.
///
/// Query failures propagate; [`find_across_stores`] downgrades them.
pub async fn find_in_store<C: Catalog>(
    catalog: &C,
    item: &SourceItem,
    store: &TargetStore,
) -> Result<Option<Match>> {
    let records = catalog.query_all_records(store).await?;
    let key = MatchKey::of_item(item);
    Ok(find_in_records(&key, &records).map(|record| Match::exact(item, store, record)))
}

/// Search all stores for an item, primary first.
///
/// A primary hit returns immediately with that single match. Otherwise
/// every secondary store is searched and all hits are returned in store
/// order. A store that fails to answer counts as no match.
pub async fn find_across_stores<C: Catalog>(
    catalog: &C,
    item: &SourceItem,
    stores: &[TargetStore],
) -> Vec<Match> {
    if let Some(primary) = stores.iter().find(|s| s.is_primary) {
        if let Some(found) = search_logged(catalog, item, primary).await {
            return vec![found];
        }
    }

    let mut matches = Vec::new();
    for store in stores.iter().filter(|s| !s.is_primary) {
        if let Some(found) = search_logged(catalog, item, store).await {
            matches.push(found);
        }
    }
    matches
}

async fn search_logged<C: Catalog>(
    catalog: &C,
    item: &SourceItem,
    store: &TargetStore,
) -> Option<Match> {
    match find_in_store(catalog, item, store).await {
        Ok(found) => found,
        Err(e) => {
            tracing::warn!("Searching '{}' in {} failed: {}", item.title, store.name, e);
            None
        }
    }
}

/// Match every item and classify the results.
pub async fn match_all<C: Catalog>(
    catalog: &C,
    items: &[SourceItem],
    stores: &[TargetStore],
) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();

    tracing::info!("Starting to match {} items", items.len());

    for (i, item) in items.iter().enumerate() {
        if i % 10 == 0 {
            tracing::info!("Processing item {}/{}: {}", i + 1, items.len(), item.title);
        }

        let mut matches = find_across_stores(catalog, item, stores).await;
        match matches.len() {
            0 => {
                tracing::debug!("No match found for '{}' by {}", item.title, item.author);
                outcome.unmatched.push(item.clone());
            }
            1 => outcome.matched.extend(matches.pop()),
            n => {
                let names: Vec<&str> = matches.iter().map(|m| m.store.name.as_str()).collect();
                tracing::warn!(
                    "CONFLICT: '{}' by {} found in {} stores: {}",
                    item.title,
                    item.author,
                    n,
                    names.join(", ")
                );
                outcome.conflicts.push(Conflict::new(item.clone(), matches));
            }
        }
    }

    tracing::info!(
        "Matching complete: {} matched, {} unmatched, {} conflicts",
        outcome.matched.len(),
        outcome.unmatched.len(),
        outcome.conflicts.len()
    );
    for (store, count) in outcome.matches_per_store() {
        tracing::info!("  {}: {} matches", store, count);
    }

    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// In-memory catalog that counts queries per store.
    #[derive(Default)]
    pub(crate) struct FakeCatalog {
        records: HashMap<PathBuf, Vec<TargetRecord>>,
        failing: Vec<PathBuf>,
        queries: Mutex<HashMap<String, usize>>,
    }

    impl FakeCatalog {
        pub(crate) fn with_store(mut self, store: &TargetStore, records: Vec<TargetRecord>) -> Self {
            self.records.insert(store.path.clone(), records);
            self
        }

        pub(crate) fn failing(mut self, store: &TargetStore) -> Self {
            self.failing.push(store.path.clone());
            self
        }

        pub(crate) fn query_count(&self, store: &TargetStore) -> usize {
            self.queries
                .lock()
                .unwrap()
                .get(&store.name)
                .copied()
                .unwrap_or(0)
        }
    }

    impl Catalog for FakeCatalog {
        async fn query_all_records(&self, store: &TargetStore) -> Result<Vec<TargetRecord>> {
            *self
                .queries
                .lock()
                .unwrap()
                .entry(store.name.clone())
                .or_insert(0) += 1;
            if self.failing.contains(&store.path) {
                return Err(Error::StoreQuery {
                    store: store.name.clone(),
                    reason: "database is locked".into(),
                });
            }
            Ok(self.records.get(&store.path).cloned().unwrap_or_default())
        }
    }

    fn item(title: &str, author: &str) -> SourceItem {
        SourceItem::new(format!("id-{title}"), title, author, vec!["horror".into()])
    }

    fn stores() -> (TargetStore, TargetStore, TargetStore) {
        (
            TargetStore::new("MCR", "/lib/MCR").primary(),
            TargetStore::new("Fanfic", "/lib/Fanfic"),
            TargetStore::new("Archive", "/lib/Archive"),
        )
    }

    #[tokio::test]
    async fn requires_both_fields() {
        let (primary, _, _) = stores();
        let catalog = FakeCatalog::default().with_store(
            &primary,
            vec![
                TargetRecord::new(1, "Carmilla", "Someone Else"),
                TargetRecord::new(2, "Other Book", "Sheridan Le Fanu"),
            ],
        );

        let found = find_in_store(&catalog, &item("Carmilla", "Sheridan Le Fanu"), &primary)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn matches_normalized_fields() {
        let (primary, _, _) = stores();
        let catalog = FakeCatalog::default().with_store(
            &primary,
            vec![TargetRecord::new(7, "The Left Hand of Darkness", "Le Guin, Ursula K.")],
        );

        let found = find_in_store(
            &catalog,
            &item("Left Hand of Darkness!", "Ursula K. Le Guin"),
            &primary,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.record_id, 7);
        assert_eq!(found.kind, MatchKind::Exact);
    }

    #[tokio::test]
    async fn first_equal_record_wins() {
        let (primary, _, _) = stores();
        let catalog = FakeCatalog::default().with_store(
            &primary,
            vec![
                TargetRecord::new(3, "Dracula", "Bram Stoker"),
                TargetRecord::new(9, "dracula", "Stoker, Bram"),
            ],
        );

        let found = find_in_store(&catalog, &item("Dracula", "Bram Stoker"), &primary)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.record_id, 3);
    }

    #[tokio::test]
    async fn primary_hit_short_circuits() {
        let (primary, fanfic, archive) = stores();
        let record = || vec![TargetRecord::new(1, "Dracula", "Bram Stoker")];
        let catalog = FakeCatalog::default()
            .with_store(&primary, record())
            .with_store(&fanfic, record())
            .with_store(&archive, record());
        let all = vec![fanfic.clone(), primary.clone(), archive.clone()];

        let matches = find_across_stores(&catalog, &item("Dracula", "Bram Stoker"), &all).await;

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].store, primary);
        assert_eq!(catalog.query_count(&primary), 1);
        assert_eq!(catalog.query_count(&fanfic), 0);
        assert_eq!(catalog.query_count(&archive), 0);
    }

    #[tokio::test]
    async fn primary_miss_searches_every_secondary() {
        let (primary, fanfic, archive) = stores();
        let catalog = FakeCatalog::default()
            .with_store(&primary, vec![])
            .with_store(&fanfic, vec![TargetRecord::new(4, "Dracula", "Bram Stoker")])
            .with_store(&archive, vec![TargetRecord::new(8, "Dracula", "Bram Stoker")]);
        let all = vec![primary.clone(), fanfic.clone(), archive.clone()];

        let matches = find_across_stores(&catalog, &item("Dracula", "Bram Stoker"), &all).await;

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].store, fanfic);
        assert_eq!(matches[1].store, archive);
        assert_eq!(catalog.query_count(&fanfic), 1);
        assert_eq!(catalog.query_count(&archive), 1);
    }

    #[tokio::test]
    async fn failing_store_counts_as_no_match() {
        let (primary, fanfic, archive) = stores();
        let catalog = FakeCatalog::default()
            .failing(&primary)
            .with_store(&fanfic, vec![TargetRecord::new(4, "Dracula", "Bram Stoker")])
            .failing(&archive);
        let all = vec![primary, fanfic.clone(), archive];

        let matches = find_across_stores(&catalog, &item("Dracula", "Bram Stoker"), &all).await;

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].store, fanfic);
    }

    #[tokio::test]
    async fn no_primary_searches_all() {
        let (_, fanfic, archive) = stores();
        let catalog = FakeCatalog::default()
            .with_store(&fanfic, vec![TargetRecord::new(4, "Dracula", "Bram Stoker")]);
        let all = vec![fanfic.clone(), archive.clone()];

        let matches = find_across_stores(&catalog, &item("Dracula", "Bram Stoker"), &all).await;

        assert_eq!(matches.len(), 1);
        assert_eq!(catalog.query_count(&archive), 1);
    }

    #[tokio::test]
    async fn match_all_partitions_items() {
        let (primary, fanfic, archive) = stores();
        let catalog = FakeCatalog::default()
            .with_store(&primary, vec![TargetRecord::new(1, "Dracula", "Bram Stoker")])
            .with_store(
                &fanfic,
                vec![
                    TargetRecord::new(2, "Carmilla", "Sheridan Le Fanu"),
                    TargetRecord::new(3, "Dracula", "Bram Stoker"),
                ],
            )
            .with_store(&archive, vec![TargetRecord::new(5, "Carmilla", "Le Fanu, Sheridan")]);
        let all = vec![primary, fanfic.clone(), archive];
        let items = vec![
            item("Dracula", "Bram Stoker"),
            item("Carmilla", "Sheridan Le Fanu"),
            item("Frankenstein", "Mary Shelley"),
        ];

        let outcome = match_all(&catalog, &items, &all).await;

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.matched[0].item.title, "Dracula");
        assert!(outcome.matched[0].store.is_primary);
        assert_eq!(outcome.unmatched.len(), 1);
        assert_eq!(outcome.unmatched[0].title, "Frankenstein");
        assert_eq!(outcome.conflicts.len(), 1);
        assert_eq!(outcome.conflicts[0].item.title, "Carmilla");
        assert_eq!(outcome.conflicts[0].matches.len(), 2);
        assert_eq!(outcome.matches_per_store().get("MCR"), Some(&1));
    }

    #[tokio::test]
    async fn single_secondary_hit_is_not_a_conflict() {
        let (primary, fanfic, archive) = stores();
        let catalog = FakeCatalog::default()
            .with_store(&primary, vec![])
            .with_store(&fanfic, vec![])
            .with_store(&archive, vec![TargetRecord::new(5, "Carmilla", "Sheridan Le Fanu")]);
        let all = vec![primary, fanfic, archive.clone()];

        let outcome = match_all(&catalog, &[item("Carmilla", "Sheridan Le Fanu")], &all).await;

        assert_eq!(outcome.matched.len(), 1);
        assert_eq!(outcome.matched[0].store, archive);
        assert!(outcome.conflicts.is_empty());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_match_requires_title_and_author(
                title in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
                author in "[a-z]{1,8} [a-z]{1,8}",
                other in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
            ) {
                let key = MatchKey {
                    title: normalize_title(&title),
                    author: normalize_author(&author),
                };
                let records = vec![
                    TargetRecord::new(1, other.clone(), author.clone()),
                    TargetRecord::new(2, title.clone(), other.clone()),
                ];

                let found = find_in_records(&key, &records);
                if let Some(record) = found {
                    prop_assert_eq!(normalize_title(&record.title), key.title.clone());
                    prop_assert_eq!(normalize_author(&record.authors), key.author.clone());
                }
            }
        }
    }
}
