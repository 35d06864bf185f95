//! Calibre library discovery and read access to `metadata.db`.

use super::pool::{open_read_only, Pool};
use shelfsync_engine::{
    Catalog, CustomColumn, Error, Result, StoreRegistry, TargetRecord, TargetStore,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use walkdir::WalkDir;

/// Path fragments that disqualify a library (compared lowercased).
const SKIP_MARKERS: [&str; 3] = ["backup", "temp", ".git"];

/// The database file that marks a Calibre library.
const METADATA_DB: &str = "metadata.db";

/// A book row with its authors joined.
#[derive(Debug)]
pub struct BookRow {
    pub id: i64,
    pub title: Option<String>,
    pub authors: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for BookRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(BookRow {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            authors: row.try_get("authors")?,
        })
    }
}

impl From<BookRow> for TargetRecord {
    fn from(row: BookRow) -> Self {
        TargetRecord::new(
            row.id,
            row.title.unwrap_or_default(),
            row.authors.unwrap_or_default(),
        )
    }
}

/// A `custom_columns` row.
#[derive(Debug)]
pub struct CustomColumnRow {
    pub label: String,
    pub name: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for CustomColumnRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(CustomColumnRow {
            label: row.try_get("label")?,
            name: row.try_get("name")?,
        })
    }
}

/// Whether the database at `db_path` has a `books` table.
pub async fn has_books_table(db_path: &Path) -> std::result::Result<bool, sqlx::Error> {
    let pool = open_read_only(db_path).await?;
    let found: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'books'",
    )
    .fetch_optional(&pool)
    .await?;
    pool.close().await;
    Ok(found.is_some())
}

/// All books with their authors joined by `" & "`, ascending by id.
pub async fn fetch_records(pool: &Pool) -> std::result::Result<Vec<TargetRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, BookRow>(
        r#"
        SELECT b.id, b.title, GROUP_CONCAT(a.name, ' & ') AS authors
        FROM books b
        LEFT JOIN books_authors_link ba ON b.id = ba.book
        LEFT JOIN authors a ON ba.author = a.id
        GROUP BY b.id, b.title
        ORDER BY b.id
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(TargetRecord::from).collect())
}

/// Custom columns defined in a library.
pub async fn list_custom_columns(store: &TargetStore) -> Result<Vec<CustomColumn>> {
    let query_error = |e: sqlx::Error| Error::StoreQuery {
        store: store.name.clone(),
        reason: e.to_string(),
    };
    let pool = open_read_only(&store.db_path).await.map_err(query_error)?;
    let rows = sqlx::query_as::<_, CustomColumnRow>("SELECT label, name FROM custom_columns")
        .fetch_all(&pool)
        .await
        .map_err(query_error)?;
    pool.close().await;

    Ok(rows
        .into_iter()
        .map(|row| CustomColumn {
            label: row.label,
            display_name: row.name,
        })
        .collect())
}

/// Find candidate `metadata.db` files under `roots`.
///
/// Returns `(library_dir, db_path)` pairs with resolved library paths,
/// deduplicated and in walk order.
pub fn find_candidates(roots: &[PathBuf]) -> Vec<(PathBuf, PathBuf)> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for root in roots {
        if !root.exists() {
            tracing::debug!("Search path {} does not exist", root.display());
            continue;
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() || entry.file_name() != METADATA_DB {
                continue;
            }
            let Some(parent) = entry.path().parent() else {
                continue;
            };
            let library = match parent.canonicalize() {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Cannot resolve {}: {}", parent.display(), e);
                    continue;
                }
            };

            let lowered = library.to_string_lossy().to_lowercase();
            if SKIP_MARKERS.iter().any(|m| lowered.contains(m)) {
                tracing::debug!("Skipping {}", library.display());
                continue;
            }
            if seen.insert(library.clone()) {
                let db_path = library.join(METADATA_DB);
                candidates.push((library, db_path));
            }
        }
    }

    candidates
}

/// Library registry and catalog over Calibre `metadata.db` files.
///
/// Records are read once per library and cached for the rest of the run.
pub struct CalibreLibraries {
    primary_marker: String,
    cache: Mutex<HashMap<PathBuf, Vec<TargetRecord>>>,
}

impl CalibreLibraries {
    pub fn new(primary_marker: impl Into<String>) -> Self {
        Self {
            primary_marker: primary_marker.into().to_lowercase(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn is_primary_name(&self, name: &str) -> bool {
        !self.primary_marker.is_empty() && name.to_lowercase().contains(&self.primary_marker)
    }
}

impl StoreRegistry for CalibreLibraries {
    async fn discover(&self, search_paths: &[PathBuf]) -> Result<Vec<TargetStore>> {
        let roots = search_paths.to_vec();
        let candidates = tokio::task::spawn_blocking(move || find_candidates(&roots))
            .await
            .map_err(|e| Error::StoreQuery {
                store: "library discovery".into(),
                reason: e.to_string(),
            })?;

        let mut stores = Vec::new();
        for (library, db_path) in candidates {
            match has_books_table(&db_path).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("{} has no books table", db_path.display());
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Cannot open {}: {}", db_path.display(), e);
                    continue;
                }
            }
            let name = library
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| library.display().to_string());
            tracing::info!("Found Calibre library: {} at {}", name, library.display());
            stores.push(TargetStore::new(name, library));
        }

        if let Some(primary) = stores.iter_mut().find(|s| self.is_primary_name(&s.name)) {
            primary.is_primary = true;
            tracing::info!("Set {} as primary library", primary.name);
        }

        Ok(stores)
    }
}

impl Catalog for CalibreLibraries {
    async fn query_all_records(&self, store: &TargetStore) -> Result<Vec<TargetRecord>> {
        let mut cache = self.cache.lock().await;
        if let Some(records) = cache.get(&store.path) {
            return Ok(records.clone());
        }

        let query_error = |e: sqlx::Error| Error::StoreQuery {
            store: store.name.clone(),
            reason: e.to_string(),
        };
        let pool = open_read_only(&store.db_path).await.map_err(query_error)?;
        let records = fetch_records(&pool).await.map_err(query_error)?;
        pool.close().await;

        tracing::debug!("Loaded {} records from {}", records.len(), store.name);
        cache.insert(store.path.clone(), records.clone());
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{add_custom_column, calibre_library};
    use tempfile::TempDir;

    #[tokio::test]
    async fn discovers_libraries_and_flags_primary() {
        let dir = TempDir::new().unwrap();
        calibre_library(dir.path(), "Archive", &[]).await;
        calibre_library(dir.path(), "MCR Library", &[]).await;
        calibre_library(&dir.path().join("old"), "Library Backup", &[]).await;
        let plain = dir.path().join("NotALibrary");
        std::fs::create_dir_all(&plain).unwrap();
        std::fs::write(plain.join("metadata.db"), b"").unwrap();

        let libraries = CalibreLibraries::new("mcr");
        let stores = libraries
            .discover(&[dir.path().to_path_buf(), dir.path().join("missing")])
            .await
            .unwrap();

        let names: Vec<&str> = stores.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Archive", "MCR Library"]);
        assert!(!stores[0].is_primary);
        assert!(stores[1].is_primary);
        assert!(stores[1].db_path.ends_with("MCR Library/metadata.db"));
    }

    #[tokio::test]
    async fn overlapping_search_paths_are_deduplicated() {
        let dir = TempDir::new().unwrap();
        let library = calibre_library(dir.path(), "Books", &[]).await;

        let candidates = find_candidates(&[dir.path().to_path_buf(), library.clone()]);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].0, library.canonicalize().unwrap());
    }

    #[tokio::test]
    async fn records_join_authors_in_id_order() {
        let dir = TempDir::new().unwrap();
        let library = calibre_library(
            dir.path(),
            "Books",
            &[
                ("You and I in Unison", &["Kit Ellis"]),
                ("Good Omens", &["Terry Pratchett", "Neil Gaiman"]),
                ("Anonymous", &[]),
            ],
        )
        .await;
        let store = TargetStore::new("Books", library);
        let libraries = CalibreLibraries::new("mcr");

        let records = libraries.query_all_records(&store).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].authors, "Kit Ellis");
        assert!(records[1].authors.contains("Terry Pratchett"));
        assert!(records[1].authors.contains(" & "));
        assert_eq!(records[2].authors, "");

        // Served from the cache once loaded.
        std::fs::remove_file(&store.db_path).unwrap();
        assert_eq!(libraries.query_all_records(&store).await.unwrap(), records);
    }

    #[tokio::test]
    async fn custom_columns_are_listed() {
        let dir = TempDir::new().unwrap();
        let library = calibre_library(dir.path(), "Books", &[]).await;
        add_custom_column(&library, "myratings", "My Ratings").await;
        let store = TargetStore::new("Books", library);

        let columns = list_custom_columns(&store).await.unwrap();

        assert_eq!(
            columns,
            vec![CustomColumn {
                label: "myratings".into(),
                display_name: "My Ratings".into(),
            }]
        );
    }

    #[tokio::test]
    async fn unreadable_library_is_store_query() {
        let dir = TempDir::new().unwrap();
        let store = TargetStore::new("Gone", dir.path().join("Gone"));

        let err = list_custom_columns(&store).await.unwrap_err();

        assert!(matches!(err, Error::StoreQuery { .. }));
    }
}
