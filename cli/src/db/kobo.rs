//! Reading books and collections from a Kobo `KoboReader.sqlite`.

use super::pool::{open_read_only, Pool};
use shelfsync_engine::{
    Error, ReadStatus, Result, SourceCollection, SourceItem, SourceStore,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A visible shelf row.
#[derive(Debug)]
pub struct ShelfRow {
    pub name: String,
    pub internal_name: Option<String>,
    pub kind: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for ShelfRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(ShelfRow {
            name: row.try_get("Name")?,
            internal_name: row.try_get("InternalName")?,
            kind: row.try_get("Type")?,
        })
    }
}

/// A book row from `content`.
#[derive(Debug)]
pub struct BookRow {
    pub content_id: String,
    pub title: Option<String>,
    pub attribution: Option<String>,
    pub read_status: Option<i64>,
    pub percent_read: Option<i64>,
    pub date_last_read: Option<String>,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for BookRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(BookRow {
            content_id: row.try_get("ContentID")?,
            title: row.try_get("Title")?,
            attribution: row.try_get("Attribution")?,
            read_status: row.try_get("ReadStatus")?,
            percent_read: row.try_get("___PercentRead")?,
            date_last_read: row.try_get("DateLastRead")?,
        })
    }
}

impl BookRow {
    fn into_item(self, tags: Vec<String>) -> SourceItem {
        SourceItem::new(
            self.content_id,
            self.title.unwrap_or_default(),
            self.attribution.unwrap_or_default(),
            tags,
        )
        .with_progress(
            ReadStatus::from_code(self.read_status.unwrap_or(0)),
            self.percent_read.unwrap_or(0),
            self.date_last_read,
        )
    }
}

/// A live shelf membership.
#[derive(Debug)]
pub struct MembershipRow {
    pub content_id: String,
    pub shelf_name: String,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for MembershipRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(MembershipRow {
            content_id: row.try_get("ContentId")?,
            shelf_name: row.try_get("ShelfName")?,
        })
    }
}

/// The reader's database, opened read-only.
pub struct KoboDatabase {
    path: PathBuf,
    pool: Pool,
}

impl KoboDatabase {
    /// Open the database. A missing file is [`Error::SourceNotFound`].
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::SourceNotFound(path.display().to_string()));
        }
        let pool = open_read_only(path)
            .await
            .map_err(|e| Error::SourceRead(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Opened Kobo database {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    fn read_error(&self, e: sqlx::Error) -> Error {
        Error::SourceRead(format!("{}: {}", self.path.display(), e))
    }

    async fn memberships(&self) -> Result<HashMap<String, Vec<String>>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT sc.ContentId, s.Name AS ShelfName
            FROM ShelfContent sc
            JOIN Shelf s ON sc.ShelfName = s.Name
            WHERE sc._IsDeleted = 'false' AND s._IsDeleted = 'false'
            ORDER BY sc.ContentId, s.Name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.read_error(e))?;

        let mut by_item: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            by_item.entry(row.content_id).or_default().push(row.shelf_name);
        }
        Ok(by_item)
    }
}

impl SourceStore for KoboDatabase {
    async fn get_collections(&self) -> Result<Vec<SourceCollection>> {
        let rows = sqlx::query_as::<_, ShelfRow>(
            r#"
            SELECT Name, InternalName, Type
            FROM Shelf
            WHERE _IsDeleted = 'false' AND _IsVisible = 'true'
            ORDER BY Name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.read_error(e))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                SourceCollection::new(
                    row.name,
                    row.internal_name.unwrap_or_default(),
                    row.kind.unwrap_or_default(),
                )
            })
            .collect())
    }

    async fn get_items_with_tags(&self) -> Result<Vec<SourceItem>> {
        let books = sqlx::query_as::<_, BookRow>(
            r#"
            SELECT ContentID, Title, Attribution, ReadStatus, ___PercentRead, DateLastRead
            FROM content
            WHERE ContentType = 6
            ORDER BY Title
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.read_error(e))?;

        let mut memberships = self.memberships().await?;

        let items: Vec<SourceItem> = books
            .into_iter()
            .map(|book| {
                let tags = memberships.remove(&book.content_id).unwrap_or_default();
                book.into_item(tags)
            })
            .collect();

        tracing::debug!("Read {} books from {}", items.len(), self.path.display());
        Ok(items)
    }
}
