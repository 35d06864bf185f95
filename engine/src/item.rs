//! Source-side types: items and collections read from the Kobo database.

use crate::labels;
use crate::ItemId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reading progress state as recorded by the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadStatus {
    Unread,
    Reading,
    Finished,
    /// A status code the reader uses that we do not interpret
    Other(i64),
}

impl ReadStatus {
    /// Map the raw integer code stored by the reader.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => ReadStatus::Unread,
            1 => ReadStatus::Reading,
            2 => ReadStatus::Finished,
            other => ReadStatus::Other(other),
        }
    }

    /// The raw integer code.
    pub fn code(self) -> i64 {
        match self {
            ReadStatus::Unread => 0,
            ReadStatus::Reading => 1,
            ReadStatus::Finished => 2,
            ReadStatus::Other(code) => code,
        }
    }
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadStatus::Unread => f.write_str("unread"),
            ReadStatus::Reading => f.write_str("reading"),
            ReadStatus::Finished => f.write_str("finished"),
            ReadStatus::Other(code) => write!(f, "status {code}"),
        }
    }
}

/// A book in the source store together with its raw collection labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceItem {
    /// Opaque identity (Kobo ContentID)
    pub id: ItemId,
    pub title: String,
    /// Free-text author attribution
    pub author: String,
    pub read_status: ReadStatus,
    /// Percent complete, 0-100
    pub percent_read: i64,
    /// Last-read timestamp exactly as the source stores it
    pub last_read: Option<String>,
    /// Raw collection labels in source order
    pub tags: Vec<String>,
}

impl SourceItem {
    /// Create an unread item with no progress.
    pub fn new(
        id: impl Into<ItemId>,
        title: impl Into<String>,
        author: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            read_status: ReadStatus::Unread,
            percent_read: 0,
            last_read: None,
            tags,
        }
    }

    /// Set reading progress.
    pub fn with_progress(
        mut self,
        read_status: ReadStatus,
        percent_read: i64,
        last_read: Option<String>,
    ) -> Self {
        self.read_status = read_status;
        self.percent_read = percent_read;
        self.last_read = last_read;
        self
    }

    /// Whether the item carries at least one collection label.
    pub fn has_tags(&self) -> bool {
        !self.tags.is_empty()
    }
}

/// A collection (shelf) defined in the source store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCollection {
    pub name: String,
    pub internal_name: String,
    pub kind: String,
    /// Whether the name belongs to the rating vocabulary
    pub is_rating: bool,
}

impl SourceCollection {
    pub fn new(
        name: impl Into<String>,
        internal_name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let is_rating = labels::is_rating(&name);
        Self {
            name,
            internal_name: internal_name.into(),
            kind: kind.into(),
            is_rating,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_status_codes() {
        assert_eq!(ReadStatus::from_code(0), ReadStatus::Unread);
        assert_eq!(ReadStatus::from_code(1), ReadStatus::Reading);
        assert_eq!(ReadStatus::from_code(2), ReadStatus::Finished);
        assert_eq!(ReadStatus::from_code(7), ReadStatus::Other(7));
        assert_eq!(ReadStatus::Other(7).code(), 7);
        assert_eq!(ReadStatus::Finished.to_string(), "finished");
    }

    #[test]
    fn collection_rating_flag() {
        assert!(SourceCollection::new("| evergreen", "evergreen", "UserTag").is_rating);
        assert!(SourceCollection::new("Great", "great", "UserTag").is_rating);
        assert!(!SourceCollection::new("sweet fluff", "sweet fluff", "UserTag").is_rating);
    }

    #[test]
    fn item_builder() {
        let item = SourceItem::new("file:///book.epub", "Title", "Author", vec![])
            .with_progress(ReadStatus::Reading, 42, Some("2024-01-02T10:00:00Z".into()));

        assert_eq!(item.read_status, ReadStatus::Reading);
        assert_eq!(item.percent_read, 42);
        assert!(!item.has_tags());
    }
}
