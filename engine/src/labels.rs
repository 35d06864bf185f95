//! Classification of raw collection labels into ratings and genres.
//!
//! Every label lands in exactly one partition. A label is a rating when,
//! after lowercasing, trimming and removing an optional leading `|`
//! marker, it names an entry of the fixed rating vocabulary. Everything
//! else is a genre.

use serde::{Deserialize, Serialize};

/// Marker some readers prefix to rating shelves so they sort first.
pub const RATING_MARKER: char = '|';

/// Separator used when writing a label set into one multi-valued field.
pub const FIELD_SEPARATOR: &str = ",";

/// Recognized rating names and their canonical spelling.
const RATING_VOCABULARY: [(&str, &str); 6] = [
    ("evergreen", "Evergreen"),
    ("absolute favorite", "Absolute Favorite"),
    ("favorite", "Favorites"),
    ("favorites", "Favorites"),
    ("good", "Great"),
    ("great", "Great"),
];

/// Labels of one item split into the two classification fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Canonical rating names, deduplicated in first-seen order
    pub ratings: Vec<String>,
    /// Genre labels with the marker stripped, deduplicated in first-seen order
    pub genres: Vec<String>,
}

impl Classification {
    /// The value written to the ratings field, if any.
    pub fn ratings_value(&self) -> Option<String> {
        join_field(&self.ratings)
    }

    /// The value written to the genres field, if any.
    pub fn genres_value(&self) -> Option<String> {
        join_field(&self.genres)
    }

    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty() && self.genres.is_empty()
    }
}

/// Split labels into ratings and genres.
pub fn classify<S: AsRef<str>>(labels: &[S]) -> Classification {
    let mut classification = Classification::default();

    for label in labels {
        let label = label.as_ref();
        match canonical_rating(label) {
            Some(rating) => push_unique(&mut classification.ratings, rating.to_string()),
            None => {
                let genre = strip_marker(label);
                if !genre.is_empty() {
                    push_unique(&mut classification.genres, genre.to_string());
                }
            }
        }
    }

    classification
}

/// The canonical rating name for a label, if it is one.
pub fn canonical_rating(label: &str) -> Option<&'static str> {
    let key = strip_marker(label).to_lowercase();
    RATING_VOCABULARY
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, canonical)| *canonical)
}

/// Whether a label belongs to the rating vocabulary.
pub fn is_rating(label: &str) -> bool {
    canonical_rating(label).is_some()
}

fn strip_marker(label: &str) -> &str {
    let trimmed = label.trim();
    trimmed
        .strip_prefix(RATING_MARKER)
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.contains(&value) {
        values.push(value);
    }
}

fn join_field(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(FIELD_SEPARATOR))
    }
}
