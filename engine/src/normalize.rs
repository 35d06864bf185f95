//! Identity normalization for cross-store matching.
//!
//! Both functions are total: any input, including the empty string,
//! produces a value. Matching compares these outputs for exact equality.

const LEADING_ARTICLES: [&str; 3] = ["the ", "a ", "an "];

/// Normalize a title: lowercase, punctuation to spaces, collapsed
/// whitespace, one leading article removed.
pub fn normalize_title(title: &str) -> String {
    let replaced: String = title
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    let collapsed = collapse_whitespace(&replaced);

    let stripped = LEADING_ARTICLES
        .iter()
        .find_map(|article| collapsed.strip_prefix(article))
        .unwrap_or(collapsed.as_str());

    stripped.trim().to_string()
}

/// Normalize an author: lowercase, collapsed whitespace, and
/// "Last, First" reordered to "First Last".
pub fn normalize_author(author: &str) -> String {
    let normalized = collapse_whitespace(author.to_lowercase().trim());

    if normalized.contains(',') {
        let parts: Vec<&str> = normalized.split(',').map(str::trim).collect();
        if let [last, first] = parts.as_slice() {
            return format!("{first} {last}");
        }
    }

    normalized
}

/// Replace every whitespace run with a single space. Leading and trailing
/// whitespace is kept as one space.
fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_space = false;
    for c in input.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}
