use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

static FEATURED_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:^|\s+)(?:ft\.?|feat\.?|featuring|f/)(?:\s+.*)?$").unwrap());

/// Normalize text for filesystem use: NFKD decomposition, strip combining
/// marks, lowercase, drop hyphens, keep only ASCII alphanumerics and
/// spaces, collapse whitespace runs into single underscores, trim.
pub fn normalize_filename(text: &str) -> String {
    let decomposed: String = text.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let cleaned: String = decomposed
        .to_lowercase()
        .chars()
        .filter(|c| *c != '-')
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();

    let mut out = String::with_capacity(cleaned.len());
    let mut in_gap = false;
    for c in cleaned.chars() {
        if c.is_whitespace() {
            in_gap = true;
            continue;
        }
        if in_gap && !out.is_empty() {
            out.push('_');
        }
        in_gap = false;
        out.push(c);
    }

    out
}

/// Lowercased, trimmed form used for case-insensitive uniqueness lookups
/// (artists, collections, tags).
pub fn normalize_for_matching(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Strip a trailing "ft./feat./featuring/f/ ..." clause from an artist or
/// title string.
pub fn remove_featured_artists(text: &str) -> String {
    FEATURED_REGEX.replace(text, "").trim().to_string()
}

/// Tag keys: lowercase + trim. The display form is stored alongside.
pub fn normalize_tag(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecadeFormat {
    /// "1990s", "2000s", "2010s"
    Long,
    /// "90s", "00s", "10s"
    Short,
}

/// Explicit decade formatter. 2005 renders as "2000s" / "00s" -- no modular
/// arithmetic shortcuts.
pub fn decade_tag(year: i64, format: DecadeFormat) -> Option<String> {
    if !(1900..=2100).contains(&year) {
        return None;
    }

    let decade_start = (year / 10) * 10;
    match format {
        DecadeFormat::Long => Some(format!("{decade_start}s")),
        DecadeFormat::Short => Some(format!("{:02}s", decade_start % 100)),
    }
}
