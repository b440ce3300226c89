//! Data model for Readwise API entities.
//!
//! Identifiers are assigned by Readwise, never locally. Deserialization is
//! lenient where the API is sloppy: malformed timestamps and unknown
//! location kinds decode to `None` instead of failing the whole page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Where a highlight was originally captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightLocation {
    Kindle,
    Instapaper,
    Pocket,
    Ibooks,
    Manual,
    Twitter,
    Readwise,
    Airr,
    Matter,
    Omnivore,
}

impl HighlightLocation {
    /// String stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kindle => "kindle",
            Self::Instapaper => "instapaper",
            Self::Pocket => "pocket",
            Self::Ibooks => "ibooks",
            Self::Manual => "manual",
            Self::Twitter => "twitter",
            Self::Readwise => "readwise",
            Self::Airr => "airr",
            Self::Matter => "matter",
            Self::Omnivore => "omnivore",
        }
    }

    /// Parse from the database / API string. Unknown values map to `None`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "kindle" => Some(Self::Kindle),
            "instapaper" => Some(Self::Instapaper),
            "pocket" => Some(Self::Pocket),
            "ibooks" => Some(Self::Ibooks),
            "manual" => Some(Self::Manual),
            "twitter" => Some(Self::Twitter),
            "readwise" => Some(Self::Readwise),
            "airr" => Some(Self::Airr),
            "matter" => Some(Self::Matter),
            "omnivore" => Some(Self::Omnivore),
            _ => None,
        }
    }
}

/// A tag shared between books and highlights.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
}

/// A book (or article, tweet thread, ...) that highlights belong to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub num_highlights: i64,
    #[serde(default)]
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub highlights_url: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub asin: Option<String>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub last_highlight_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// A single highlight, always owned by a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Highlight {
    pub id: i64,
    pub text: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<i64>,
    #[serde(default, deserialize_with = "lenient_location")]
    pub location_type: Option<HighlightLocation>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub book_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub highlighted_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_datetime")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Full book data when the endpoint embeds it; saves a fetch.
    #[serde(default)]
    pub book: Option<Book>,
}

/// One page of a paginated listing. `next` is an absolute URL.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
}

/// Filter for book listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookFilter {
    pub updated_after: Option<DateTime<Utc>>,
}

/// Filter for highlight listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighlightFilter {
    pub updated_after: Option<DateTime<Utc>>,
    pub highlighted_after: Option<DateTime<Utc>>,
    pub book_id: Option<i64>,
}

fn lenient_datetime<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_datetime))
}

fn lenient_location<'de, D>(deserializer: D) -> Result<Option<HighlightLocation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(HighlightLocation::from_str))
}

/// Parse an RFC 3339 timestamp, tolerating a bare `Z` suffix and missing
/// offsets the way the API emits them. Malformed input becomes `None`.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .ok()
}
