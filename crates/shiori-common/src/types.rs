//! Metadata value types shared by providers and the media-server layer.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ids::{ProviderBookId, ProviderSeriesId};

/// Kind of library content a provider is asked about. Some providers only
/// carry a subset of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Manga,
    Novel,
    Comic,
}

/// Publication status of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeriesStatus {
    Ongoing,
    Ended,
    Abandoned,
    Hiatus,
    Completed,
}

/// Which form of a series title a [`SeriesTitle`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TitleType {
    /// The provider's primary display title.
    Localized,
    Romaji,
    Native,
}

/// One typed title variant of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesTitle {
    pub title: String,
    pub title_type: Option<TitleType>,
    /// BCP-47 tag when the provider reports one.
    pub language: Option<String>,
}

/// Credit role for a person attached to a series or book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorRole {
    Writer,
    Cover,
    Penciller,
    Inker,
    Colorist,
    Letterer,
    Editor,
    Translator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub role: AuthorRole,
}

/// Whether a publisher is the original one or a localizing licensee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublisherType {
    Original,
    Localized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
    pub name: String,
    pub publisher_type: PublisherType,
    pub language: Option<String>,
}

/// Partial calendar date; providers often know only the year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReleaseDate {
    pub year: Option<i32>,
    pub month: Option<u8>,
    pub day: Option<u8>,
}

/// External link attached to series or book metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebLink {
    pub label: String,
    pub url: String,
}

/// Raw image bytes fetched from a provider. Passed through to the media
/// server without decoding.
#[derive(Clone, PartialEq, Eq)]
pub struct Image(pub Vec<u8>);

impl Image {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Image({} bytes)", self.0.len())
    }
}

/// An inclusive numeric range of volumes, chapters, or book numbers.
/// Fractional endpoints are valid ("5.5"). `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookRange {
    pub start: f64,
    pub end: f64,
}

impl BookRange {
    /// Build a range, swapping the endpoints if they arrive out of order.
    pub fn new(start: f64, end: f64) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Single-point range.
    pub fn single(number: f64) -> Self {
        Self {
            start: number,
            end: number,
        }
    }
}

impl From<f64> for BookRange {
    fn from(number: f64) -> Self {
        Self::single(number)
    }
}

/// Input to provider best-match resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    pub series_name: String,
    pub release_year: Option<i32>,
}

impl MatchQuery {
    pub fn new(series_name: impl Into<String>) -> Self {
        Self {
            series_name: series_name.into(),
            release_year: None,
        }
    }
}

/// A single entry from a provider search, shown to the user for manual
/// identification. Ephemeral; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesSearchResult {
    /// Name of the provider that produced this result.
    pub provider: String,
    pub result_id: ProviderSeriesId,
    pub title: String,
    pub url: Option<String>,
    pub image_url: Option<String>,
}

/// Normalized series-level metadata from one provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesMetadata {
    pub titles: Vec<SeriesTitle>,
    pub status: Option<SeriesStatus>,
    pub summary: Option<String>,
    pub publishers: Vec<Publisher>,
    pub authors: Vec<Author>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub release_date: Option<ReleaseDate>,
    pub total_book_count: Option<u32>,
    pub links: Vec<WebLink>,
    pub score: Option<f64>,
    pub age_rating: Option<u16>,
    pub thumbnail: Option<Image>,
}

/// One book listed under a provider series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesBook {
    pub id: ProviderBookId,
    pub number: Option<BookRange>,
    pub name: Option<String>,
    pub edition: Option<String>,
}

/// Full series payload from one provider: the metadata plus its book list.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSeriesMetadata {
    pub id: ProviderSeriesId,
    pub metadata: SeriesMetadata,
    pub books: Vec<SeriesBook>,
}

/// Normalized book-level metadata from one provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMetadata {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub number: Option<BookRange>,
    pub number_sort: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub authors: Vec<Author>,
    pub tags: Vec<String>,
    pub isbn: Option<String>,
    pub links: Vec<WebLink>,
    pub age_rating: Option<u16>,
    pub thumbnail: Option<Image>,
}

/// Full book payload from one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderBookMetadata {
    pub id: ProviderBookId,
    pub metadata: BookMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_range_orders_endpoints() {
        let range = BookRange::new(14.0, 12.0);
        assert_eq!(range.start, 12.0);
        assert_eq!(range.end, 14.0);
    }

    #[test]
    fn book_range_single() {
        let range = BookRange::from(5.5);
        assert_eq!(range.start, 5.5);
        assert_eq!(range.end, 5.5);
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&SeriesStatus::Ongoing).unwrap();
        assert_eq!(json, "\"ONGOING\"");
    }
}
