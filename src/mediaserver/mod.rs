//! Media-server abstraction.
//!
//! This module defines the [`MediaServerClient`] trait that all media-server
//! backends (Komga, Kavita, etc.) must implement, the DTOs read from the
//! server, and the metadata update types written back to it.
//!
//! Every field on an update is optional: absence means "do not touch". Each
//! writable field is paired with a same-named `*_lock` flag meaning the field
//! is protected from future automatic overwrite. The lock-aware merge policy
//! lives in [`crate::metadata::merge`]; this layer only transports state.

pub mod komga;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shiori_common::{
    Author, Image, MediaServerBookId, MediaServerLibraryId, MediaServerSeriesId, Result,
    SeriesStatus, WebLink,
};

// ---------------------------------------------------------------------------
// Read DTOs
// ---------------------------------------------------------------------------

/// One page of a paged media-server listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page_number: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.total_pages == 0 || self.page_number + 1 >= self.total_pages
    }
}

#[derive(Debug, Clone)]
pub struct MediaServerLibrary {
    pub id: MediaServerLibraryId,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MediaServerSeries {
    pub id: MediaServerSeriesId,
    pub library_id: MediaServerLibraryId,
    /// Filesystem-derived series name; the match query starts from this.
    pub name: String,
    pub book_count: u32,
    pub metadata: MediaServerSeriesMetadata,
}

/// Current series metadata on the server, including per-field lock state.
#[derive(Debug, Clone, Default)]
pub struct MediaServerSeriesMetadata {
    pub title: Option<String>,
    pub title_sort: Option<String>,
    pub status: Option<SeriesStatus>,
    pub summary: Option<String>,
    pub publisher: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub age_rating: Option<u16>,
    pub language: Option<String>,
    pub total_book_count: Option<u32>,
    pub release_year: Option<i32>,
    pub links: Vec<WebLink>,

    pub title_lock: bool,
    pub title_sort_lock: bool,
    pub status_lock: bool,
    pub summary_lock: bool,
    pub publisher_lock: bool,
    pub genres_lock: bool,
    pub tags_lock: bool,
    pub age_rating_lock: bool,
    pub language_lock: bool,
    pub total_book_count_lock: bool,
    pub release_year_lock: bool,
    pub links_lock: bool,
}

#[derive(Debug, Clone)]
pub struct MediaServerBook {
    pub id: MediaServerBookId,
    pub series_id: MediaServerSeriesId,
    /// Filesystem-derived book name, input to the number parser.
    pub name: String,
    pub number: Option<f64>,
    pub metadata: MediaServerBookMetadata,
}

/// Current book metadata on the server, including per-field lock state.
#[derive(Debug, Clone, Default)]
pub struct MediaServerBookMetadata {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub number: Option<String>,
    pub number_sort: Option<f64>,
    pub release_date: Option<NaiveDate>,
    pub authors: Vec<Author>,
    pub tags: Vec<String>,
    pub isbn: Option<String>,
    pub links: Vec<WebLink>,

    pub title_lock: bool,
    pub summary_lock: bool,
    pub number_lock: bool,
    pub number_sort_lock: bool,
    pub release_date_lock: bool,
    pub authors_lock: bool,
    pub tags_lock: bool,
    pub isbn_lock: bool,
    pub links_lock: bool,
}

// ---------------------------------------------------------------------------
// Update DTOs
// ---------------------------------------------------------------------------

/// Series metadata update. `None` fields are left untouched on the server.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaServerSeriesMetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_sort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SeriesStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_rating: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_book_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<WebLink>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_sort_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genres_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_rating_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_book_count_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links_lock: Option<bool>,
}

impl MediaServerSeriesMetadataUpdate {
    /// An update that clears every field back to defaults and unconditionally
    /// unlocks everything. The title reverts to the filesystem series name.
    pub fn reset(original_name: &str) -> Self {
        Self {
            title: Some(original_name.to_string()),
            title_sort: Some(original_name.to_string()),
            status: Some(SeriesStatus::Ongoing),
            summary: Some(String::new()),
            publisher: Some(String::new()),
            genres: Some(Vec::new()),
            tags: Some(Vec::new()),
            age_rating: None,
            language: Some(String::new()),
            total_book_count: None,
            links: Some(Vec::new()),

            title_lock: Some(false),
            title_sort_lock: Some(false),
            status_lock: Some(false),
            summary_lock: Some(false),
            publisher_lock: Some(false),
            genres_lock: Some(false),
            tags_lock: Some(false),
            age_rating_lock: Some(false),
            language_lock: Some(false),
            total_book_count_lock: Some(false),
            links_lock: Some(false),
        }
    }
}

/// Book metadata update. `None` fields are left untouched on the server.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaServerBookMetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_sort: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<Author>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<WebLink>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_sort_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authors_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn_lock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links_lock: Option<bool>,
}

impl MediaServerBookMetadataUpdate {
    /// Clear every book field and unlock everything.
    pub fn reset(original_name: &str) -> Self {
        Self {
            title: Some(original_name.to_string()),
            summary: Some(String::new()),
            number: None,
            number_sort: None,
            release_date: None,
            authors: Some(Vec::new()),
            tags: Some(Vec::new()),
            isbn: Some(String::new()),
            links: Some(Vec::new()),

            title_lock: Some(false),
            summary_lock: Some(false),
            number_lock: Some(false),
            number_sort_lock: Some(false),
            release_date_lock: Some(false),
            authors_lock: Some(false),
            tags_lock: Some(false),
            isbn_lock: Some(false),
            links_lock: Some(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Async trait implemented by every media-server backend.
///
/// All operations are request/response; implementations must be safe for
/// concurrent use by multiple jobs (stateless or internally synchronized).
#[async_trait]
pub trait MediaServerClient: Send + Sync {
    async fn get_series(&self, series_id: &MediaServerSeriesId) -> Result<MediaServerSeries>;

    /// Page through the series of one library. Pages are zero-indexed.
    async fn get_library_series(
        &self,
        library_id: &MediaServerLibraryId,
        page: u32,
    ) -> Result<Page<MediaServerSeries>>;

    async fn get_series_books(
        &self,
        series_id: &MediaServerSeriesId,
    ) -> Result<Vec<MediaServerBook>>;

    async fn get_library(&self, library_id: &MediaServerLibraryId)
        -> Result<MediaServerLibrary>;

    async fn get_libraries(&self) -> Result<Vec<MediaServerLibrary>>;

    async fn update_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        update: &MediaServerSeriesMetadataUpdate,
    ) -> Result<()>;

    async fn update_book_metadata(
        &self,
        book_id: &MediaServerBookId,
        update: &MediaServerBookMetadataUpdate,
    ) -> Result<()>;

    async fn upload_series_thumbnail(
        &self,
        series_id: &MediaServerSeriesId,
        thumbnail: &Image,
    ) -> Result<()>;

    async fn upload_book_thumbnail(
        &self,
        book_id: &MediaServerBookId,
        thumbnail: &Image,
    ) -> Result<()>;

    async fn delete_series_thumbnails(&self, series_id: &MediaServerSeriesId) -> Result<()>;

    async fn delete_book_thumbnails(&self, book_id: &MediaServerBookId) -> Result<()>;

    /// Ask the server to re-derive its own metadata for one series.
    async fn refresh_metadata(
        &self,
        library_id: &MediaServerLibraryId,
        series_id: &MediaServerSeriesId,
    ) -> Result<()>;
}
