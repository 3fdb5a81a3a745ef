//! Komga media-server client.
//!
//! Wraps the Komga REST API (`/api/v1`) with API-key authentication and
//! translates HTTP failures into the shared error taxonomy: 404 becomes
//! [`Error::NotFound`], other 4xx on writes become [`Error::WriteConflict`],
//! and network errors / 5xx become [`Error::UpstreamUnavailable`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde::Deserialize;
use shiori_common::{
    Author, AuthorRole, Error, Image, MediaServerBookId, MediaServerLibraryId,
    MediaServerSeriesId, Result, SeriesStatus, WebLink,
};
use tracing::debug;

use super::{
    MediaServerBook, MediaServerBookMetadata, MediaServerBookMetadataUpdate, MediaServerClient,
    MediaServerLibrary, MediaServerSeries, MediaServerSeriesMetadata,
    MediaServerSeriesMetadataUpdate, Page,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PAGE_SIZE: u32 = 500;

// ---------------------------------------------------------------------------
// Komga API response types (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct KomgaPage<T> {
    content: Vec<T>,
    number: u32,
    #[serde(rename = "totalPages")]
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaLibrary {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaSeries {
    id: String,
    library_id: String,
    name: String,
    books_count: u32,
    metadata: KomgaSeriesMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaSeriesMetadata {
    title: Option<String>,
    title_sort: Option<String>,
    status: Option<String>,
    summary: Option<String>,
    publisher: Option<String>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    age_rating: Option<u16>,
    language: Option<String>,
    total_book_count: Option<u32>,
    #[serde(default)]
    links: Vec<KomgaWebLink>,

    #[serde(default)]
    title_lock: bool,
    #[serde(default)]
    title_sort_lock: bool,
    #[serde(default)]
    status_lock: bool,
    #[serde(default)]
    summary_lock: bool,
    #[serde(default)]
    publisher_lock: bool,
    #[serde(default)]
    genres_lock: bool,
    #[serde(default)]
    tags_lock: bool,
    #[serde(default)]
    age_rating_lock: bool,
    #[serde(default)]
    language_lock: bool,
    #[serde(default)]
    total_book_count_lock: bool,
    #[serde(default)]
    links_lock: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaBook {
    id: String,
    series_id: String,
    name: String,
    number: Option<f64>,
    metadata: KomgaBookMetadata,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaBookMetadata {
    title: Option<String>,
    summary: Option<String>,
    number: Option<String>,
    number_sort: Option<f64>,
    release_date: Option<NaiveDate>,
    #[serde(default)]
    authors: Vec<KomgaAuthor>,
    #[serde(default)]
    tags: Vec<String>,
    isbn: Option<String>,
    #[serde(default)]
    links: Vec<KomgaWebLink>,

    #[serde(default)]
    title_lock: bool,
    #[serde(default)]
    summary_lock: bool,
    #[serde(default)]
    number_lock: bool,
    #[serde(default)]
    number_sort_lock: bool,
    #[serde(default)]
    release_date_lock: bool,
    #[serde(default)]
    authors_lock: bool,
    #[serde(default)]
    tags_lock: bool,
    #[serde(default)]
    isbn_lock: bool,
    #[serde(default)]
    links_lock: bool,
}

#[derive(Debug, Deserialize)]
struct KomgaAuthor {
    name: String,
    role: String,
}

#[derive(Debug, Deserialize)]
struct KomgaWebLink {
    label: String,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KomgaThumbnail {
    id: String,
    r#type: String,
}

// ---------------------------------------------------------------------------
// DTO mapping
// ---------------------------------------------------------------------------

fn parse_status(status: &str) -> Option<SeriesStatus> {
    match status {
        "ONGOING" => Some(SeriesStatus::Ongoing),
        "ENDED" => Some(SeriesStatus::Ended),
        "ABANDONED" => Some(SeriesStatus::Abandoned),
        "HIATUS" => Some(SeriesStatus::Hiatus),
        _ => None,
    }
}

fn parse_role(role: &str) -> Option<AuthorRole> {
    match role.to_ascii_lowercase().as_str() {
        "writer" => Some(AuthorRole::Writer),
        "cover" => Some(AuthorRole::Cover),
        "penciller" => Some(AuthorRole::Penciller),
        "inker" => Some(AuthorRole::Inker),
        "colorist" => Some(AuthorRole::Colorist),
        "letterer" => Some(AuthorRole::Letterer),
        "editor" => Some(AuthorRole::Editor),
        "translator" => Some(AuthorRole::Translator),
        _ => None,
    }
}

fn map_links(links: Vec<KomgaWebLink>) -> Vec<WebLink> {
    links
        .into_iter()
        .map(|l| WebLink {
            label: l.label,
            url: l.url,
        })
        .collect()
}

impl From<KomgaSeries> for MediaServerSeries {
    fn from(series: KomgaSeries) -> Self {
        let m = series.metadata;
        Self {
            id: MediaServerSeriesId::new(series.id),
            library_id: MediaServerLibraryId::new(series.library_id),
            name: series.name,
            book_count: series.books_count,
            metadata: MediaServerSeriesMetadata {
                title: m.title,
                title_sort: m.title_sort,
                status: m.status.as_deref().and_then(parse_status),
                summary: m.summary.filter(|s| !s.is_empty()),
                publisher: m.publisher.filter(|s| !s.is_empty()),
                genres: m.genres,
                tags: m.tags,
                age_rating: m.age_rating,
                language: m.language.filter(|s| !s.is_empty()),
                total_book_count: m.total_book_count,
                release_year: None,
                links: map_links(m.links),

                title_lock: m.title_lock,
                title_sort_lock: m.title_sort_lock,
                status_lock: m.status_lock,
                summary_lock: m.summary_lock,
                publisher_lock: m.publisher_lock,
                genres_lock: m.genres_lock,
                tags_lock: m.tags_lock,
                age_rating_lock: m.age_rating_lock,
                language_lock: m.language_lock,
                total_book_count_lock: m.total_book_count_lock,
                release_year_lock: false,
                links_lock: m.links_lock,
            },
        }
    }
}

impl From<KomgaBook> for MediaServerBook {
    fn from(book: KomgaBook) -> Self {
        let m = book.metadata;
        Self {
            id: MediaServerBookId::new(book.id),
            series_id: MediaServerSeriesId::new(book.series_id),
            name: book.name,
            number: book.number,
            metadata: MediaServerBookMetadata {
                title: m.title,
                summary: m.summary.filter(|s| !s.is_empty()),
                number: m.number,
                number_sort: m.number_sort,
                release_date: m.release_date,
                authors: m
                    .authors
                    .into_iter()
                    .filter_map(|a| {
                        parse_role(&a.role).map(|role| Author { name: a.name, role })
                    })
                    .collect(),
                tags: m.tags,
                isbn: m.isbn.filter(|s| !s.is_empty()),
                links: map_links(m.links),

                title_lock: m.title_lock,
                summary_lock: m.summary_lock,
                number_lock: m.number_lock,
                number_sort_lock: m.number_sort_lock,
                release_date_lock: m.release_date_lock,
                authors_lock: m.authors_lock,
                tags_lock: m.tags_lock,
                isbn_lock: m.isbn_lock,
                links_lock: m.links_lock,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Komga REST client.
pub struct KomgaClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl KomgaClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                reqwest::Client::new()
            });

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-API-Key", &self.api_key)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::upstream(format!("komga: {e}")))?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(Error::not_found("komga: resource not found")),
            s if s.is_client_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::write_conflict(format!("komga: {s}: {body}")))
            }
            s => Err(Error::upstream(format!("komga: server returned {s}"))),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.request(reqwest::Method::GET, path)).await?;
        response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("komga: invalid response body: {e}")))
    }

    /// Outgoing status values use Komga's enum, which has no COMPLETED.
    fn adapt_series_update(
        update: &MediaServerSeriesMetadataUpdate,
    ) -> MediaServerSeriesMetadataUpdate {
        let mut update = update.clone();
        if update.status == Some(SeriesStatus::Completed) {
            update.status = Some(SeriesStatus::Ended);
        }
        update
    }

    async fn delete_thumbnails(&self, collection: &str, id: &str) -> Result<()> {
        let thumbnails: Vec<KomgaThumbnail> = self
            .get_json(&format!("/{collection}/{id}/thumbnails"))
            .await?;

        for thumbnail in thumbnails
            .iter()
            .filter(|t| t.r#type == "USER_UPLOADED" || t.r#type == "SIDECAR")
        {
            self.send(self.request(
                reqwest::Method::DELETE,
                &format!("/{collection}/{id}/thumbnails/{}", thumbnail.id),
            ))
            .await?;
        }
        Ok(())
    }

    async fn upload_thumbnail(&self, collection: &str, id: &str, thumbnail: &Image) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(thumbnail.0.clone())
            .file_name("cover.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| Error::upstream(format!("komga: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("selected", "true");

        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/{collection}/{id}/thumbnails"),
            )
            .multipart(form),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MediaServerClient for KomgaClient {
    async fn get_series(&self, series_id: &MediaServerSeriesId) -> Result<MediaServerSeries> {
        let series: KomgaSeries = self.get_json(&format!("/series/{series_id}")).await?;
        Ok(series.into())
    }

    async fn get_library_series(
        &self,
        library_id: &MediaServerLibraryId,
        page: u32,
    ) -> Result<Page<MediaServerSeries>> {
        debug!(library_id = %library_id, page, "Fetching library series page");
        let komga_page: KomgaPage<KomgaSeries> = self
            .get_json(&format!(
                "/series?library_id={library_id}&page={page}&size={PAGE_SIZE}"
            ))
            .await?;

        Ok(Page {
            content: komga_page.content.into_iter().map(Into::into).collect(),
            page_number: komga_page.number,
            total_pages: komga_page.total_pages,
        })
    }

    async fn get_series_books(
        &self,
        series_id: &MediaServerSeriesId,
    ) -> Result<Vec<MediaServerBook>> {
        let page: KomgaPage<KomgaBook> = self
            .get_json(&format!("/series/{series_id}/books?unpaged=true"))
            .await?;
        Ok(page.content.into_iter().map(Into::into).collect())
    }

    async fn get_library(
        &self,
        library_id: &MediaServerLibraryId,
    ) -> Result<MediaServerLibrary> {
        let library: KomgaLibrary = self.get_json(&format!("/libraries/{library_id}")).await?;
        Ok(MediaServerLibrary {
            id: MediaServerLibraryId::new(library.id),
            name: library.name,
        })
    }

    async fn get_libraries(&self) -> Result<Vec<MediaServerLibrary>> {
        let libraries: Vec<KomgaLibrary> = self.get_json("/libraries").await?;
        Ok(libraries
            .into_iter()
            .map(|l| MediaServerLibrary {
                id: MediaServerLibraryId::new(l.id),
                name: l.name,
            })
            .collect())
    }

    async fn update_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        update: &MediaServerSeriesMetadataUpdate,
    ) -> Result<()> {
        let body = Self::adapt_series_update(update);
        self.send(
            self.request(
                reqwest::Method::PATCH,
                &format!("/series/{series_id}/metadata"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn update_book_metadata(
        &self,
        book_id: &MediaServerBookId,
        update: &MediaServerBookMetadataUpdate,
    ) -> Result<()> {
        self.send(
            self.request(reqwest::Method::PATCH, &format!("/books/{book_id}/metadata"))
                .json(update),
        )
        .await?;
        Ok(())
    }

    async fn upload_series_thumbnail(
        &self,
        series_id: &MediaServerSeriesId,
        thumbnail: &Image,
    ) -> Result<()> {
        self.upload_thumbnail("series", series_id.as_str(), thumbnail)
            .await
    }

    async fn upload_book_thumbnail(
        &self,
        book_id: &MediaServerBookId,
        thumbnail: &Image,
    ) -> Result<()> {
        self.upload_thumbnail("books", book_id.as_str(), thumbnail)
            .await
    }

    async fn delete_series_thumbnails(&self, series_id: &MediaServerSeriesId) -> Result<()> {
        self.delete_thumbnails("series", series_id.as_str()).await
    }

    async fn delete_book_thumbnails(&self, book_id: &MediaServerBookId) -> Result<()> {
        self.delete_thumbnails("books", book_id.as_str()).await
    }

    async fn refresh_metadata(
        &self,
        _library_id: &MediaServerLibraryId,
        series_id: &MediaServerSeriesId,
    ) -> Result<()> {
        self.send(self.request(
            reqwest::Method::POST,
            &format!("/series/{series_id}/metadata/refresh"),
        ))
        .await?;
        Ok(())
    }
}
