//! MangaDex metadata provider.
//!
//! Wraps the MangaDex v5 REST API. Series map onto MangaDex manga entries;
//! books map onto volume covers, which is the closest thing MangaDex has to
//! per-volume records. Shares the rate-limit/429-retry shape with the other
//! providers.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use shiori_common::{
    Author, AuthorRole, BookMetadata, BookRange, Error, Image, MatchQuery, ProviderBookId,
    ProviderBookMetadata, ProviderSeriesId, ProviderSeriesMetadata, Result, SeriesBook,
    SeriesMetadata, SeriesSearchResult, SeriesStatus, SeriesTitle, TitleType, WebLink,
};
use tracing::{debug, warn};

use crate::metadata::matcher::NameSimilarityMatcher;
use crate::providers::{CoreProvider, MetadataProvider};

const DEFAULT_BASE_URL: &str = "https://api.mangadex.org";
const DEFAULT_FILES_URL: &str = "https://uploads.mangadex.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const COVER_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MangaDexConfig {
    pub base_url: String,
    /// Base URL for cover image files.
    pub files_url: String,
    pub fetch_series_covers: bool,
    pub fetch_book_covers: bool,
}

impl Default for MangaDexConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            files_url: DEFAULT_FILES_URL.to_string(),
            fetch_series_covers: false,
            fetch_book_covers: false,
        }
    }
}

pub struct MangaDexProvider {
    client: reqwest::Client,
    config: MangaDexConfig,
    matcher: NameSimilarityMatcher,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl MangaDexProvider {
    pub fn new(config: MangaDexConfig, matcher: NameSimilarityMatcher) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("shiori/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::invalid_configuration(format!("http client: {e}")))?;

        let quota = Quota::per_second(NonZeroU32::new(5).unwrap_or(NonZeroU32::MIN));
        Ok(Self {
            client,
            config,
            matcher,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let mut retries = 0u32;
        loop {
            self.rate_limiter.until_ready().await;
            debug!(url = %url, "MangaDex GET");

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::upstream(format!("mangadex request failed: {e}")))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RETRIES {
                retries += 1;
                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(retry = retries, wait_secs = wait, "MangaDex returned 429, backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(Error::not_found("mangadex entity"));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::upstream(format!("mangadex {status}: {body}")));
            }
            return Ok(response);
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(format!("mangadex response parse failed: {e}")))
    }

    async fn search_manga(&self, title: &str, limit: u32) -> Result<Vec<Manga>> {
        let url = format!(
            "{}/manga?title={}&limit={limit}&includes[]=author&includes[]=artist&includes[]=cover_art",
            self.config.base_url,
            urlencoding(title)
        );
        let response: CollectionResponse<Manga> = self.get_json(&url).await?;
        Ok(response.data)
    }

    async fn get_manga(&self, id: &str) -> Result<Manga> {
        let url = format!(
            "{}/manga/{id}?includes[]=author&includes[]=artist&includes[]=cover_art",
            self.config.base_url
        );
        let response: EntityResponse<Manga> = self.get_json(&url).await?;
        Ok(response.data)
    }

    /// Volume covers, used as the series' book list.
    async fn get_covers(&self, manga_id: &str) -> Result<Vec<Cover>> {
        let url = format!(
            "{}/cover?manga[]={manga_id}&limit={COVER_PAGE_LIMIT}&order[volume]=asc",
            self.config.base_url
        );
        let response: CollectionResponse<Cover> = self.get_json(&url).await?;
        Ok(response.data)
    }

    async fn get_cover(&self, cover_id: &str) -> Result<Cover> {
        let url = format!("{}/cover/{cover_id}", self.config.base_url);
        let response: EntityResponse<Cover> = self.get_json(&url).await?;
        Ok(response.data)
    }

    fn cover_file_url(&self, manga_id: &str, file_name: &str) -> String {
        format!("{}/covers/{manga_id}/{file_name}", self.config.files_url)
    }

    async fn fetch_image(&self, url: &str) -> Option<Image> {
        match self.get(url).await {
            Ok(response) => match response.bytes().await {
                Ok(bytes) if !bytes.is_empty() => Some(Image(bytes.to_vec())),
                Ok(_) => None,
                Err(e) => {
                    warn!(url = %url, error = %e, "MangaDex image read failed");
                    None
                }
            },
            Err(e) => {
                warn!(url = %url, error = %e, "MangaDex image fetch failed");
                None
            }
        }
    }

    async fn series_from_manga(&self, manga: Manga) -> Result<ProviderSeriesMetadata> {
        let covers = match self.get_covers(&manga.id).await {
            Ok(covers) => covers,
            Err(e) => {
                warn!(manga = %manga.id, error = %e, "MangaDex cover listing failed");
                Vec::new()
            }
        };
        let books = covers
            .iter()
            .map(|cover| SeriesBook {
                id: ProviderBookId::new(cover.id.clone()),
                number: cover
                    .attributes
                    .volume
                    .as_deref()
                    .and_then(|v| v.parse::<f64>().ok())
                    .map(BookRange::single),
                name: cover.attributes.volume.as_ref().map(|v| format!("Volume {v}")),
                edition: None,
            })
            .collect();

        let thumbnail = if self.config.fetch_series_covers {
            match manga.cover_file_name() {
                Some(file_name) => {
                    let url = self.cover_file_url(&manga.id, &file_name);
                    self.fetch_image(&url).await
                }
                None => None,
            }
        } else {
            None
        };

        let id = ProviderSeriesId::new(manga.id.clone());
        let mut metadata = manga.into_series_metadata();
        metadata.thumbnail = thumbnail;
        Ok(ProviderSeriesMetadata {
            id,
            metadata,
            books,
        })
    }
}

#[async_trait]
impl MetadataProvider for MangaDexProvider {
    fn provider_name(&self) -> CoreProvider {
        CoreProvider::MangaDex
    }

    async fn search_series(&self, name: &str, limit: usize) -> Result<Vec<SeriesSearchResult>> {
        let found = self.search_manga(name, limit.min(100) as u32).await?;
        Ok(found
            .into_iter()
            .take(limit)
            .map(|manga| {
                let image_url = manga
                    .cover_file_name()
                    .map(|f| self.cover_file_url(&manga.id, &f));
                SeriesSearchResult {
                    provider: CoreProvider::MangaDex.to_string(),
                    result_id: ProviderSeriesId::new(manga.id.clone()),
                    url: Some(format!("https://mangadex.org/title/{}", manga.id)),
                    title: manga.display_title(),
                    image_url,
                }
            })
            .collect())
    }

    async fn get_series_metadata(
        &self,
        series_id: &ProviderSeriesId,
    ) -> Result<ProviderSeriesMetadata> {
        let manga = self.get_manga(series_id.as_str()).await?;
        self.series_from_manga(manga).await
    }

    async fn get_book_metadata(
        &self,
        series_id: &ProviderSeriesId,
        book_id: &ProviderBookId,
    ) -> Result<ProviderBookMetadata> {
        let cover = self.get_cover(book_id.as_str()).await?;
        let number = cover
            .attributes
            .volume
            .as_deref()
            .and_then(|v| v.parse::<f64>().ok())
            .map(BookRange::single);

        let thumbnail = if self.config.fetch_book_covers {
            let url = self.cover_file_url(series_id.as_str(), &cover.attributes.file_name);
            self.fetch_image(&url).await
        } else {
            None
        };

        Ok(ProviderBookMetadata {
            id: book_id.clone(),
            metadata: BookMetadata {
                title: cover.attributes.volume.map(|v| format!("Volume {v}")),
                number,
                number_sort: number.map(|r| r.start),
                thumbnail,
                ..Default::default()
            },
        })
    }

    async fn match_series_metadata(
        &self,
        query: &MatchQuery,
    ) -> Result<Option<ProviderSeriesMetadata>> {
        let candidates = self.search_manga(&query.series_name, 10).await?;
        for candidate in candidates {
            if let Some(year) = query.release_year {
                if candidate.attributes.year.is_some_and(|y| y != year) {
                    continue;
                }
            }
            if !self
                .matcher
                .matches(&query.series_name, &candidate.all_titles())
            {
                continue;
            }
            debug!(manga = %candidate.id, "MangaDex candidate accepted");
            return self.series_from_manga(candidate).await.map(Some);
        }
        Ok(None)
    }

    async fn get_series_cover(&self, series_id: &ProviderSeriesId) -> Result<Option<Image>> {
        let manga = self.get_manga(series_id.as_str()).await?;
        let Some(file_name) = manga.cover_file_name() else {
            return Ok(None);
        };
        let url = self.cover_file_url(&manga.id, &file_name);
        Ok(self.fetch_image(&url).await)
    }
}

fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0x0f) as usize]));
            }
        }
    }
    out
}

const HEX: [u8; 16] = *b"0123456789ABCDEF";

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CollectionResponse<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct EntityResponse<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Manga {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    #[serde(default)]
    title: LocalizedString,
    #[serde(default, rename = "altTitles")]
    alt_titles: Vec<LocalizedString>,
    #[serde(default)]
    description: LocalizedString,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default, rename = "contentRating")]
    content_rating: Option<String>,
    #[serde(default)]
    tags: Vec<MangaTag>,
    #[serde(default, rename = "lastVolume")]
    last_volume: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(transparent)]
struct LocalizedString(std::collections::BTreeMap<String, String>);

impl LocalizedString {
    fn get(&self, language: &str) -> Option<&str> {
        self.0.get(language).map(String::as_str)
    }

    fn any(&self) -> Option<&str> {
        self.0.values().next().map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct MangaTag {
    attributes: MangaTagAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaTagAttributes {
    #[serde(default)]
    name: LocalizedString,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Option<RelationshipAttributes>,
}

#[derive(Debug, Deserialize)]
struct RelationshipAttributes {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "fileName")]
    file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Cover {
    id: String,
    attributes: CoverAttributes,
}

#[derive(Debug, Deserialize)]
struct CoverAttributes {
    #[serde(default)]
    volume: Option<String>,
    #[serde(rename = "fileName")]
    file_name: String,
}

impl Manga {
    fn display_title(&self) -> String {
        self.attributes
            .title
            .get("en")
            .or_else(|| self.attributes.title.any())
            .unwrap_or_default()
            .to_string()
    }

    /// Every title variant, for name matching.
    fn all_titles(&self) -> Vec<String> {
        let mut titles: Vec<String> = self
            .attributes
            .title
            .0
            .values()
            .cloned()
            .collect();
        for alt in &self.attributes.alt_titles {
            titles.extend(alt.0.values().cloned());
        }
        titles
    }

    fn cover_file_name(&self) -> Option<String> {
        self.relationships
            .iter()
            .filter(|r| r.kind == "cover_art")
            .find_map(|r| r.attributes.as_ref().and_then(|a| a.file_name.clone()))
    }

    fn authors(&self) -> Vec<Author> {
        self.relationships
            .iter()
            .filter_map(|r| {
                let role = match r.kind.as_str() {
                    "author" => AuthorRole::Writer,
                    "artist" => AuthorRole::Penciller,
                    _ => return None,
                };
                let name = r.attributes.as_ref()?.name.clone()?;
                Some(Author { name, role })
            })
            .collect()
    }

    fn into_series_metadata(self) -> SeriesMetadata {
        let authors = self.authors();

        let mut titles = Vec::new();
        if let Some(en) = self.attributes.title.get("en") {
            titles.push(SeriesTitle {
                title: en.to_string(),
                title_type: Some(TitleType::Localized),
                language: Some("en".to_string()),
            });
        }
        if let Some(ja) = self.attributes.title.get("ja") {
            titles.push(SeriesTitle {
                title: ja.to_string(),
                title_type: Some(TitleType::Native),
                language: Some("ja".to_string()),
            });
        }
        for alt in &self.attributes.alt_titles {
            if let Some(romaji) = alt.get("ja-ro") {
                titles.push(SeriesTitle {
                    title: romaji.to_string(),
                    title_type: Some(TitleType::Romaji),
                    language: Some("ja-ro".to_string()),
                });
                break;
            }
        }
        if titles.is_empty() {
            if let Some(any) = self.attributes.title.any() {
                titles.push(SeriesTitle {
                    title: any.to_string(),
                    title_type: None,
                    language: None,
                });
            }
        }

        let status = match self.attributes.status.as_deref() {
            Some("ongoing") => Some(SeriesStatus::Ongoing),
            Some("completed") => Some(SeriesStatus::Ended),
            Some("hiatus") => Some(SeriesStatus::Hiatus),
            Some("cancelled") => Some(SeriesStatus::Abandoned),
            _ => None,
        };

        let mut genres = Vec::new();
        let mut tags = Vec::new();
        for tag in &self.attributes.tags {
            let Some(name) = tag.attributes.name.get("en").or_else(|| tag.attributes.name.any())
            else {
                continue;
            };
            if tag.attributes.group.as_deref() == Some("genre") {
                genres.push(name.to_string());
            } else {
                tags.push(name.to_string());
            }
        }

        let age_rating = match self.attributes.content_rating.as_deref() {
            Some("erotica") | Some("pornographic") => Some(18),
            Some("suggestive") => Some(16),
            _ => None,
        };

        let total_book_count = self
            .attributes
            .last_volume
            .as_deref()
            .and_then(|v| v.parse().ok());

        SeriesMetadata {
            titles,
            status,
            summary: self
                .attributes
                .description
                .get("en")
                .or_else(|| self.attributes.description.any())
                .map(str::to_string),
            publishers: Vec::new(),
            authors,
            genres,
            tags,
            release_date: self.attributes.year.map(|year| shiori_common::ReleaseDate {
                year: Some(year),
                month: None,
                day: None,
            }),
            total_book_count,
            links: vec![WebLink {
                label: "MangaDex".to_string(),
                url: format!("https://mangadex.org/title/{}", self.id),
            }],
            score: None,
            age_rating,
            thumbnail: None,
        }
    }
}
