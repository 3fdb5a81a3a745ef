//! Bangumi (bgm.tv) metadata provider.
//!
//! Wraps the Bangumi v0 REST API for manga and light-novel lookups:
//! - Token-bucket rate limiting via [`governor`].
//! - Automatic retry on HTTP 429 with `Retry-After` header support.
//! - Paginated best-match search that stops at the first accepted candidate.
//!
//! Bangumi models tankobon volumes as subjects related to a series subject;
//! this provider resolves a matched volume up to its parent series and lists
//! the related volumes as the series' books.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use shiori_common::{
    Author, AuthorRole, BookMetadata, BookRange, Error, Image, MatchQuery, MediaType,
    ProviderBookId, ProviderBookMetadata, ProviderSeriesId, ProviderSeriesMetadata, Publisher,
    PublisherType, ReleaseDate, Result, SeriesBook, SeriesMetadata, SeriesSearchResult,
    SeriesTitle, TitleType,
};
use shiori_parser::{parse_book_number, parse_volumes};
use tracing::{debug, warn};

use crate::metadata::matcher::NameSimilarityMatcher;
use crate::providers::{CoreProvider, MetadataProvider};

const DEFAULT_BASE_URL: &str = "https://api.bgm.tv";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
/// Page size used during best-match pagination.
const MATCH_PAGE_SIZE: u32 = 10;
/// How many search pages best-match is willing to walk.
const MAX_MATCH_PAGES: u32 = 3;
/// Tags below this vote count are noise.
const TAG_MIN_COUNT: u32 = 3;
const TAG_LIMIT: usize = 15;

/// Subject relation marking a tankobon volume of a series.
const RELATION_VOLUME: &str = "单行本";
/// Subject relation pointing from a volume to its series.
const RELATION_SERIES: &str = "系列";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BangumiConfig {
    pub base_url: String,
    /// Optional access token; required for NSFW-flagged subjects.
    pub token: Option<String>,
    pub media_type: MediaType,
    pub fetch_series_covers: bool,
}

impl Default for BangumiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            media_type: MediaType::Manga,
            fetch_series_covers: false,
        }
    }
}

pub struct BangumiProvider {
    client: reqwest::Client,
    config: BangumiConfig,
    matcher: NameSimilarityMatcher,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

impl BangumiProvider {
    pub fn new(config: BangumiConfig, matcher: NameSimilarityMatcher) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("shiori/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::invalid_configuration(format!("http client: {e}")))?;

        let quota = Quota::per_second(NonZeroU32::new(3).unwrap_or(NonZeroU32::MIN));
        Ok(Self {
            client,
            config,
            matcher,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    /// Send a prepared request with rate limiting, 429 retry, and status
    /// translation into the shared error taxonomy.
    async fn send(&self, build: impl Fn() -> reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let mut retries = 0u32;
        loop {
            self.rate_limiter.until_ready().await;

            let mut request = build();
            if let Some(token) = &self.config.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Error::upstream(format!("bangumi request failed: {e}")))?;

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RETRIES {
                retries += 1;
                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                warn!(retry = retries, wait_secs = wait, "Bangumi returned 429, backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND {
                return Err(Error::not_found("bangumi subject"));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::upstream(format!("bangumi {status}: {body}")));
            }
            return Ok(response);
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.config.base_url);
        debug!(url = %url, "Bangumi GET");
        self.send(|| self.client.get(&url))
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(format!("bangumi response parse failed: {e}")))
    }

    async fn search_page(&self, keyword: &str, limit: u32, offset: u32) -> Result<SearchResponse> {
        let url = format!(
            "{}/v0/search/subjects?limit={limit}&offset={offset}",
            self.config.base_url
        );
        debug!(url = %url, keyword, "Bangumi search");
        let body = json!({
            "keyword": keyword,
            "filter": { "type": [SUBJECT_TYPE_BOOK] },
        });
        self.send(|| self.client.post(&url).json(&body))
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(format!("bangumi search parse failed: {e}")))
    }

    async fn get_subject(&self, id: &str) -> Result<Subject> {
        self.get_json(&format!("/v0/subjects/{id}")).await
    }

    async fn get_related(&self, id: &str) -> Result<Vec<RelatedSubject>> {
        self.get_json(&format!("/v0/subjects/{id}/subjects")).await
    }

    /// Whether a subject's platform fits the configured media type. Subjects
    /// without a platform are kept; the name matcher has the final word.
    fn platform_matches(&self, subject: &Subject) -> bool {
        let Some(platform) = subject.platform.as_deref().filter(|p| !p.is_empty()) else {
            return true;
        };
        match self.config.media_type {
            MediaType::Manga | MediaType::Comic => {
                matches!(platform, "漫画" | "画集" | RELATION_VOLUME | RELATION_SERIES)
            }
            MediaType::Novel => matches!(platform, "小说" | RELATION_VOLUME | RELATION_SERIES),
        }
    }

    /// Resolve a matched subject to the series-level subject. A tankobon
    /// volume is walked up through its series relation; a subject that is
    /// already a series is returned as-is.
    async fn resolve_series_subject(&self, subject: Subject) -> Result<Subject> {
        if subject.series || subject.platform.as_deref() != Some(RELATION_VOLUME) {
            return Ok(subject);
        }
        let related = self.get_related(&subject.id.to_string()).await?;
        match related.into_iter().find(|r| r.relation == RELATION_SERIES) {
            Some(series) => self.get_subject(&series.id.to_string()).await,
            None => Ok(subject),
        }
    }

    async fn fetch_cover(&self, subject: &Subject) -> Option<Image> {
        let url = subject.images.as_ref()?.large.clone()?;
        match self.send(|| self.client.get(&url)).await {
            Ok(response) => match response.bytes().await {
                Ok(bytes) if !bytes.is_empty() => Some(Image(bytes.to_vec())),
                Ok(_) => None,
                Err(e) => {
                    warn!(url = %url, error = %e, "Bangumi cover read failed");
                    None
                }
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Bangumi cover fetch failed");
                None
            }
        }
    }

    async fn series_from_subject(&self, subject: Subject) -> Result<ProviderSeriesMetadata> {
        let related = match self.get_related(&subject.id.to_string()).await {
            Ok(related) => related,
            Err(e) => {
                warn!(subject = subject.id, error = %e, "Bangumi related-subject lookup failed");
                Vec::new()
            }
        };
        let books = related
            .into_iter()
            .filter(|r| r.relation == RELATION_VOLUME)
            .map(|r| {
                let name = r.display_name().to_string();
                SeriesBook {
                    id: ProviderBookId::new(r.id.to_string()),
                    number: parse_volumes(&name).or_else(|| parse_book_number(&name)),
                    name: Some(name),
                    edition: None,
                }
            })
            .collect();

        let thumbnail = if self.config.fetch_series_covers {
            self.fetch_cover(&subject).await
        } else {
            None
        };

        let id = ProviderSeriesId::new(subject.id.to_string());
        let mut metadata = subject.into_series_metadata();
        metadata.thumbnail = thumbnail;
        Ok(ProviderSeriesMetadata {
            id,
            metadata,
            books,
        })
    }
}

#[async_trait]
impl MetadataProvider for BangumiProvider {
    fn provider_name(&self) -> CoreProvider {
        CoreProvider::Bangumi
    }

    async fn search_series(&self, name: &str, limit: usize) -> Result<Vec<SeriesSearchResult>> {
        let page = self
            .search_page(name, limit.min(25) as u32, 0)
            .await?;
        Ok(page
            .data
            .into_iter()
            .filter(|s| self.platform_matches(s))
            .take(limit)
            .map(|s| SeriesSearchResult {
                provider: CoreProvider::Bangumi.to_string(),
                result_id: ProviderSeriesId::new(s.id.to_string()),
                title: s.display_name().to_string(),
                url: Some(format!("https://bgm.tv/subject/{}", s.id)),
                image_url: s.images.and_then(|i| i.common.or(i.large)),
            })
            .collect())
    }

    async fn get_series_metadata(
        &self,
        series_id: &ProviderSeriesId,
    ) -> Result<ProviderSeriesMetadata> {
        let subject = self.get_subject(series_id.as_str()).await?;
        self.series_from_subject(subject).await
    }

    async fn get_book_metadata(
        &self,
        _series_id: &ProviderSeriesId,
        book_id: &ProviderBookId,
    ) -> Result<ProviderBookMetadata> {
        let subject = self.get_subject(book_id.as_str()).await?;
        Ok(ProviderBookMetadata {
            id: book_id.clone(),
            metadata: subject.into_book_metadata(),
        })
    }

    async fn match_series_metadata(
        &self,
        query: &MatchQuery,
    ) -> Result<Option<ProviderSeriesMetadata>> {
        let mut offset = 0;
        for _ in 0..MAX_MATCH_PAGES {
            let page = self
                .search_page(&query.series_name, MATCH_PAGE_SIZE, offset)
                .await?;
            let page_len = page.data.len() as u32;

            for candidate in page.data {
                if !self.platform_matches(&candidate) {
                    continue;
                }
                if !self.matcher.matches(&query.series_name, &candidate.titles()) {
                    continue;
                }
                debug!(
                    subject = candidate.id,
                    name = %candidate.display_name(),
                    "Bangumi candidate accepted"
                );
                let subject = self.get_subject(&candidate.id.to_string()).await?;
                let subject = self.resolve_series_subject(subject).await?;
                return self.series_from_subject(subject).await.map(Some);
            }

            offset += page_len;
            if page_len < MATCH_PAGE_SIZE || offset >= page.total {
                break;
            }
        }
        Ok(None)
    }

    async fn get_series_cover(&self, series_id: &ProviderSeriesId) -> Result<Option<Image>> {
        let subject = self.get_subject(series_id.as_str()).await?;
        Ok(self.fetch_cover(&subject).await)
    }
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

const SUBJECT_TYPE_BOOK: u8 = 1;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u32,
    #[serde(default)]
    data: Vec<Subject>,
}

#[derive(Debug, Deserialize)]
struct Subject {
    id: u64,
    name: String,
    #[serde(default)]
    name_cn: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    images: Option<Images>,
    #[serde(default)]
    infobox: Vec<InfoboxEntry>,
    #[serde(default)]
    rating: Option<Rating>,
    #[serde(default)]
    tags: Vec<Tag>,
    /// Set on subjects that are the series-level entry.
    #[serde(default)]
    series: bool,
}

impl Subject {
    fn display_name(&self) -> &str {
        if self.name_cn.is_empty() {
            &self.name
        } else {
            &self.name_cn
        }
    }

    fn titles(&self) -> Vec<&str> {
        let mut titles = Vec::with_capacity(2);
        if !self.name_cn.is_empty() {
            titles.push(self.name_cn.as_str());
        }
        if !self.name.is_empty() {
            titles.push(self.name.as_str());
        }
        titles
    }

    fn infobox_value(&self, key: &str) -> Option<String> {
        self.infobox
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.joined())
            .filter(|v| !v.is_empty())
    }

    fn authors(&self) -> Vec<Author> {
        let mut authors = Vec::new();
        for (key, role) in [("作者", AuthorRole::Writer), ("作画", AuthorRole::Penciller)] {
            if let Some(value) = self.infobox_value(key) {
                authors.extend(value.split('、').map(|name| Author {
                    name: name.trim().to_string(),
                    role,
                }));
            }
        }
        authors
    }

    fn into_series_metadata(self) -> SeriesMetadata {
        let mut titles = Vec::new();
        if !self.name_cn.is_empty() {
            titles.push(SeriesTitle {
                title: self.name_cn.clone(),
                title_type: Some(TitleType::Localized),
                language: Some("zh".to_string()),
            });
        }
        if !self.name.is_empty() {
            titles.push(SeriesTitle {
                title: self.name.clone(),
                title_type: Some(TitleType::Native),
                language: Some("ja".to_string()),
            });
        }

        let publishers = self
            .infobox_value("出版社")
            .into_iter()
            .flat_map(|v| {
                v.split('、')
                    .map(|name| Publisher {
                        name: name.trim().to_string(),
                        publisher_type: PublisherType::Original,
                        language: Some("ja".to_string()),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut tags: Vec<(String, u32)> = self
            .tags
            .iter()
            .filter(|t| t.count >= TAG_MIN_COUNT)
            .map(|t| (t.name.clone(), t.count))
            .collect();
        tags.sort_by(|a, b| b.1.cmp(&a.1));
        tags.truncate(TAG_LIMIT);

        let total_book_count = self
            .infobox_value("册数")
            .and_then(|v| v.trim().parse().ok());

        let authors = self.authors();

        SeriesMetadata {
            titles,
            status: None,
            summary: non_empty(self.summary),
            publishers,
            authors,
            genres: Vec::new(),
            tags: tags.into_iter().map(|(name, _)| name).collect(),
            release_date: self.date.as_deref().and_then(parse_release_date),
            total_book_count,
            links: vec![shiori_common::WebLink {
                label: "Bangumi".to_string(),
                url: format!("https://bgm.tv/subject/{}", self.id),
            }],
            score: self.rating.and_then(|r| r.score),
            age_rating: None,
            thumbnail: None,
        }
    }

    fn into_book_metadata(self) -> BookMetadata {
        let name = self.display_name().to_string();
        let number: Option<BookRange> = parse_volumes(&name).or_else(|| parse_book_number(&name));
        BookMetadata {
            title: Some(name),
            summary: non_empty(self.summary.clone()),
            number,
            number_sort: number.map(|r| r.start),
            release_date: self
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
            authors: self.authors(),
            tags: Vec::new(),
            isbn: self.infobox_value("ISBN"),
            links: vec![shiori_common::WebLink {
                label: "Bangumi".to_string(),
                url: format!("https://bgm.tv/subject/{}", self.id),
            }],
            age_rating: None,
            thumbnail: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Images {
    #[serde(default)]
    large: Option<String>,
    #[serde(default)]
    common: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Rating {
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    #[serde(default)]
    count: u32,
}

#[derive(Debug, Deserialize)]
struct InfoboxEntry {
    key: String,
    value: InfoboxValue,
}

/// Infobox values are either plain text or a list of keyed items.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InfoboxValue {
    Text(String),
    List(Vec<InfoboxItem>),
}

impl InfoboxValue {
    fn joined(&self) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::List(items) => items
                .iter()
                .filter_map(|i| i.v.as_deref())
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("、"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct InfoboxItem {
    #[serde(default)]
    v: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelatedSubject {
    id: u64,
    name: String,
    #[serde(default)]
    name_cn: String,
    relation: String,
    #[serde(default)]
    #[allow(dead_code)]
    images: Option<Images>,
}

impl RelatedSubject {
    fn display_name(&self) -> &str {
        if self.name_cn.is_empty() {
            &self.name
        } else {
            &self.name_cn
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Parse a possibly partial `YYYY[-MM[-DD]]` date.
fn parse_release_date(date: &str) -> Option<ReleaseDate> {
    let mut parts = date.splitn(3, '-');
    let year: i32 = parts.next()?.parse().ok()?;
    let month = parts.next().and_then(|m| m.parse().ok());
    let day = parts.next().and_then(|d| d.parse().ok());
    Some(ReleaseDate {
        year: Some(year),
        month,
        day,
    })
}
