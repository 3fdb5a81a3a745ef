//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which wires an in-memory media-server stub and a
//! canned provider into a full [`AppContext`]. The [`with_server`]
//! constructor starts Axum on a random port for HTTP-level testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use shiori::jobs::MetadataJobTracker;
use shiori::mediaserver::{
    MediaServerBook, MediaServerBookMetadata, MediaServerBookMetadataUpdate, MediaServerClient,
    MediaServerLibrary, MediaServerSeries, MediaServerSeriesMetadata,
    MediaServerSeriesMetadataUpdate, Page,
};
use shiori::metadata::config_applier::{BookFieldsConfig, SeriesFieldsConfig};
use shiori::metadata::registry::MetadataServiceProvider;
use shiori::metadata::service::{MetadataProcessingConfig, MetadataService, ProviderWithConfig};
use shiori::providers::{CoreProvider, MetadataProvider};
use shiori::server::{create_router, AppContext};
use shiori_common::{
    Error, Image, MatchQuery, MediaServerBookId, MediaServerLibraryId, MediaServerSeriesId,
    ProviderBookId, ProviderBookMetadata, ProviderSeriesId, ProviderSeriesMetadata, Result,
    SeriesMetadata, SeriesSearchResult, SeriesTitle, TitleType,
};

/// In-memory media server with recorded writes.
#[derive(Default)]
pub struct StubMediaServer {
    pub series: Mutex<Vec<MediaServerSeries>>,
    pub books: Mutex<Vec<MediaServerBook>>,
    pub series_updates: Mutex<Vec<(MediaServerSeriesId, MediaServerSeriesMetadataUpdate)>>,
    pub book_updates: Mutex<Vec<(MediaServerBookId, MediaServerBookMetadataUpdate)>>,
}

impl StubMediaServer {
    pub fn with_series(series: Vec<MediaServerSeries>, books: Vec<MediaServerBook>) -> Arc<Self> {
        Arc::new(Self {
            series: Mutex::new(series),
            books: Mutex::new(books),
            ..Default::default()
        })
    }
}

#[async_trait]
impl MediaServerClient for StubMediaServer {
    async fn get_series(&self, series_id: &MediaServerSeriesId) -> Result<MediaServerSeries> {
        self.series
            .lock()
            .iter()
            .find(|s| &s.id == series_id)
            .cloned()
            .ok_or_else(|| Error::not_found("series"))
    }

    async fn get_library_series(
        &self,
        library_id: &MediaServerLibraryId,
        page: u32,
    ) -> Result<Page<MediaServerSeries>> {
        let content: Vec<_> = self
            .series
            .lock()
            .iter()
            .filter(|s| &s.library_id == library_id)
            .cloned()
            .collect();
        assert_eq!(page, 0, "stub holds a single page");
        Ok(Page {
            content,
            page_number: 0,
            total_pages: 1,
        })
    }

    async fn get_series_books(
        &self,
        series_id: &MediaServerSeriesId,
    ) -> Result<Vec<MediaServerBook>> {
        Ok(self
            .books
            .lock()
            .iter()
            .filter(|b| &b.series_id == series_id)
            .cloned()
            .collect())
    }

    async fn get_library(
        &self,
        library_id: &MediaServerLibraryId,
    ) -> Result<MediaServerLibrary> {
        Ok(MediaServerLibrary {
            id: library_id.clone(),
            name: "Test Library".to_string(),
        })
    }

    async fn get_libraries(&self) -> Result<Vec<MediaServerLibrary>> {
        Ok(vec![])
    }

    async fn update_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        update: &MediaServerSeriesMetadataUpdate,
    ) -> Result<()> {
        self.series_updates
            .lock()
            .push((series_id.clone(), update.clone()));
        Ok(())
    }

    async fn update_book_metadata(
        &self,
        book_id: &MediaServerBookId,
        update: &MediaServerBookMetadataUpdate,
    ) -> Result<()> {
        self.book_updates
            .lock()
            .push((book_id.clone(), update.clone()));
        Ok(())
    }

    async fn upload_series_thumbnail(
        &self,
        _series_id: &MediaServerSeriesId,
        _thumbnail: &Image,
    ) -> Result<()> {
        Ok(())
    }

    async fn upload_book_thumbnail(
        &self,
        _book_id: &MediaServerBookId,
        _thumbnail: &Image,
    ) -> Result<()> {
        Ok(())
    }

    async fn delete_series_thumbnails(&self, _series_id: &MediaServerSeriesId) -> Result<()> {
        Ok(())
    }

    async fn delete_book_thumbnails(&self, _book_id: &MediaServerBookId) -> Result<()> {
        Ok(())
    }

    async fn refresh_metadata(
        &self,
        _library_id: &MediaServerLibraryId,
        _series_id: &MediaServerSeriesId,
    ) -> Result<()> {
        Ok(())
    }
}

/// Provider answering every match with one canned series.
pub struct CannedProvider {
    pub name: CoreProvider,
    pub matched: Option<ProviderSeriesMetadata>,
    /// Artificial upstream latency, so tests can observe a job mid-flight.
    pub delay: Duration,
}

impl CannedProvider {
    pub fn matching(title: &str) -> Self {
        Self {
            name: CoreProvider::Bangumi,
            delay: Duration::ZERO,
            matched: Some(ProviderSeriesMetadata {
                id: ProviderSeriesId::new("42"),
                metadata: SeriesMetadata {
                    titles: vec![SeriesTitle {
                        title: title.to_string(),
                        title_type: Some(TitleType::Localized),
                        language: None,
                    }],
                    summary: Some("A story.".to_string()),
                    ..Default::default()
                },
                books: vec![],
            }),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_name(mut self, name: CoreProvider) -> Self {
        self.name = name;
        self
    }
}

#[async_trait]
impl MetadataProvider for CannedProvider {
    fn provider_name(&self) -> CoreProvider {
        self.name
    }

    async fn search_series(
        &self,
        _name: &str,
        _limit: usize,
    ) -> Result<Vec<SeriesSearchResult>> {
        Ok(self
            .matched
            .iter()
            .map(|m| SeriesSearchResult {
                provider: self.provider_name().to_string(),
                result_id: m.id.clone(),
                title: m
                    .metadata
                    .titles
                    .first()
                    .map(|t| t.title.clone())
                    .unwrap_or_default(),
                url: None,
                image_url: None,
            })
            .collect())
    }

    async fn get_series_metadata(
        &self,
        series_id: &ProviderSeriesId,
    ) -> Result<ProviderSeriesMetadata> {
        self.matched
            .clone()
            .filter(|m| &m.id == series_id)
            .ok_or_else(|| Error::not_found("series"))
    }

    async fn get_book_metadata(
        &self,
        _series_id: &ProviderSeriesId,
        _book_id: &ProviderBookId,
    ) -> Result<ProviderBookMetadata> {
        Err(Error::not_found("book"))
    }

    async fn match_series_metadata(
        &self,
        _query: &MatchQuery,
    ) -> Result<Option<ProviderSeriesMetadata>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.matched.clone())
    }

    async fn get_series_cover(&self, _series_id: &ProviderSeriesId) -> Result<Option<Image>> {
        Ok(None)
    }
}

pub fn series(id: &str, library_id: &str, name: &str) -> MediaServerSeries {
    MediaServerSeries {
        id: MediaServerSeriesId::new(id),
        library_id: MediaServerLibraryId::new(library_id),
        name: name.to_string(),
        book_count: 0,
        metadata: MediaServerSeriesMetadata::default(),
    }
}

pub fn book(id: &str, series_id: &str, name: &str) -> MediaServerBook {
    MediaServerBook {
        id: MediaServerBookId::new(id),
        series_id: MediaServerSeriesId::new(series_id),
        name: name.to_string(),
        number: None,
        metadata: MediaServerBookMetadata::default(),
    }
}

/// Test harness wrapping a fully-constructed [`AppContext`] backed by the
/// in-memory media-server stub.
pub struct TestHarness {
    pub ctx: AppContext,
    pub media: Arc<StubMediaServer>,
}

impl TestHarness {
    /// Harness with the given providers and media-server contents.
    pub fn new(media: Arc<StubMediaServer>, providers: Vec<Arc<dyn MetadataProvider>>) -> Self {
        Self::with_libraries(media, providers, HashMap::new())
    }

    /// Harness with per-library provider overrides on top of the default
    /// provider set.
    pub fn with_libraries(
        media: Arc<StubMediaServer>,
        providers: Vec<Arc<dyn MetadataProvider>>,
        overrides: HashMap<MediaServerLibraryId, Vec<Arc<dyn MetadataProvider>>>,
    ) -> Self {
        let default = build_service(&media, providers);
        let by_library = overrides
            .into_iter()
            .map(|(library_id, providers)| (library_id, build_service(&media, providers)))
            .collect();

        let ctx = AppContext {
            registry: Arc::new(MetadataServiceProvider::new(default, by_library)),
            jobs: MetadataJobTracker::new(Duration::from_secs(300)),
        };

        Self { ctx, media }
    }

    /// Start an Axum server on a random port and return the harness together
    /// with the bound socket address.
    pub async fn with_server(
        media: Arc<StubMediaServer>,
        providers: Vec<Arc<dyn MetadataProvider>>,
    ) -> (Self, SocketAddr) {
        Self::new(media, providers).serve().await
    }

    /// Serve this harness on a random port.
    pub async fn serve(self) -> (Self, SocketAddr) {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        (self, addr)
    }
}

fn build_service(
    media: &Arc<StubMediaServer>,
    providers: Vec<Arc<dyn MetadataProvider>>,
) -> Arc<MetadataService> {
    let entries = providers
        .into_iter()
        .map(|provider| ProviderWithConfig {
            provider,
            series_fields: SeriesFieldsConfig::default(),
            book_fields: BookFieldsConfig::default(),
        })
        .collect();
    Arc::new(MetadataService::new(
        media.clone() as Arc<dyn MediaServerClient>,
        entries,
        MetadataProcessingConfig::default(),
    ))
}
