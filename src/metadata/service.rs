//! Orchestration of identification, matching, and metadata writes.
//!
//! The [`MetadataService`] ties one media-server connection to an ordered
//! list of metadata providers. All flows share the same post-processing
//! path: filter provider output per configuration, merge by priority, build
//! lock-aware updates, write them back, and upload covers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use shiori_common::{
    MatchQuery, MediaServerLibraryId, MediaServerSeriesId, ProviderSeriesMetadata, SeriesBook,
    SeriesMetadata, SeriesSearchResult, TitleType,
};
use shiori_parser::{parse_extra_data, parse_sort_number};
use tracing::{debug, info, warn};

use crate::jobs::{JobEventSender, MetadataJobEvent};
use crate::mediaserver::{
    MediaServerBook, MediaServerBookMetadataUpdate, MediaServerClient, MediaServerSeries,
    MediaServerSeriesMetadataUpdate,
};
use crate::metadata::config_applier::{self, BookFieldsConfig, SeriesFieldsConfig};
use crate::metadata::merge;
use crate::providers::{CoreProvider, MetadataProvider};

fn default_provider_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Knobs of the shared post-processing path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct MetadataProcessingConfig {
    /// When set, lower-priority providers are also consulted after a match
    /// and fill fields the winner left empty. Off by default: first match
    /// wins outright.
    pub aggregate: bool,
    /// Whether the series title is written at all.
    #[serde(default = "default_true")]
    pub write_title: bool,
    /// Which title variant to write when several are available.
    pub title_type: TitleType,
    /// Upper bound on a single provider call during matching; an elapsed
    /// timeout counts as no-match from that provider.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,
}

impl Default for MetadataProcessingConfig {
    fn default() -> Self {
        Self {
            aggregate: false,
            write_title: true,
            title_type: TitleType::Localized,
            provider_timeout_secs: default_provider_timeout(),
        }
    }
}

impl MetadataProcessingConfig {
    fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// A provider together with its per-provider field filters.
pub struct ProviderWithConfig {
    pub provider: Arc<dyn MetadataProvider>,
    pub series_fields: SeriesFieldsConfig,
    pub book_fields: BookFieldsConfig,
}

/// One media server plus its providers in priority order.
pub struct MetadataService {
    media_server: Arc<dyn MediaServerClient>,
    providers: Vec<ProviderWithConfig>,
    config: MetadataProcessingConfig,
}

impl MetadataService {
    pub fn new(
        media_server: Arc<dyn MediaServerClient>,
        providers: Vec<ProviderWithConfig>,
        config: MetadataProcessingConfig,
    ) -> Self {
        Self {
            media_server,
            providers,
            config,
        }
    }

    /// Fan a search out to every provider and pool the results in provider
    /// priority order, capped at `limit` in total. A failing provider is
    /// skipped, not fatal.
    pub async fn search_series_metadata(
        &self,
        name: &str,
        limit: usize,
    ) -> Vec<SeriesSearchResult> {
        let mut results = Vec::new();
        for entry in &self.providers {
            match entry.provider.search_series(name, limit).await {
                Ok(mut found) => results.append(&mut found),
                Err(e) => warn!(
                    provider = %entry.provider.provider_name(),
                    error = %e,
                    "Provider search failed; skipping"
                ),
            }
        }
        results.truncate(limit);
        results
    }

    /// Names of this service's providers, in priority order.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|e| e.provider.provider_name().to_string())
            .collect()
    }

    /// Automatic identification of one series.
    ///
    /// Providers are consulted in priority order; the first accepted match
    /// wins and the series is post-processed from it. No provider matching
    /// is a no-op, not an error; the operation only fails when every
    /// provider errors out.
    pub async fn match_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        events: &JobEventSender,
    ) -> anyhow::Result<()> {
        let series = self
            .media_server
            .get_series(series_id)
            .await
            .with_context(|| format!("fetching series {series_id}"))?;
        self.match_one_series(&series, events).await
    }

    /// Manual identification: the user pinned a provider result, so locks
    /// are overridden and the chosen provider is authoritative.
    pub async fn set_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        provider: CoreProvider,
        provider_series_id: &shiori_common::ProviderSeriesId,
        edition: Option<&str>,
        events: &JobEventSender,
    ) -> anyhow::Result<()> {
        let entry = self
            .providers
            .iter()
            .find(|e| e.provider.provider_name() == provider)
            .with_context(|| format!("provider '{provider}' is not enabled"))?;

        let series = self
            .media_server
            .get_series(series_id)
            .await
            .with_context(|| format!("fetching series {series_id}"))?;

        let matched = entry
            .provider
            .get_series_metadata(provider_series_id)
            .await
            .with_context(|| format!("fetching {provider} series {provider_series_id}"))?;
        events.send(MetadataJobEvent::SeriesMatched {
            provider: provider.to_string(),
        });

        let filtered = config_applier::apply_series(&matched, &entry.series_fields);
        self.post_process_series(&series, entry, filtered, edition, true, events)
            .await
    }

    /// Automatic identification of every series in a library.
    ///
    /// The sweep keeps going on per-series failures; each failure is
    /// surfaced as a job event and the sweep itself only fails on paging
    /// errors.
    pub async fn match_library_metadata(
        &self,
        library_id: &MediaServerLibraryId,
        events: &JobEventSender,
    ) -> anyhow::Result<()> {
        let library = self
            .media_server
            .get_library(library_id)
            .await
            .with_context(|| format!("fetching library {library_id}"))?;
        info!(library = %library.name, "Starting library metadata sweep");

        let mut page_number = 0;
        loop {
            let page = self
                .media_server
                .get_library_series(library_id, page_number)
                .await
                .with_context(|| format!("listing library {library_id} page {page_number}"))?;
            let last = page.is_last();

            for series in page.content {
                if let Err(e) = self.match_one_series(&series, events).await {
                    warn!(series = %series.name, error = %e, "Series match failed; continuing sweep");
                    events.send(MetadataJobEvent::PostProcessingError {
                        reason: format!("{}: {e:#}", series.name),
                    });
                }
            }

            if last {
                break;
            }
            page_number += 1;
        }
        Ok(())
    }

    /// Clear all metadata the service may have written for a series and
    /// drop every lock; the title reverts to the filesystem name.
    pub async fn reset_series_metadata(
        &self,
        series_id: &MediaServerSeriesId,
        remove_cover: bool,
    ) -> anyhow::Result<()> {
        let series = self
            .media_server
            .get_series(series_id)
            .await
            .with_context(|| format!("fetching series {series_id}"))?;
        self.reset_one_series(&series, remove_cover).await
    }

    /// Reset every series of a library.
    pub async fn reset_library_metadata(
        &self,
        library_id: &MediaServerLibraryId,
        remove_cover: bool,
    ) -> anyhow::Result<()> {
        let mut page_number = 0;
        loop {
            let page = self
                .media_server
                .get_library_series(library_id, page_number)
                .await
                .with_context(|| format!("listing library {library_id} page {page_number}"))?;
            let last = page.is_last();

            for series in page.content {
                self.reset_one_series(&series, remove_cover)
                    .await
                    .with_context(|| format!("resetting series {}", series.name))?;
            }

            if last {
                break;
            }
            page_number += 1;
        }
        Ok(())
    }

    async fn match_one_series(
        &self,
        series: &MediaServerSeries,
        events: &JobEventSender,
    ) -> anyhow::Result<()> {
        let query = MatchQuery {
            series_name: series.name.clone(),
            release_year: series.metadata.release_year,
        };

        let mut winner: Option<(&ProviderWithConfig, ProviderSeriesMetadata)> = None;
        let mut failures = Vec::new();
        for entry in &self.providers {
            match self.try_match(entry, &query).await {
                Ok(Some(matched)) => {
                    events.send(MetadataJobEvent::SeriesMatched {
                        provider: entry.provider.provider_name().to_string(),
                    });
                    winner = Some((entry, matched));
                    break;
                }
                Ok(None) => continue,
                Err(e) => failures.push(format!("{}: {e}", entry.provider.provider_name())),
            }
        }

        let Some((entry, matched)) = winner else {
            // A genuine no-match from at least one provider keeps this a
            // no-op; when every consulted provider errored out, nothing was
            // actually checked and the operation must fail.
            if !failures.is_empty() && failures.len() == self.providers.len() {
                anyhow::bail!("every provider failed: {}", failures.join("; "));
            }
            info!(series = %series.name, "No provider matched");
            return Ok(());
        };

        let mut filtered = config_applier::apply_series(&matched, &entry.series_fields);

        if self.config.aggregate {
            for other in &self.providers {
                if other.provider.provider_name() == entry.provider.provider_name() {
                    continue;
                }
                if let Some(extra) = self.try_match(other, &query).await.ok().flatten() {
                    let extra = config_applier::apply_series(&extra, &other.series_fields);
                    filtered.metadata =
                        merge::merge_series_metadata(filtered.metadata, extra.metadata);
                }
            }
        }

        self.post_process_series(series, entry, filtered, None, false, events)
            .await
    }

    /// One provider match attempt. A timeout degrades to no-match so a slow
    /// provider never blocks the rest of the chain; hard provider errors are
    /// returned so the caller can tell an outage apart from a genuine miss.
    async fn try_match(
        &self,
        entry: &ProviderWithConfig,
        query: &MatchQuery,
    ) -> shiori_common::Result<Option<ProviderSeriesMetadata>> {
        let name = entry.provider.provider_name();
        match tokio::time::timeout(
            self.config.provider_timeout(),
            entry.provider.match_series_metadata(query),
        )
        .await
        {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(provider = %name, error = %e, "Provider match failed");
                Err(e)
            }
            Err(_) => {
                warn!(provider = %name, "Provider match timed out");
                Ok(None)
            }
        }
    }

    async fn post_process_series(
        &self,
        series: &MediaServerSeries,
        entry: &ProviderWithConfig,
        matched: ProviderSeriesMetadata,
        edition: Option<&str>,
        force: bool,
        events: &JobEventSender,
    ) -> anyhow::Result<()> {
        events.send(MetadataJobEvent::PostProcessingStarted {
            series_id: series.id.clone(),
        });
        info!(
            series = %series.name,
            provider = %entry.provider.provider_name(),
            force,
            "Writing series metadata"
        );

        let update = merge::series_update(
            &matched.metadata,
            &series.metadata,
            self.config.title_type,
            self.config.write_title,
            force,
        );
        self.media_server
            .update_series_metadata(&series.id, &update)
            .await
            .with_context(|| format!("updating series {}", series.name))?;

        if let Some(thumbnail) = &matched.metadata.thumbnail {
            if !thumbnail.is_empty() {
                if let Err(e) = self
                    .media_server
                    .upload_series_thumbnail(&series.id, thumbnail)
                    .await
                {
                    warn!(series = %series.name, error = %e, "Series thumbnail upload failed");
                }
            }
        }

        self.process_books(series, entry, &matched, edition, force, events)
            .await;
        Ok(())
    }

    /// Associate server books with provider books by number and write
    /// book-level metadata. Book failures are reported but never abort the
    /// series.
    async fn process_books(
        &self,
        series: &MediaServerSeries,
        entry: &ProviderWithConfig,
        matched: &ProviderSeriesMetadata,
        edition: Option<&str>,
        force: bool,
        events: &JobEventSender,
    ) {
        if matched.books.is_empty() {
            return;
        }
        let server_books = match self.media_server.get_series_books(&series.id).await {
            Ok(books) => books,
            Err(e) => {
                warn!(series = %series.name, error = %e, "Listing series books failed");
                events.send(MetadataJobEvent::PostProcessingError {
                    reason: format!("{}: {e}", series.name),
                });
                return;
            }
        };

        for book in &server_books {
            let Some(provider_book) = match_book(book, &matched.books, edition) else {
                debug!(book = %book.name, "No provider book associated");
                continue;
            };

            let result = self
                .write_book_metadata(book, entry, matched, provider_book, force)
                .await;
            if let Err(e) = result {
                warn!(book = %book.name, error = %e, "Book metadata write failed");
                events.send(MetadataJobEvent::PostProcessingError {
                    reason: format!("{}: {e:#}", book.name),
                });
            }
        }
    }

    async fn write_book_metadata(
        &self,
        book: &MediaServerBook,
        entry: &ProviderWithConfig,
        matched: &ProviderSeriesMetadata,
        provider_book: &SeriesBook,
        force: bool,
    ) -> anyhow::Result<()> {
        let fetched = entry
            .provider
            .get_book_metadata(&matched.id, &provider_book.id)
            .await
            .with_context(|| format!("fetching book {}", provider_book.id))?;
        let mut metadata = config_applier::apply_book(&fetched.metadata, &entry.book_fields);

        // The association already established the number; fill it in when
        // the provider payload itself left it out.
        if metadata.number.is_none() {
            metadata.number = provider_book.number;
        }
        if metadata.number_sort.is_none() {
            metadata.number_sort = parse_sort_number(&book.name);
        }

        let update = merge::book_update(&metadata, &book.metadata, force);
        self.media_server
            .update_book_metadata(&book.id, &update)
            .await
            .with_context(|| format!("updating book {}", book.name))?;

        if let Some(thumbnail) = &metadata.thumbnail {
            if !thumbnail.is_empty() {
                if let Err(e) = self
                    .media_server
                    .upload_book_thumbnail(&book.id, thumbnail)
                    .await
                {
                    warn!(book = %book.name, error = %e, "Book thumbnail upload failed");
                }
            }
        }
        Ok(())
    }

    async fn reset_one_series(
        &self,
        series: &MediaServerSeries,
        remove_cover: bool,
    ) -> anyhow::Result<()> {
        info!(series = %series.name, remove_cover, "Resetting series metadata");
        self.media_server
            .update_series_metadata(
                &series.id,
                &MediaServerSeriesMetadataUpdate::reset(&series.name),
            )
            .await
            .with_context(|| format!("resetting series {}", series.name))?;

        let books = self
            .media_server
            .get_series_books(&series.id)
            .await
            .with_context(|| format!("listing books of {}", series.name))?;
        for book in &books {
            self.media_server
                .update_book_metadata(&book.id, &MediaServerBookMetadataUpdate::reset(&book.name))
                .await
                .with_context(|| format!("resetting book {}", book.name))?;
            if remove_cover {
                self.media_server.delete_book_thumbnails(&book.id).await?;
            }
        }

        if remove_cover {
            self.media_server
                .delete_series_thumbnails(&series.id)
                .await?;
        }
        self.media_server
            .refresh_metadata(&series.library_id, &series.id)
            .await?;
        Ok(())
    }
}

/// Associate one server book with a provider book.
///
/// The book number comes from the server when it has one, otherwise it is
/// parsed from the filename; the provider book whose range contains that
/// number wins. Edition handling: with an explicit hint only books of that
/// edition qualify; without one, a provider edition must appear among the
/// filename's bracketed extra tokens.
fn match_book<'a>(
    book: &MediaServerBook,
    provider_books: &'a [SeriesBook],
    edition: Option<&str>,
) -> Option<&'a SeriesBook> {
    let number = book.number.or_else(|| parse_sort_number(&book.name))?;
    let extra: Vec<String> = parse_extra_data(&book.name)
        .into_iter()
        .map(|t| t.to_lowercase())
        .collect();
    let wanted = edition.map(str::to_lowercase);

    provider_books.iter().find(|candidate| {
        let edition_ok = match (&wanted, &candidate.edition) {
            (Some(hint), Some(e)) => e.to_lowercase() == *hint,
            (Some(_), None) => false,
            (None, Some(e)) => extra.contains(&e.to_lowercase()),
            (None, None) => true,
        };
        edition_ok
            && candidate
                .number
                .as_ref()
                .is_some_and(|range| range.start <= number && number <= range.end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shiori_common::{
        BookRange, Error, Image, MediaServerBookId, MediaServerLibraryId, ProviderBookId,
        ProviderBookMetadata, ProviderSeriesId, Result as CommonResult, SeriesTitle,
    };

    use crate::mediaserver::{
        MediaServerBookMetadata, MediaServerLibrary, MediaServerSeriesMetadata, Page,
    };

    // -- stubs ------------------------------------------------------------

    #[derive(Default)]
    struct RecordedWrites {
        series_updates: Vec<(MediaServerSeriesId, MediaServerSeriesMetadataUpdate)>,
        book_updates: Vec<(MediaServerBookId, MediaServerBookMetadataUpdate)>,
        series_thumbnails: Vec<MediaServerSeriesId>,
        deleted_series_thumbnails: Vec<MediaServerSeriesId>,
        refreshed: Vec<MediaServerSeriesId>,
    }

    struct StubMediaServer {
        series: Vec<MediaServerSeries>,
        books: Vec<MediaServerBook>,
        writes: Mutex<RecordedWrites>,
        fail_update_for: Option<MediaServerSeriesId>,
    }

    impl StubMediaServer {
        fn new(series: Vec<MediaServerSeries>, books: Vec<MediaServerBook>) -> Self {
            Self {
                series,
                books,
                writes: Mutex::new(RecordedWrites::default()),
                fail_update_for: None,
            }
        }
    }

    #[async_trait]
    impl MediaServerClient for StubMediaServer {
        async fn get_series(
            &self,
            series_id: &MediaServerSeriesId,
        ) -> CommonResult<MediaServerSeries> {
            self.series
                .iter()
                .find(|s| &s.id == series_id)
                .cloned()
                .ok_or_else(|| Error::not_found("series"))
        }

        async fn get_library_series(
            &self,
            _library_id: &MediaServerLibraryId,
            page: u32,
        ) -> CommonResult<Page<MediaServerSeries>> {
            assert_eq!(page, 0);
            Ok(Page {
                content: self.series.clone(),
                page_number: 0,
                total_pages: 1,
            })
        }

        async fn get_series_books(
            &self,
            series_id: &MediaServerSeriesId,
        ) -> CommonResult<Vec<MediaServerBook>> {
            Ok(self
                .books
                .iter()
                .filter(|b| &b.series_id == series_id)
                .cloned()
                .collect())
        }

        async fn get_library(
            &self,
            library_id: &MediaServerLibraryId,
        ) -> CommonResult<MediaServerLibrary> {
            Ok(MediaServerLibrary {
                id: library_id.clone(),
                name: "Library".to_string(),
            })
        }

        async fn get_libraries(&self) -> CommonResult<Vec<MediaServerLibrary>> {
            Ok(Vec::new())
        }

        async fn update_series_metadata(
            &self,
            series_id: &MediaServerSeriesId,
            update: &MediaServerSeriesMetadataUpdate,
        ) -> CommonResult<()> {
            if self.fail_update_for.as_ref() == Some(series_id) {
                return Err(Error::upstream("write refused"));
            }
            self.writes
                .lock()
                .series_updates
                .push((series_id.clone(), update.clone()));
            Ok(())
        }

        async fn update_book_metadata(
            &self,
            book_id: &MediaServerBookId,
            update: &MediaServerBookMetadataUpdate,
        ) -> CommonResult<()> {
            self.writes
                .lock()
                .book_updates
                .push((book_id.clone(), update.clone()));
            Ok(())
        }

        async fn upload_series_thumbnail(
            &self,
            series_id: &MediaServerSeriesId,
            _thumbnail: &Image,
        ) -> CommonResult<()> {
            self.writes
                .lock()
                .series_thumbnails
                .push(series_id.clone());
            Ok(())
        }

        async fn upload_book_thumbnail(
            &self,
            _book_id: &MediaServerBookId,
            _thumbnail: &Image,
        ) -> CommonResult<()> {
            Ok(())
        }

        async fn delete_series_thumbnails(
            &self,
            series_id: &MediaServerSeriesId,
        ) -> CommonResult<()> {
            self.writes
                .lock()
                .deleted_series_thumbnails
                .push(series_id.clone());
            Ok(())
        }

        async fn delete_book_thumbnails(&self, _book_id: &MediaServerBookId) -> CommonResult<()> {
            Ok(())
        }

        async fn refresh_metadata(
            &self,
            _library_id: &MediaServerLibraryId,
            series_id: &MediaServerSeriesId,
        ) -> CommonResult<()> {
            self.writes.lock().refreshed.push(series_id.clone());
            Ok(())
        }
    }

    struct StubProvider {
        name: CoreProvider,
        matched: Option<ProviderSeriesMetadata>,
        book: Option<ProviderBookMetadata>,
        match_calls: Mutex<u32>,
        delay: Option<Duration>,
        fail: bool,
    }

    impl StubProvider {
        fn matching(name: CoreProvider, matched: ProviderSeriesMetadata) -> Self {
            Self {
                name,
                matched: Some(matched),
                book: None,
                match_calls: Mutex::new(0),
                delay: None,
                fail: false,
            }
        }

        fn no_match(name: CoreProvider) -> Self {
            Self {
                name,
                matched: None,
                book: None,
                match_calls: Mutex::new(0),
                delay: None,
                fail: false,
            }
        }

        fn failing(name: CoreProvider) -> Self {
            Self {
                fail: true,
                ..Self::no_match(name)
            }
        }
    }

    #[async_trait]
    impl MetadataProvider for StubProvider {
        fn provider_name(&self) -> CoreProvider {
            self.name
        }

        async fn search_series(
            &self,
            _name: &str,
            _limit: usize,
        ) -> CommonResult<Vec<SeriesSearchResult>> {
            Ok(vec![SeriesSearchResult {
                provider: self.name.to_string(),
                result_id: ProviderSeriesId::new("1"),
                title: "Result".to_string(),
                url: None,
                image_url: None,
            }])
        }

        async fn get_series_metadata(
            &self,
            _series_id: &ProviderSeriesId,
        ) -> CommonResult<ProviderSeriesMetadata> {
            self.matched
                .clone()
                .ok_or_else(|| Error::not_found("series"))
        }

        async fn get_book_metadata(
            &self,
            _series_id: &ProviderSeriesId,
            _book_id: &ProviderBookId,
        ) -> CommonResult<ProviderBookMetadata> {
            self.book.clone().ok_or_else(|| Error::not_found("book"))
        }

        async fn match_series_metadata(
            &self,
            _query: &MatchQuery,
        ) -> CommonResult<Option<ProviderSeriesMetadata>> {
            *self.match_calls.lock() += 1;
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(Error::upstream("provider down"));
            }
            Ok(self.matched.clone())
        }

        async fn get_series_cover(
            &self,
            _series_id: &ProviderSeriesId,
        ) -> CommonResult<Option<Image>> {
            Ok(None)
        }
    }

    // -- fixtures ---------------------------------------------------------

    fn series_id() -> MediaServerSeriesId {
        MediaServerSeriesId::new("s1")
    }

    fn server_series(metadata: MediaServerSeriesMetadata) -> MediaServerSeries {
        MediaServerSeries {
            id: series_id(),
            library_id: MediaServerLibraryId::new("lib1"),
            name: "Vinland Saga".to_string(),
            book_count: 1,
            metadata,
        }
    }

    fn provider_series(summary: &str) -> ProviderSeriesMetadata {
        ProviderSeriesMetadata {
            id: ProviderSeriesId::new("p1"),
            metadata: SeriesMetadata {
                titles: vec![SeriesTitle {
                    title: "Vinland Saga".to_string(),
                    title_type: Some(TitleType::Localized),
                    language: None,
                }],
                summary: Some(summary.to_string()),
                ..Default::default()
            },
            books: Vec::new(),
        }
    }

    fn with_config(provider: StubProvider) -> ProviderWithConfig {
        ProviderWithConfig {
            provider: Arc::new(provider),
            series_fields: SeriesFieldsConfig::default(),
            book_fields: BookFieldsConfig::default(),
        }
    }

    fn service(
        media_server: Arc<StubMediaServer>,
        providers: Vec<ProviderWithConfig>,
        config: MetadataProcessingConfig,
    ) -> MetadataService {
        MetadataService::new(media_server, providers, config)
    }

    fn discard_events() -> JobEventSender {
        JobEventSender::discard()
    }

    // -- tests ------------------------------------------------------------

    #[tokio::test]
    async fn match_writes_metadata_and_claims_locks() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![with_config(StubProvider::matching(
                CoreProvider::Bangumi,
                provider_series("A summary"),
            ))],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        assert_eq!(writes.series_updates.len(), 1);
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary.as_deref(), Some("A summary"));
        assert_eq!(update.summary_lock, Some(true));
        assert_eq!(update.title.as_deref(), Some("Vinland Saga"));
    }

    #[tokio::test]
    async fn locked_fields_survive_automatic_match() {
        let current = MediaServerSeriesMetadata {
            summary: Some("curated".to_string()),
            summary_lock: true,
            ..Default::default()
        };
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(current)],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![with_config(StubProvider::matching(
                CoreProvider::Bangumi,
                provider_series("provider summary"),
            ))],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary, None);
        assert_eq!(update.summary_lock, None);
    }

    #[tokio::test]
    async fn manual_identification_overrides_locks() {
        let current = MediaServerSeriesMetadata {
            summary: Some("curated".to_string()),
            summary_lock: true,
            ..Default::default()
        };
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(current)],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![with_config(StubProvider::matching(
                CoreProvider::Bangumi,
                provider_series("provider summary"),
            ))],
            MetadataProcessingConfig::default(),
        );

        svc.set_series_metadata(
            &series_id(),
            CoreProvider::Bangumi,
            &ProviderSeriesId::new("p1"),
            None,
            &discard_events(),
        )
        .await
        .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary.as_deref(), Some("provider summary"));
        assert_eq!(update.summary_lock, Some(true));
    }

    #[tokio::test]
    async fn first_provider_wins_without_aggregation() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let second = Arc::new(StubProvider::matching(
            CoreProvider::MangaDex,
            provider_series("from mangadex"),
        ));
        let svc = MetadataService::new(
            media.clone(),
            vec![
                with_config(StubProvider::matching(
                    CoreProvider::Bangumi,
                    provider_series("from bangumi"),
                )),
                ProviderWithConfig {
                    provider: second.clone(),
                    series_fields: SeriesFieldsConfig::default(),
                    book_fields: BookFieldsConfig::default(),
                },
            ],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary.as_deref(), Some("from bangumi"));
        // Lower-priority provider never consulted.
        assert_eq!(*second.match_calls.lock(), 0);
    }

    #[tokio::test]
    async fn aggregation_fills_gaps_only() {
        let mut winner = provider_series("from bangumi");
        winner.metadata.genres = vec!["Action".to_string()];
        let mut filler = provider_series("from mangadex");
        filler.metadata.genres = vec!["action".to_string(), "Drama".to_string()];
        filler.metadata.status = Some(shiori_common::SeriesStatus::Ended);

        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![
                with_config(StubProvider::matching(CoreProvider::Bangumi, winner)),
                with_config(StubProvider::matching(CoreProvider::MangaDex, filler)),
            ],
            MetadataProcessingConfig {
                aggregate: true,
                ..Default::default()
            },
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        // Winner's scalar kept, gap filled, lists deduplicated.
        assert_eq!(update.summary.as_deref(), Some("from bangumi"));
        assert_eq!(
            update.status,
            Some(shiori_common::SeriesStatus::Ended)
        );
        assert_eq!(
            update.genres.as_deref(),
            Some(&["Action".to_string(), "Drama".to_string()][..])
        );
    }

    #[tokio::test]
    async fn no_match_is_a_no_op() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![with_config(StubProvider::no_match(CoreProvider::Bangumi))],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();
        assert!(media.writes.lock().series_updates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn provider_timeout_degrades_to_no_match() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let slow = StubProvider {
            name: CoreProvider::Bangumi,
            matched: Some(provider_series("late")),
            book: None,
            match_calls: Mutex::new(0),
            delay: Some(Duration::from_secs(120)),
            fail: false,
        };
        let svc = service(
            media.clone(),
            vec![
                with_config(slow),
                with_config(StubProvider::matching(
                    CoreProvider::MangaDex,
                    provider_series("on time"),
                )),
            ],
            MetadataProcessingConfig {
                provider_timeout_secs: 5,
                ..Default::default()
            },
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary.as_deref(), Some("on time"));
    }

    #[tokio::test]
    async fn books_are_matched_by_number() {
        let mut matched = provider_series("with books");
        matched.books = vec![
            SeriesBook {
                id: ProviderBookId::new("pb1"),
                number: Some(BookRange::single(1.0)),
                name: None,
                edition: None,
            },
            SeriesBook {
                id: ProviderBookId::new("pb2"),
                number: Some(BookRange::single(2.0)),
                name: None,
                edition: None,
            },
        ];
        let provider = StubProvider {
            name: CoreProvider::Bangumi,
            matched: Some(matched),
            book: Some(ProviderBookMetadata {
                id: ProviderBookId::new("pb2"),
                metadata: shiori_common::BookMetadata {
                    summary: Some("volume two".to_string()),
                    ..Default::default()
                },
            }),
            match_calls: Mutex::new(0),
            delay: None,
            fail: false,
        };

        let book = MediaServerBook {
            id: MediaServerBookId::new("b2"),
            series_id: series_id(),
            name: "Vinland Saga - Volume 2".to_string(),
            number: None,
            metadata: MediaServerBookMetadata::default(),
        };
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            vec![book],
        ));
        let svc = service(
            media.clone(),
            vec![with_config(provider)],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        assert_eq!(writes.book_updates.len(), 1);
        let (book_id, update) = &writes.book_updates[0];
        assert_eq!(book_id.as_str(), "b2");
        assert_eq!(update.summary.as_deref(), Some("volume two"));
        assert_eq!(update.number.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn reset_clears_and_unlocks() {
        let book = MediaServerBook {
            id: MediaServerBookId::new("b1"),
            series_id: series_id(),
            name: "Vinland Saga - Volume 1".to_string(),
            number: Some(1.0),
            metadata: MediaServerBookMetadata::default(),
        };
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            vec![book],
        ));
        let svc = service(media.clone(), Vec::new(), MetadataProcessingConfig::default());

        svc.reset_series_metadata(&series_id(), true).await.unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.title.as_deref(), Some("Vinland Saga"));
        assert_eq!(update.summary_lock, Some(false));
        assert_eq!(writes.book_updates.len(), 1);
        assert_eq!(writes.deleted_series_thumbnails.len(), 1);
        assert_eq!(writes.refreshed.len(), 1);
    }

    #[tokio::test]
    async fn library_sweep_continues_after_series_failure() {
        let failing = MediaServerSeries {
            id: MediaServerSeriesId::new("bad"),
            library_id: MediaServerLibraryId::new("lib1"),
            name: "Broken".to_string(),
            book_count: 0,
            metadata: MediaServerSeriesMetadata::default(),
        };
        let mut media = StubMediaServer::new(
            vec![failing, server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        );
        media.fail_update_for = Some(MediaServerSeriesId::new("bad"));
        let media = Arc::new(media);

        let svc = service(
            media.clone(),
            vec![with_config(StubProvider::matching(
                CoreProvider::Bangumi,
                provider_series("shared"),
            ))],
            MetadataProcessingConfig::default(),
        );

        svc.match_library_metadata(&MediaServerLibraryId::new("lib1"), &discard_events())
            .await
            .unwrap();

        // The good series was still written.
        let writes = media.writes.lock();
        assert_eq!(writes.series_updates.len(), 1);
        assert_eq!(writes.series_updates[0].0, series_id());
    }

    #[tokio::test]
    async fn search_pools_all_providers() {
        let media = Arc::new(StubMediaServer::new(Vec::new(), Vec::new()));
        let svc = service(
            media,
            vec![
                with_config(StubProvider::no_match(CoreProvider::Bangumi)),
                with_config(StubProvider::no_match(CoreProvider::MangaDex)),
            ],
            MetadataProcessingConfig::default(),
        );

        let results = svc.search_series_metadata("anything", 5).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].provider, "bangumi");
        assert_eq!(results[1].provider, "mangadex");
    }

    #[tokio::test]
    async fn search_caps_pooled_results_at_limit() {
        let media = Arc::new(StubMediaServer::new(Vec::new(), Vec::new()));
        let svc = service(
            media,
            vec![
                with_config(StubProvider::no_match(CoreProvider::Bangumi)),
                with_config(StubProvider::no_match(CoreProvider::MangaDex)),
            ],
            MetadataProcessingConfig::default(),
        );

        // Each provider contributes one result; the pool is still capped.
        let results = svc.search_series_metadata("anything", 1).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].provider, "bangumi");
    }

    #[tokio::test]
    async fn match_fails_when_every_provider_errors() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![
                with_config(StubProvider::failing(CoreProvider::Bangumi)),
                with_config(StubProvider::failing(CoreProvider::MangaDex)),
            ],
            MetadataProcessingConfig::default(),
        );

        let result = svc
            .match_series_metadata(&series_id(), &discard_events())
            .await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("every provider failed"));
        assert!(media.writes.lock().series_updates.is_empty());
    }

    #[tokio::test]
    async fn failing_provider_is_skipped_when_another_matches() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![
                with_config(StubProvider::failing(CoreProvider::Bangumi)),
                with_config(StubProvider::matching(
                    CoreProvider::MangaDex,
                    provider_series("from mangadex"),
                )),
            ],
            MetadataProcessingConfig::default(),
        );

        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();

        let writes = media.writes.lock();
        let (_, update) = &writes.series_updates[0];
        assert_eq!(update.summary.as_deref(), Some("from mangadex"));
    }

    #[tokio::test]
    async fn failure_beside_genuine_no_match_stays_a_no_op() {
        let media = Arc::new(StubMediaServer::new(
            vec![server_series(MediaServerSeriesMetadata::default())],
            Vec::new(),
        ));
        let svc = service(
            media.clone(),
            vec![
                with_config(StubProvider::failing(CoreProvider::Bangumi)),
                with_config(StubProvider::no_match(CoreProvider::MangaDex)),
            ],
            MetadataProcessingConfig::default(),
        );

        // One provider actually answered "no match", so the outcome is a
        // clean miss rather than a failure.
        svc.match_series_metadata(&series_id(), &discard_events())
            .await
            .unwrap();
        assert!(media.writes.lock().series_updates.is_empty());
    }
}
