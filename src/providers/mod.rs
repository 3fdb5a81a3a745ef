//! Trait definition for metadata providers.
//!
//! Each provider wraps a single external bibliographic source (Bangumi,
//! MangaDex, etc.) and exposes a uniform interface for searching, fetching
//! series/book metadata, and best-effort matching against a free-text query.
//!
//! Providers own their pagination, rate limiting, and upstream-error
//! translation; the orchestration layer never sees provider-specific
//! failures, only the shared error taxonomy.

pub mod bangumi;
pub mod mangadex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shiori_common::{
    Error, Image, MatchQuery, ProviderBookId, ProviderBookMetadata, ProviderSeriesId,
    ProviderSeriesMetadata, Result, SeriesSearchResult,
};

/// Stable identity of a metadata provider, used for priority ordering,
/// configuration lookup, and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreProvider {
    Bangumi,
    MangaDex,
}

impl CoreProvider {
    /// Parse a provider name from configuration or a request, case-insensitively.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "bangumi" => Ok(Self::Bangumi),
            "mangadex" => Ok(Self::MangaDex),
            other => Err(Error::invalid_configuration(format!(
                "unknown provider '{other}'"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bangumi => "bangumi",
            Self::MangaDex => "mangadex",
        }
    }
}

impl std::fmt::Display for CoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Async trait that all metadata providers implement.
///
/// Implementations are shared across concurrently running jobs and must be
/// internally synchronized; in practice they hold an HTTP client and a rate
/// limiter, both of which are.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Stable provider identity.
    fn provider_name(&self) -> CoreProvider;

    /// Search for series by name. `limit` is an upper bound; providers may
    /// return fewer results. Results keep the provider's own ranking.
    async fn search_series(&self, name: &str, limit: usize) -> Result<Vec<SeriesSearchResult>>;

    /// Fetch full series metadata. Fails with [`Error::NotFound`] when the
    /// id no longer resolves upstream.
    async fn get_series_metadata(
        &self,
        series_id: &ProviderSeriesId,
    ) -> Result<ProviderSeriesMetadata>;

    /// Fetch full metadata for one book of a series.
    async fn get_book_metadata(
        &self,
        series_id: &ProviderSeriesId,
        book_id: &ProviderBookId,
    ) -> Result<ProviderBookMetadata>;

    /// Find the best series match for a query, or `None` when no candidate
    /// passes the name matcher. Implementations paginate upstream search and
    /// stop once a candidate is accepted or pagination is exhausted. A
    /// no-match is not an error.
    async fn match_series_metadata(
        &self,
        query: &MatchQuery,
    ) -> Result<Option<ProviderSeriesMetadata>>;

    /// Best-effort cover fetch; absence is not an error.
    async fn get_series_cover(&self, series_id: &ProviderSeriesId) -> Result<Option<Image>>;
}
