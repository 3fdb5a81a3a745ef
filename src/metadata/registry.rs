//! Routing of requests to per-library metadata services.
//!
//! Libraries can carry their own provider selection and processing
//! configuration; everything else falls through to the default service.

use std::collections::HashMap;
use std::sync::Arc;

use shiori_common::MediaServerLibraryId;

use crate::metadata::service::MetadataService;

/// Resolves which [`MetadataService`] handles a given library.
pub struct MetadataServiceProvider {
    default: Arc<MetadataService>,
    by_library: HashMap<MediaServerLibraryId, Arc<MetadataService>>,
}

impl MetadataServiceProvider {
    pub fn new(
        default: Arc<MetadataService>,
        by_library: HashMap<MediaServerLibraryId, Arc<MetadataService>>,
    ) -> Self {
        Self {
            default,
            by_library,
        }
    }

    /// The service configured for `library_id`, or the default one.
    pub fn for_library(&self, library_id: &MediaServerLibraryId) -> &Arc<MetadataService> {
        self.by_library.get(library_id).unwrap_or(&self.default)
    }

    /// The default service, for operations without a library context.
    pub fn default_service(&self) -> &Arc<MetadataService> {
        &self.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::service::MetadataProcessingConfig;

    use async_trait::async_trait;
    use shiori_common::{
        Image, MediaServerBookId, MediaServerSeriesId, Result as CommonResult,
    };

    use crate::mediaserver::{
        MediaServerBook, MediaServerBookMetadataUpdate, MediaServerClient, MediaServerLibrary,
        MediaServerSeries, MediaServerSeriesMetadataUpdate, Page,
    };

    struct NullMediaServer;

    #[async_trait]
    impl MediaServerClient for NullMediaServer {
        async fn get_series(
            &self,
            _series_id: &MediaServerSeriesId,
        ) -> CommonResult<MediaServerSeries> {
            Err(shiori_common::Error::not_found("series"))
        }

        async fn get_library_series(
            &self,
            _library_id: &MediaServerLibraryId,
            _page: u32,
        ) -> CommonResult<Page<MediaServerSeries>> {
            Ok(Page {
                content: Vec::new(),
                page_number: 0,
                total_pages: 0,
            })
        }

        async fn get_series_books(
            &self,
            _series_id: &MediaServerSeriesId,
        ) -> CommonResult<Vec<MediaServerBook>> {
            Ok(Vec::new())
        }

        async fn get_library(
            &self,
            library_id: &MediaServerLibraryId,
        ) -> CommonResult<MediaServerLibrary> {
            Ok(MediaServerLibrary {
                id: library_id.clone(),
                name: String::new(),
            })
        }

        async fn get_libraries(&self) -> CommonResult<Vec<MediaServerLibrary>> {
            Ok(Vec::new())
        }

        async fn update_series_metadata(
            &self,
            _series_id: &MediaServerSeriesId,
            _update: &MediaServerSeriesMetadataUpdate,
        ) -> CommonResult<()> {
            Ok(())
        }

        async fn update_book_metadata(
            &self,
            _book_id: &MediaServerBookId,
            _update: &MediaServerBookMetadataUpdate,
        ) -> CommonResult<()> {
            Ok(())
        }

        async fn upload_series_thumbnail(
            &self,
            _series_id: &MediaServerSeriesId,
            _thumbnail: &Image,
        ) -> CommonResult<()> {
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
            _series_id: &MediaServerSeriesId,
        ) -> CommonResult<()> {
            Ok(())
        }

        async fn delete_book_thumbnails(&self, _book_id: &MediaServerBookId) -> CommonResult<()> {
            Ok(())
        }

        async fn refresh_metadata(
            &self,
            _library_id: &MediaServerLibraryId,
            _series_id: &MediaServerSeriesId,
        ) -> CommonResult<()> {
            Ok(())
        }
    }

    fn empty_service() -> Arc<MetadataService> {
        Arc::new(MetadataService::new(
            Arc::new(NullMediaServer),
            Vec::new(),
            MetadataProcessingConfig::default(),
        ))
    }

    #[test]
    fn unknown_library_falls_back_to_default() {
        let default = empty_service();
        let special = empty_service();
        let mut by_library = HashMap::new();
        by_library.insert(MediaServerLibraryId::new("special"), special.clone());
        let registry = MetadataServiceProvider::new(default.clone(), by_library);

        assert!(Arc::ptr_eq(
            registry.for_library(&MediaServerLibraryId::new("special")),
            &special
        ));
        assert!(Arc::ptr_eq(
            registry.for_library(&MediaServerLibraryId::new("other")),
            &default
        ));
        assert!(Arc::ptr_eq(registry.default_service(), &default));
    }
}
