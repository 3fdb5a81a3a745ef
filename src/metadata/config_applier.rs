//! Per-field filtering of provider output.
//!
//! Every provider result passes through [`apply_series`]/[`apply_book`]
//! before it is eligible for merging and writing. Fields excluded by
//! configuration are cleared on a copy; input is never mutated, and applying
//! the same configuration twice yields the same result as applying it once.

use serde::Deserialize;
use shiori_common::{BookMetadata, ProviderSeriesMetadata, PublisherType, SeriesMetadata};

/// Which series fields a provider is allowed to contribute.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SeriesFieldsConfig {
    pub titles: bool,
    pub status: bool,
    pub summary: bool,
    pub publishers: bool,
    /// Prefer the original publisher over localized licensees. When no
    /// publisher of the preferred type exists, the rest are kept.
    pub use_original_publisher: bool,
    pub authors: bool,
    pub genres: bool,
    pub tags: bool,
    pub release_date: bool,
    pub links: bool,
    pub score: bool,
    pub age_rating: bool,
    pub thumbnail: bool,
    pub books: bool,
    /// Cap on how many books of the provider's list are kept.
    pub book_limit: Option<usize>,
}

impl Default for SeriesFieldsConfig {
    fn default() -> Self {
        Self {
            titles: true,
            status: true,
            summary: true,
            publishers: true,
            use_original_publisher: true,
            authors: true,
            genres: true,
            tags: true,
            release_date: true,
            links: true,
            score: true,
            age_rating: true,
            thumbnail: true,
            books: true,
            book_limit: None,
        }
    }
}

/// Which book fields a provider is allowed to contribute.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BookFieldsConfig {
    pub title: bool,
    pub summary: bool,
    pub number: bool,
    pub release_date: bool,
    pub authors: bool,
    pub tags: bool,
    pub isbn: bool,
    pub links: bool,
    pub thumbnail: bool,
}

impl Default for BookFieldsConfig {
    fn default() -> Self {
        Self {
            title: true,
            summary: true,
            number: true,
            release_date: true,
            authors: true,
            tags: true,
            isbn: true,
            links: true,
            thumbnail: true,
        }
    }
}

/// Return a filtered copy of `series` with excluded fields cleared.
pub fn apply_series(
    series: &ProviderSeriesMetadata,
    config: &SeriesFieldsConfig,
) -> ProviderSeriesMetadata {
    let m = &series.metadata;

    let publishers = if !config.publishers {
        Vec::new()
    } else {
        let preferred = if config.use_original_publisher {
            PublisherType::Original
        } else {
            PublisherType::Localized
        };
        let of_type: Vec<_> = m
            .publishers
            .iter()
            .filter(|p| p.publisher_type == preferred)
            .cloned()
            .collect();
        if of_type.is_empty() {
            m.publishers.clone()
        } else {
            of_type
        }
    };

    let mut books = if config.books {
        series.books.clone()
    } else {
        Vec::new()
    };
    if let Some(limit) = config.book_limit {
        books.truncate(limit);
    }

    ProviderSeriesMetadata {
        id: series.id.clone(),
        metadata: SeriesMetadata {
            titles: if config.titles { m.titles.clone() } else { Vec::new() },
            status: m.status.filter(|_| config.status),
            summary: m.summary.clone().filter(|_| config.summary),
            publishers,
            authors: if config.authors { m.authors.clone() } else { Vec::new() },
            genres: if config.genres { m.genres.clone() } else { Vec::new() },
            tags: if config.tags { m.tags.clone() } else { Vec::new() },
            release_date: m.release_date.filter(|_| config.release_date),
            total_book_count: m.total_book_count,
            links: if config.links { m.links.clone() } else { Vec::new() },
            score: m.score.filter(|_| config.score),
            age_rating: m.age_rating.filter(|_| config.age_rating),
            thumbnail: m.thumbnail.clone().filter(|_| config.thumbnail),
        },
        books,
    }
}

/// Return a filtered copy of `book` with excluded fields cleared.
pub fn apply_book(book: &BookMetadata, config: &BookFieldsConfig) -> BookMetadata {
    BookMetadata {
        title: book.title.clone().filter(|_| config.title),
        summary: book.summary.clone().filter(|_| config.summary),
        number: book.number.filter(|_| config.number),
        number_sort: book.number_sort.filter(|_| config.number),
        release_date: book.release_date.filter(|_| config.release_date),
        authors: if config.authors { book.authors.clone() } else { Vec::new() },
        tags: if config.tags { book.tags.clone() } else { Vec::new() },
        isbn: book.isbn.clone().filter(|_| config.isbn),
        links: if config.links { book.links.clone() } else { Vec::new() },
        age_rating: book.age_rating,
        thumbnail: book.thumbnail.clone().filter(|_| config.thumbnail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shiori_common::{
        Publisher, ProviderSeriesId, SeriesBook, SeriesStatus, SeriesTitle, TitleType,
    };

    fn sample_series() -> ProviderSeriesMetadata {
        ProviderSeriesMetadata {
            id: ProviderSeriesId::new("1"),
            metadata: SeriesMetadata {
                titles: vec![SeriesTitle {
                    title: "Title".to_string(),
                    title_type: Some(TitleType::Localized),
                    language: None,
                }],
                status: Some(SeriesStatus::Ongoing),
                summary: Some("Summary".to_string()),
                publishers: vec![
                    Publisher {
                        name: "Shueisha".to_string(),
                        publisher_type: PublisherType::Original,
                        language: Some("ja".to_string()),
                    },
                    Publisher {
                        name: "Viz".to_string(),
                        publisher_type: PublisherType::Localized,
                        language: Some("en".to_string()),
                    },
                ],
                genres: vec!["action".to_string()],
                tags: vec!["shounen".to_string()],
                ..Default::default()
            },
            books: vec![
                SeriesBook {
                    id: "b1".into(),
                    number: None,
                    name: None,
                    edition: None,
                },
                SeriesBook {
                    id: "b2".into(),
                    number: None,
                    name: None,
                    edition: None,
                },
            ],
        }
    }

    #[test]
    fn excluded_fields_are_cleared() {
        let config = SeriesFieldsConfig {
            summary: false,
            tags: false,
            ..Default::default()
        };
        let filtered = apply_series(&sample_series(), &config);
        assert_eq!(filtered.metadata.summary, None);
        assert!(filtered.metadata.tags.is_empty());
        // Untouched fields survive.
        assert_eq!(filtered.metadata.status, Some(SeriesStatus::Ongoing));
        assert_eq!(filtered.metadata.genres, vec!["action"]);
    }

    #[test]
    fn original_publisher_preferred() {
        let filtered = apply_series(&sample_series(), &SeriesFieldsConfig::default());
        assert_eq!(filtered.metadata.publishers.len(), 1);
        assert_eq!(filtered.metadata.publishers[0].name, "Shueisha");

        let config = SeriesFieldsConfig {
            use_original_publisher: false,
            ..Default::default()
        };
        let filtered = apply_series(&sample_series(), &config);
        assert_eq!(filtered.metadata.publishers[0].name, "Viz");
    }

    #[test]
    fn book_limit_truncates() {
        let config = SeriesFieldsConfig {
            book_limit: Some(1),
            ..Default::default()
        };
        let filtered = apply_series(&sample_series(), &config);
        assert_eq!(filtered.books.len(), 1);
    }

    #[test]
    fn applying_twice_equals_applying_once() {
        let config = SeriesFieldsConfig {
            summary: false,
            publishers: true,
            book_limit: Some(1),
            ..Default::default()
        };
        let once = apply_series(&sample_series(), &config);
        let twice = apply_series(&once, &config);
        assert_eq!(once, twice);
    }

    #[test]
    fn input_is_not_mutated() {
        let original = sample_series();
        let config = SeriesFieldsConfig {
            titles: false,
            books: false,
            ..Default::default()
        };
        let _ = apply_series(&original, &config);
        assert_eq!(original.metadata.titles.len(), 1);
        assert_eq!(original.books.len(), 2);
    }
}
