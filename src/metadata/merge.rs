//! Priority merge of provider metadata and lock-aware update building.
//!
//! Providers are merged strictly in configured priority order: scalar fields
//! keep the first non-null value seen, list fields are concatenated and
//! deduplicated by a normalized string key preserving first-seen order.
//!
//! Update building is written out field by field: a field is written only
//! when its current server-side lock is false (or the caller forces it), and
//! every written field sets its own lock so it claims itself once populated.

use shiori_common::{BookMetadata, SeriesMetadata, SeriesTitle, TitleType};

use crate::mediaserver::{
    MediaServerBookMetadata, MediaServerBookMetadataUpdate, MediaServerSeriesMetadata,
    MediaServerSeriesMetadataUpdate,
};

/// Case-, punctuation-, and whitespace-insensitive key used for list
/// deduplication across providers.
pub fn dedup_key(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn merge_lists<T, K>(first: Vec<T>, second: Vec<T>, key: K) -> Vec<T>
where
    K: Fn(&T) -> String,
{
    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<T> = Vec::new();
    for item in first.into_iter().chain(second) {
        let k = key(&item);
        if !seen.contains(&k) {
            seen.push(k);
            out.push(item);
        }
    }
    out
}

/// Merge a lower-priority provider's series metadata into an accumulated
/// result. `base` always wins on scalars; lists are deduplicated.
pub fn merge_series_metadata(base: SeriesMetadata, other: SeriesMetadata) -> SeriesMetadata {
    SeriesMetadata {
        titles: merge_lists(base.titles, other.titles, |t: &SeriesTitle| {
            dedup_key(&t.title)
        }),
        status: base.status.or(other.status),
        summary: base.summary.or(other.summary),
        publishers: merge_lists(base.publishers, other.publishers, |p| dedup_key(&p.name)),
        authors: merge_lists(base.authors, other.authors, |a| {
            format!("{}:{:?}", dedup_key(&a.name), a.role)
        }),
        genres: merge_lists(base.genres, other.genres, |g| dedup_key(g)),
        tags: merge_lists(base.tags, other.tags, |t| dedup_key(t)),
        release_date: base.release_date.or(other.release_date),
        total_book_count: base.total_book_count.or(other.total_book_count),
        links: merge_lists(base.links, other.links, |l| dedup_key(&l.label)),
        score: base.score.or(other.score),
        age_rating: base.age_rating.or(other.age_rating),
        thumbnail: base.thumbnail.or(other.thumbnail),
    }
}

/// Merge a lower-priority provider's book metadata into an accumulated result.
pub fn merge_book_metadata(base: BookMetadata, other: BookMetadata) -> BookMetadata {
    BookMetadata {
        title: base.title.or(other.title),
        summary: base.summary.or(other.summary),
        number: base.number.or(other.number),
        number_sort: base.number_sort.or(other.number_sort),
        release_date: base.release_date.or(other.release_date),
        authors: merge_lists(base.authors, other.authors, |a| {
            format!("{}:{:?}", dedup_key(&a.name), a.role)
        }),
        tags: merge_lists(base.tags, other.tags, |t| dedup_key(t)),
        isbn: base.isbn.or(other.isbn),
        links: merge_lists(base.links, other.links, |l| dedup_key(&l.label)),
        age_rating: base.age_rating.or(other.age_rating),
        thumbnail: base.thumbnail.or(other.thumbnail),
    }
}

/// Pick the display title from the typed title variants, preferring the
/// configured type and falling back to the first title listed.
pub fn select_title(titles: &[SeriesTitle], preferred: TitleType) -> Option<&SeriesTitle> {
    titles
        .iter()
        .find(|t| t.title_type == Some(preferred))
        .or_else(|| titles.first())
}

/// Build the series update that writes `metadata` against the server's
/// `current` state under the lock policy. `write_title` gates title writing
/// (a config switch); `force` overrides existing locks (used by explicit
/// user identification).
pub fn series_update(
    metadata: &SeriesMetadata,
    current: &MediaServerSeriesMetadata,
    preferred_title: TitleType,
    write_title: bool,
    force: bool,
) -> MediaServerSeriesMetadataUpdate {
    let mut update = MediaServerSeriesMetadataUpdate::default();

    let writable = |locked: bool| !locked || force;

    if write_title && writable(current.title_lock) {
        if let Some(title) = select_title(&metadata.titles, preferred_title) {
            update.title = Some(title.title.clone());
            update.title_lock = Some(true);
        }
    }
    if writable(current.status_lock) {
        if let Some(status) = metadata.status {
            update.status = Some(status);
            update.status_lock = Some(true);
        }
    }
    if writable(current.summary_lock) {
        if let Some(summary) = &metadata.summary {
            update.summary = Some(summary.clone());
            update.summary_lock = Some(true);
        }
    }
    if writable(current.publisher_lock) {
        if let Some(publisher) = metadata.publishers.first() {
            update.publisher = Some(publisher.name.clone());
            update.publisher_lock = Some(true);
        }
    }
    if writable(current.genres_lock) && !metadata.genres.is_empty() {
        update.genres = Some(metadata.genres.clone());
        update.genres_lock = Some(true);
    }
    if writable(current.tags_lock) && !metadata.tags.is_empty() {
        update.tags = Some(metadata.tags.clone());
        update.tags_lock = Some(true);
    }
    if writable(current.age_rating_lock) {
        if let Some(age_rating) = metadata.age_rating {
            update.age_rating = Some(age_rating);
            update.age_rating_lock = Some(true);
        }
    }
    if writable(current.language_lock) {
        if let Some(language) = metadata
            .publishers
            .first()
            .and_then(|p| p.language.clone())
        {
            update.language = Some(language);
            update.language_lock = Some(true);
        }
    }
    if writable(current.total_book_count_lock) {
        if let Some(count) = metadata.total_book_count {
            update.total_book_count = Some(count);
            update.total_book_count_lock = Some(true);
        }
    }
    if writable(current.links_lock) && !metadata.links.is_empty() {
        update.links = Some(metadata.links.clone());
        update.links_lock = Some(true);
    }

    update
}

/// Build the book update that writes `metadata` against the server's
/// `current` book state under the lock policy.
pub fn book_update(
    metadata: &BookMetadata,
    current: &MediaServerBookMetadata,
    force: bool,
) -> MediaServerBookMetadataUpdate {
    let mut update = MediaServerBookMetadataUpdate::default();

    let writable = |locked: bool| !locked || force;

    if writable(current.title_lock) {
        if let Some(title) = &metadata.title {
            update.title = Some(title.clone());
            update.title_lock = Some(true);
        }
    }
    if writable(current.summary_lock) {
        if let Some(summary) = &metadata.summary {
            update.summary = Some(summary.clone());
            update.summary_lock = Some(true);
        }
    }
    if writable(current.number_lock) {
        if let Some(number) = metadata.number {
            update.number = Some(if number.start == number.end {
                format_number(number.start)
            } else {
                format!("{}-{}", format_number(number.start), format_number(number.end))
            });
            update.number_lock = Some(true);
        }
    }
    if writable(current.number_sort_lock) {
        if let Some(number_sort) = metadata.number_sort {
            update.number_sort = Some(number_sort);
            update.number_sort_lock = Some(true);
        }
    }
    if writable(current.release_date_lock) {
        if let Some(release_date) = metadata.release_date {
            update.release_date = Some(release_date);
            update.release_date_lock = Some(true);
        }
    }
    if writable(current.authors_lock) && !metadata.authors.is_empty() {
        update.authors = Some(metadata.authors.clone());
        update.authors_lock = Some(true);
    }
    if writable(current.tags_lock) && !metadata.tags.is_empty() {
        update.tags = Some(metadata.tags.clone());
        update.tags_lock = Some(true);
    }
    if writable(current.isbn_lock) {
        if let Some(isbn) = &metadata.isbn {
            update.isbn = Some(isbn.clone());
            update.isbn_lock = Some(true);
        }
    }
    if writable(current.links_lock) && !metadata.links.is_empty() {
        update.links = Some(metadata.links.clone());
        update.links_lock = Some(true);
    }

    update
}

/// Render a book number without a trailing `.0` for whole numbers.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
