//! Volume, chapter, and book-number extraction from free-text book titles.
//!
//! Release names for comics and manga carry their numbering in wildly
//! inconsistent forms: `"Title v12-14"`, `"Title Vol. 3"`, `"タイトル 第4巻"`,
//! `"Title 2023 ch.5.5"`, `"Title #7 [Digital]"`. Each category (volume,
//! chapter, bare book number) is recognized by an ordered list of pattern
//! rules; the first rule that matches a title wins for that category.
//!
//! Within the chapter and bare-number categories, when a rule matches more
//! than once the *last* occurrence is used, because titles commonly carry an
//! unrelated leading number (typically a year) before the real one.
//!
//! All functions are pure; identical input always yields identical output.

use std::sync::LazyLock;

use regex::Regex;
use shiori_common::BookRange;

static VOLUME_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Enumerated list form: "(volume 1, 2, 3)"
        Regex::new(r"(?i),?\s\(?volume\s(?P<start>[0-9]+)(,?\s?[0-9]+,)+(?P<end>\s?[0-9]+)\)?")
            .unwrap(),
        // Latin forms: "v12", "vol.3", "vols. 1-3", "volume 4", "t5"
        Regex::new(
            r"(?i),?\s\(?([vt]|vols\.?\s?|vol\.?\s?|volume\s)(?P<start>[0-9]+([.x#][0-9]+)?)(?P<end>-[0-9]+([.x#][0-9]+)?)?\)?",
        )
        .unwrap(),
        // CJK volume marker: "第4巻", "第1-3巻"
        Regex::new(r".*第(?P<start>\d+)-?(?P<end>\d+)?.*巻").unwrap(),
        // Date-numbered magazine issues: "2021年 12号"
        Regex::new(r".*年(?:[0-9]+月)?(?:[0-9]+日)?(?P<start>\d+)-?(?P<end>\d+)?号").unwrap(),
    ]
});

static CHAPTER_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Latin forms: " c5", "ch.5", "chapter 12", "ep. 3"
        Regex::new(
            r"(?i)(\sc|\s?ch\.?\s?|\s?chapter\s|\s?ep\.\s)(?P<start>[0-9]+([.x#][0-9]+)?)(?P<end>-[0-9]+([.x#][0-9]+)?)?",
        )
        .unwrap(),
        // CJK chapter marker: "第5話", "第5.5話"
        Regex::new(r".*第(?P<start>\d+(\.\d+)?)-?(?P<end>\d+(\.\d+)?)?.*話").unwrap(),
    ]
});

static BOOK_NUMBER_RULES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![Regex::new(
        r"(?i)(?:\s|\(|#|no\.)(?P<start>[0-9]+[AB]?([.x#][0-9]+)?)(?P<end>-[0-9]+([.x#][0-9]+)?)?\)?(?:\s\(.*\)\s*)*$",
    )
    .unwrap()]
});

static EXTRA_DATA_RULE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?P<extra>.*?)]").unwrap());

static DECIMAL_SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[x#]").unwrap());

/// Parse a captured range endpoint: strip the leading dash of an end group,
/// normalize `x`/`#` decimal separators to `.`, and parse as a float.
fn parse_number(raw: &str) -> Option<f64> {
    DECIMAL_SEPARATORS
        .replace_all(raw.trim_start_matches('-'), ".")
        .trim()
        .parse::<f64>()
        .ok()
}

/// Apply ordered rules, taking the first rule that matches at all; within
/// that rule, `pick` selects which occurrence to use.
fn apply_rules<'a>(
    name: &'a str,
    rules: &[Regex],
    pick: impl Fn(&Regex, &'a str) -> Option<regex::Captures<'a>>,
) -> Option<BookRange> {
    let captures = rules.iter().find_map(|rule| pick(rule, name))?;

    let start = captures.name("start").and_then(|m| parse_number(m.as_str()))?;
    let end = captures.name("end").and_then(|m| parse_number(m.as_str()));

    Some(match end {
        Some(end) => BookRange::new(start, end),
        None => BookRange::single(start),
    })
}

/// Extract the volume range from a title, e.g. `"Title v12-14"` → 12..14.
///
/// The first matching occurrence in the title is used.
pub fn parse_volumes(name: &str) -> Option<BookRange> {
    apply_rules(name, &VOLUME_RULES, |rule, name| rule.captures(name))
}

/// Extract the chapter range from a title, e.g. `"Title ch.5.5"` → 5.5..5.5.
///
/// The last matching occurrence is used, so `"Title 2023 ch.5"` yields
/// chapter 5, not 2023.
pub fn parse_chapters(name: &str) -> Option<BookRange> {
    apply_rules(name, &CHAPTER_RULES, last_occurrence)
}

/// Extract a bare trailing book number, e.g. `"Title #7"` or `"Title 3 (2021)"`.
///
/// The last matching occurrence is used.
pub fn parse_book_number(name: &str) -> Option<BookRange> {
    apply_rules(name, &BOOK_NUMBER_RULES, last_occurrence)
}

fn last_occurrence<'a>(rule: &Regex, name: &'a str) -> Option<regex::Captures<'a>> {
    let last = rule.find_iter(name).last()?;
    rule.captures(&name[last.start()..])
}

/// Extract bracket-delimited extra-data tokens: `"Title [Digital] [Viz]"` →
/// `["Digital", "Viz"]`.
pub fn parse_extra_data(name: &str) -> Vec<String> {
    EXTRA_DATA_RULE
        .captures_iter(name)
        .filter_map(|c| c.name("extra").map(|m| m.as_str().to_string()))
        .collect()
}

/// Derive a single sortable number from a title.
///
/// When a volume number is present, the chapter digits (dots removed) become
/// its decimals, so `"v3 ch12"` sorts as 3.12 between volumes 3 and 4. With
/// no volume, the chapter number itself is used; uncollected chapters then
/// typically sort after collected volumes. With neither, falls back to the
/// bare book number.
pub fn parse_sort_number(name: &str) -> Option<f64> {
    let volume = parse_volumes(name).map(|range| range.start);
    let chapter_digits = CHAPTER_RULES
        .iter()
        .find_map(|rule| last_occurrence(rule, name))
        .and_then(|c| c.name("start").map(|m| m.as_str().to_string()));

    if let Some(volume) = volume {
        let decimals = chapter_digits
            .map(|digits| format!("0.{}", digits.replace('.', "")))
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        return Some(volume + decimals);
    }

    if let Some(digits) = chapter_digits {
        return parse_number(&digits);
    }

    parse_book_number(name).map(|range| range.start)
}
