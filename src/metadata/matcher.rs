//! Name similarity matching for provider search candidates.
//!
//! Both the query and every candidate go through the same configurable
//! normalization (case folding, punctuation stripping, whitespace collapse)
//! before the configured similarity predicate is applied. The matcher never
//! fails: an empty candidate set is simply no-match.

use serde::Deserialize;

/// Which predicate decides whether a normalized candidate matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMode {
    /// Normalized forms must be identical.
    Exact,
    /// One normalized form must be a prefix of the other.
    Prefix,
    /// Jaro-Winkler similarity must reach the configured threshold.
    Distance,
}

/// Matcher configuration; deserialized from the application config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NameMatchingConfig {
    pub mode: SimilarityMode,
    /// Minimum Jaro-Winkler similarity for [`SimilarityMode::Distance`].
    pub threshold: f64,
    pub case_insensitive: bool,
    pub strip_punctuation: bool,
}

impl Default for NameMatchingConfig {
    fn default() -> Self {
        Self {
            mode: SimilarityMode::Distance,
            threshold: 0.92,
            case_insensitive: true,
            strip_punctuation: true,
        }
    }
}

/// Decides whether any of a set of candidate titles matches a query string.
#[derive(Debug, Clone)]
pub struct NameSimilarityMatcher {
    config: NameMatchingConfig,
}

impl NameSimilarityMatcher {
    pub fn new(config: NameMatchingConfig) -> Self {
        Self { config }
    }

    /// `true` when at least one candidate's normalized form satisfies the
    /// configured predicate against the normalized query.
    pub fn matches<S: AsRef<str>>(&self, query: &str, candidates: &[S]) -> bool {
        if candidates.is_empty() {
            return false;
        }

        let query = self.normalize(query);
        candidates.iter().any(|candidate| {
            let candidate = self.normalize(candidate.as_ref());
            match self.config.mode {
                SimilarityMode::Exact => candidate == query,
                SimilarityMode::Prefix => {
                    !query.is_empty()
                        && !candidate.is_empty()
                        && (candidate.starts_with(&query) || query.starts_with(&candidate))
                }
                SimilarityMode::Distance => {
                    strsim::jaro_winkler(&query, &candidate) >= self.config.threshold
                }
            }
        })
    }

    fn normalize(&self, name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for c in name.chars() {
            if self.config.strip_punctuation && !c.is_alphanumeric() && !c.is_whitespace() {
                out.push(' ');
                continue;
            }
            if self.config.case_insensitive {
                out.extend(c.to_lowercase());
            } else {
                out.push(c);
            }
        }
        // Collapse runs of whitespace left by stripping.
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for NameSimilarityMatcher {
    fn default() -> Self {
        Self::new(NameMatchingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_candidates_never_match() {
        let matcher = NameSimilarityMatcher::default();
        let candidates: Vec<String> = Vec::new();
        assert!(!matcher.matches("Anything", &candidates));
    }

    #[test]
    fn identical_name_always_matches() {
        let matcher = NameSimilarityMatcher::default();
        assert!(matcher.matches("Fullmetal Alchemist", &["Fullmetal Alchemist"]));
    }

    #[test]
    fn normalization_folds_case_and_punctuation() {
        let matcher = NameSimilarityMatcher::default();
        assert!(matcher.matches("K-ON!", &["k on"]));
        assert!(matcher.matches("dr. stone", &["Dr. STONE"]));
    }

    #[test]
    fn distance_mode_tolerates_small_differences() {
        let matcher = NameSimilarityMatcher::default();
        assert!(matcher.matches("Berserk", &["Berserk "]));
        assert!(!matcher.matches("Berserk", &["One Piece"]));
    }

    #[test]
    fn exact_mode_rejects_near_misses() {
        let matcher = NameSimilarityMatcher::new(NameMatchingConfig {
            mode: SimilarityMode::Exact,
            ..Default::default()
        });
        assert!(matcher.matches("Vinland Saga", &["vinland saga"]));
        assert!(!matcher.matches("Vinland Saga", &["Vinland Sagas"]));
    }

    #[test]
    fn prefix_mode() {
        let matcher = NameSimilarityMatcher::new(NameMatchingConfig {
            mode: SimilarityMode::Prefix,
            ..Default::default()
        });
        assert!(matcher.matches("Monster", &["Monster: The Perfect Edition"]));
        assert!(!matcher.matches("Monster", &["The Monster"]));
    }

    #[test]
    fn empty_strings_are_safe() {
        let matcher = NameSimilarityMatcher::default();
        assert!(matcher.matches("", &[""]));
        for mode in [SimilarityMode::Exact, SimilarityMode::Prefix] {
            let matcher = NameSimilarityMatcher::new(NameMatchingConfig {
                mode,
                ..Default::default()
            });
            // Must not panic; prefix mode treats empty as no-match.
            let _ = matcher.matches("", &["anything"]);
        }
    }

    #[test]
    fn first_matching_candidate_wins() {
        let matcher = NameSimilarityMatcher::default();
        assert!(matcher.matches("Blame!", &["Noise", "BLAME!"]));
    }
}
