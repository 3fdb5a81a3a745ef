//! Typed ID wrappers.
//!
//! Provider and media-server identifiers are opaque strings scoped to one
//! backend instance; the newtypes exist so a provider-side ID can never be
//! passed where a media-server ID is expected. Job IDs are process-local
//! UUIDs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Identifier for a series on one metadata provider. Never comparable
    /// across providers.
    ProviderSeriesId
}

string_id! {
    /// Identifier for a single book/volume on one metadata provider.
    ProviderBookId
}

string_id! {
    /// Identifier for a series on the target media server.
    MediaServerSeriesId
}

string_id! {
    /// Identifier for a library on the target media server.
    MediaServerLibraryId
}

string_id! {
    /// Identifier for a book on the target media server.
    MediaServerBookId
}

/// Identifier for one tracked metadata job. Process-local, not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataJobId(Uuid);

impl MetadataJobId {
    /// Generate a new random job ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MetadataJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::str::FromStr for MetadataJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for MetadataJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
