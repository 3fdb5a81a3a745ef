//! Error taxonomy shared across the provider and media-server boundaries.
//!
//! "No match" is deliberately not an error: matching operations return
//! `Option`/empty collections for that case. Only genuine failures live
//! here.

/// Failure cases surfaced at the provider and media-server boundaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An identifier no longer resolves, upstream or locally.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A provider or the media server is unreachable or returned a 5xx.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Unknown provider name, malformed field configuration, and similar.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The media server rejected a metadata write.
    #[error("Write conflict: {0}")]
    WriteConflict(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new UpstreamUnavailable error.
    pub fn upstream<S: Into<String>>(msg: S) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Create a new InvalidConfiguration error.
    pub fn invalid_configuration<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a new WriteConflict error.
    pub fn write_conflict<S: Into<String>>(msg: S) -> Self {
        Self::WriteConflict(msg.into())
    }
}

/// Result type alias using the shared error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::not_found("series 42").to_string(),
            "Not found: series 42"
        );
        assert_eq!(
            Error::upstream("bangumi: 503").to_string(),
            "Upstream unavailable: bangumi: 503"
        );
        assert_eq!(
            Error::invalid_configuration("unknown provider 'mangahub'").to_string(),
            "Invalid configuration: unknown provider 'mangahub'"
        );
        assert_eq!(
            Error::write_conflict("field locked").to_string(),
            "Write conflict: field locked"
        );
    }
}
