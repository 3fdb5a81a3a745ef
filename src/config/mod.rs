//! Application configuration.
//!
//! Configuration is a single TOML file: server binding, the Komga
//! connection, provider selection with priorities and per-field filters,
//! name-matching tuning, and optional per-library overrides of all of the
//! provider settings.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::metadata::config_applier::{BookFieldsConfig, SeriesFieldsConfig};
use crate::metadata::matcher::NameMatchingConfig;
use crate::metadata::service::MetadataProcessingConfig;
use crate::providers::bangumi::BangumiConfig;
use crate::providers::mangadex::MangaDexConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub komga: KomgaConfig,
    pub name_matching: NameMatchingConfig,
    pub metadata_update: MetadataProcessingConfig,
    pub jobs: JobsConfig,
    pub providers: ProvidersConfig,
    /// Per-library overrides, keyed by media-server library id.
    pub libraries: HashMap<String, LibraryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8085,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KomgaConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for KomgaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:25600".to_string(),
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// How long finished jobs stay queryable, in seconds.
    pub retention_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { retention_secs: 300 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub bangumi: Option<BangumiProviderConfig>,
    pub mangadex: Option<MangaDexProviderConfig>,
}

impl ProvidersConfig {
    pub fn any_enabled(&self) -> bool {
        self.bangumi.as_ref().is_some_and(|p| p.enabled)
            || self.mangadex.as_ref().is_some_and(|p| p.enabled)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BangumiProviderConfig {
    pub enabled: bool,
    /// Lower priority value = consulted earlier.
    pub priority: u32,
    #[serde(flatten)]
    pub client: BangumiConfig,
    pub series_fields: SeriesFieldsConfig,
    pub book_fields: BookFieldsConfig,
}

impl Default for BangumiProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 10,
            client: BangumiConfig::default(),
            series_fields: SeriesFieldsConfig::default(),
            book_fields: BookFieldsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MangaDexProviderConfig {
    pub enabled: bool,
    pub priority: u32,
    #[serde(flatten)]
    pub client: MangaDexConfig,
    pub series_fields: SeriesFieldsConfig,
    pub book_fields: BookFieldsConfig,
}

impl Default for MangaDexProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 20,
            client: MangaDexConfig::default(),
            series_fields: SeriesFieldsConfig::default(),
            book_fields: BookFieldsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Replacement provider set for this library; absent means inherit.
    pub providers: Option<ProvidersConfig>,
    pub metadata_update: Option<MetadataProcessingConfig>,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {path:?}"))?;
    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {path:?}"))?;
    validate_config(&config)?;
    Ok(config)
}

/// Load config from the default locations, or return defaults when none
/// exists.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./config.toml",
        "./shiori.toml",
        "~/.config/shiori/config.toml",
        "/etc/shiori/config.toml",
    ];
    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn validate_config(config: &Config) -> Result<()> {
    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }
    if config.komga.api_key.is_empty() {
        anyhow::bail!("komga.api_key is required");
    }
    if !config.providers.any_enabled() {
        tracing::warn!("No metadata provider enabled; matching will never succeed");
    }
    for (library_id, library) in &config.libraries {
        if let Some(providers) = &library.providers {
            if !providers.any_enabled() {
                tracing::warn!(
                    library = %library_id,
                    "Library overrides disable every provider"
                );
            }
        }
    }
    Ok(())
}
