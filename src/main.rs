mod cli;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use shiori::config::{self, Config, ProvidersConfig};
use shiori::jobs::MetadataJobTracker;
use shiori::mediaserver::komga::KomgaClient;
use shiori::mediaserver::MediaServerClient;
use shiori::metadata::matcher::{NameMatchingConfig, NameSimilarityMatcher};
use shiori::metadata::registry::MetadataServiceProvider;
use shiori::metadata::service::{MetadataProcessingConfig, MetadataService, ProviderWithConfig};
use shiori::providers::bangumi::BangumiProvider;
use shiori::providers::mangadex::MangaDexProvider;
use shiori::server::{self, AppContext};
use shiori_common::MediaServerLibraryId;

/// Instantiate the enabled providers of one provider set, in priority order.
fn provider_entries(
    providers: &ProvidersConfig,
    matching: &NameMatchingConfig,
) -> Result<Vec<ProviderWithConfig>> {
    let mut entries: Vec<(u32, ProviderWithConfig)> = Vec::new();

    if let Some(bangumi) = providers.bangumi.as_ref().filter(|p| p.enabled) {
        let provider =
            BangumiProvider::new(bangumi.client.clone(), NameSimilarityMatcher::new(matching.clone()))?;
        entries.push((
            bangumi.priority,
            ProviderWithConfig {
                provider: Arc::new(provider),
                series_fields: bangumi.series_fields.clone(),
                book_fields: bangumi.book_fields.clone(),
            },
        ));
    }
    if let Some(mangadex) = providers.mangadex.as_ref().filter(|p| p.enabled) {
        let provider = MangaDexProvider::new(
            mangadex.client.clone(),
            NameSimilarityMatcher::new(matching.clone()),
        )?;
        entries.push((
            mangadex.priority,
            ProviderWithConfig {
                provider: Arc::new(provider),
                series_fields: mangadex.series_fields.clone(),
                book_fields: mangadex.book_fields.clone(),
            },
        ));
    }

    entries.sort_by_key(|(priority, _)| *priority);
    Ok(entries.into_iter().map(|(_, entry)| entry).collect())
}

fn build_service(
    media_server: Arc<dyn MediaServerClient>,
    providers: &ProvidersConfig,
    matching: &NameMatchingConfig,
    update: MetadataProcessingConfig,
) -> Result<Arc<MetadataService>> {
    let entries = provider_entries(providers, matching)?;
    Ok(Arc::new(MetadataService::new(media_server, entries, update)))
}

fn build_context(config: &Config) -> Result<AppContext> {
    let media_server: Arc<dyn MediaServerClient> = Arc::new(KomgaClient::new(
        config.komga.base_url.clone(),
        config.komga.api_key.clone(),
    ));

    let default = build_service(
        media_server.clone(),
        &config.providers,
        &config.name_matching,
        config.metadata_update.clone(),
    )?;

    let mut by_library = HashMap::new();
    for (library_id, library) in &config.libraries {
        let providers = library.providers.as_ref().unwrap_or(&config.providers);
        let update = library
            .metadata_update
            .clone()
            .unwrap_or_else(|| config.metadata_update.clone());
        let service = build_service(
            media_server.clone(),
            providers,
            &config.name_matching,
            update,
        )?;
        by_library.insert(MediaServerLibraryId::new(library_id.clone()), service);
    }

    Ok(AppContext {
        registry: Arc::new(MetadataServiceProvider::new(default, by_library)),
        jobs: MetadataJobTracker::new(Duration::from_secs(config.jobs.retention_secs)),
    })
}

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        komga = %config.komga.base_url,
        "Starting shiori"
    );

    let ctx = build_context(&config)?;
    server::start_server(&config.server, ctx).await
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = config::load_config_or_default(path)?;
    println!("Configuration is valid");
    println!(
        "  server: {}:{}",
        config.server.host, config.server.port
    );
    println!("  komga: {}", config.komga.base_url);
    let mut providers = Vec::new();
    if config.providers.bangumi.as_ref().is_some_and(|p| p.enabled) {
        providers.push("bangumi");
    }
    if config.providers.mangadex.as_ref().is_some_and(|p| p.enabled) {
        providers.push("mangadex");
    }
    println!("  providers: {}", providers.join(", "));
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "shiori=trace,shiori_parser=debug,shiori_common=debug,tower_http=debug".to_string()
        } else {
            "shiori=debug,tower_http=info".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Validate { config } => {
            let path = config.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("shiori {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
