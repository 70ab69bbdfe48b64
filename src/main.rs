//! Geolookup - GeoIP lookup server
//!
//! Serves city lookups over JSON-RPC while the dataset file can be swapped
//! on disk.

use anyhow::{Context, Result};
use argh::FromArgs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use geolookup::cache::ResultCache;
use geolookup::config::Config;
use geolookup::geo::{CityDatabase, CityProvider, CITY_DATASET, EMBEDDED_CITY_DATASET};
use geolookup::provider::DatasetSource;
use geolookup::registry::DatasetRegistry;
use geolookup::server;
use geolookup::service::LookupService;
use geolookup::watcher::{DatasetWatcher, WatcherOptions};

/// Geolookup - GeoIP lookups with hot-reloadable datasets
#[derive(FromArgs)]
struct Args {
    /// path to a JSON configuration file
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// city dataset file (JSON lines); the embedded dataset is used if absent
    #[argh(option, short = 'd')]
    database: Option<String>,

    /// reload the dataset when the file changes
    #[argh(switch, short = 'w')]
    watch: bool,

    /// maximum number of cached lookups (values below 1 use 4096)
    #[argh(option)]
    cache_capacity: Option<i64>,

    /// cached lookup lifetime in seconds
    #[argh(option)]
    cache_ttl: Option<u64>,

    /// address to listen on (default: 127.0.0.1:8089)
    #[argh(option, short = 'l')]
    listen: Option<String>,
}

impl Args {
    /// Load the config file (if any) and apply command-line overrides
    fn into_config(self) -> Result<Config> {
        let mut config = match self.config {
            Some(ref path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(database) = self.database {
            config.source_path = Some(PathBuf::from(database));
        }
        if self.watch {
            config.watch = true;
        }
        if let Some(capacity) = self.cache_capacity {
            config.cache_capacity = capacity;
        }
        if let Some(ttl) = self.cache_ttl {
            config.cache_ttl_secs = ttl;
        }
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Args = argh::from_env();
    let config = args.into_config().context("Failed to load configuration")?;
    if config.cache_capacity < 1 {
        warn!(
            "Cache capacity {} is below 1, using {}",
            config.cache_capacity,
            config.effective_cache_capacity()
        );
    }

    let provider = Arc::new(CityProvider);
    let registry: Arc<DatasetRegistry<CityDatabase>> = Arc::new(DatasetRegistry::new());
    let cache: Arc<ResultCache<serde_json::Value>> = Arc::new(ResultCache::new(
        config.effective_cache_capacity(),
        config.cache_ttl(),
    ));

    let watcher = DatasetWatcher::new(
        WatcherOptions {
            dataset_id: CITY_DATASET.to_string(),
            source_path: config.source_path.clone(),
            embedded: DatasetSource::Embedded(EMBEDDED_CITY_DATASET),
            poll_interval: config.poll_interval(),
        },
        Arc::clone(&provider),
        Arc::clone(&registry),
        Arc::clone(&cache),
    );
    if let Err(e) = watcher.start(config.watch).await {
        error!("Dataset watcher did not start: {}", e);
    }

    let service = Arc::new(LookupService::new(
        CITY_DATASET,
        provider,
        Arc::clone(&registry),
        Arc::clone(&cache),
    ));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutting down");
    };
    let served = server::serve(service, &config.listen, shutdown).await;

    watcher.stop().await;
    cache.clear();
    match registry.close_all() {
        Ok(closed) => info!("Closed {} dataset(s)", closed),
        Err(e) => error!("{}", e),
    }

    served
}
