//! eventcast: virtual sports tuner.
//!
//! Packs live sports events discovered from streaming providers onto a fixed
//! range of virtual channel numbers, publishes them as an M3U/XMLTV lineup,
//! and proxies each channel's HLS stream through this server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};

mod config;
mod database;
mod lineup;
mod logging;
mod providers;
mod scheduler;
mod stream;
mod web;

use config::{ConfigFile, Overrides, Settings};
use providers::{FeedProvider, ProviderRegistry};
use scheduler::{ChannelScheduler, RefreshScheduler};
use stream::{ChannelRegistry, HttpFetcher, IdleReaper, StreamEngine};

/// eventcast - virtual sports tuner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on [default: 0.0.0.0:8000]
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path to the database file [default: eventcast.db]
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Configuration file path [default: eventcast.toml if present]
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored [default: logs]
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Number of days to keep log files [default: 7]
    #[arg(long)]
    log_retention_days: Option<u64>,

    /// Externally visible origin used in playlists, e.g. http://192.168.1.2:8000
    #[arg(long)]
    base_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(config::DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => {
            let loaded = config::load_config(path)?;
            eprintln!("Loaded config from: {}", path.display());
            loaded
        }
        None => ConfigFile::default(),
    };

    let overrides = Overrides {
        listen: args.listen,
        database: args.database,
        log_dir: args.log_dir,
        log_retention_days: args.log_retention_days,
        base_url: args.base_url,
    };
    let settings = Settings::resolve(overrides, file_config)?;

    logging::init_logging(
        &settings.log_dir,
        settings.log_retention_days,
        args.verbose,
        settings.log_level.as_deref(),
    )?;

    info!("eventcast starting...");
    info!("  Listen address: {}", settings.listen);
    info!("  Database: {:?}", settings.database);
    match &settings.base_url {
        Some(url) => info!("  Base URL: {}", url),
        None => info!("  Base URL: derived from request headers"),
    }

    // Initialize database
    let db = match database::Database::open(&settings.database) {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let policy = db.get_channel_policy(settings.policy)?;
    info!(
        "  Channels: {} from {} (linear: {})",
        policy.num_of_channels, policy.start_channel, policy.use_linear
    );
    let db = db.into_handle();

    // Register providers
    let mut providers = ProviderRegistry::new();
    for provider_config in settings.providers.iter().cloned() {
        let name = provider_config.name.clone();
        match FeedProvider::new(provider_config, db.clone(), settings.stream.upstream_timeout) {
            Ok(provider) => {
                info!("  Provider: {}", name);
                providers.register(Arc::new(provider));
            }
            Err(e) => error!("Failed to create provider {}: {}", name, e),
        }
    }
    if providers.is_empty() {
        warn!("No providers configured; the lineup will stay empty");
    }

    // Schedulers
    let channel_scheduler = Arc::new(ChannelScheduler::new(db.clone(), settings.policy));
    let refresh_scheduler = Arc::new(RefreshScheduler::new(
        db.clone(),
        providers.clone(),
        Arc::clone(&channel_scheduler),
        settings.refresh.clone(),
    ));
    refresh_scheduler.initialize_providers().await;
    let mut background = Arc::clone(&refresh_scheduler).start();

    // Stream engine and idle reaper
    let registry = Arc::new(ChannelRegistry::new());
    let fetcher = HttpFetcher::new(settings.stream.upstream_timeout, &settings.user_agent)?;
    let engine = Arc::new(StreamEngine::new(
        db.clone(),
        providers.clone(),
        Arc::clone(&registry),
        Arc::new(fetcher),
        settings.policy,
        settings.stream.clone(),
    ));
    background.push(IdleReaper::new(registry, settings.reaper.clone()).start());

    let web_state = Arc::new(web::WebState::new(
        db,
        engine,
        channel_scheduler,
        refresh_scheduler,
        providers,
        settings.policy,
        settings.base_url.clone(),
    ));

    let result = web::start_web_server(settings.listen, web_state).await;

    for task in background {
        task.abort();
    }
    match &result {
        Ok(()) => info!("eventcast stopped"),
        Err(e) => error!("Web server error: {}", e),
    }
    result
}
