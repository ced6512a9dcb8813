//! playlog - records Spotify listening history into SQLite and streams new plays
//!
//! Two pollers feed the store, a change feed tails it, and a small HTTP
//! service exposes recent plays, analytics and a server-sent event stream.

mod api;
mod config;
mod core;
mod db;
mod errors;
mod models;
mod spotify;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::{resolve_config_file, LogFormat, LoggingSettings, Settings};
use crate::core::{ChangeFeed, Ingestor, NowPlayingPoller, RecentPoller, SubscriberRegistry};
use crate::db::{legacy, run_migrations, DbEngine, FeedReader, PlayTable};
use crate::spotify::{PlaybackApi, SpotifyClient};

/// playlog - Spotify listening history recorder
#[derive(Parser, Debug)]
#[command(name = "playlog")]
#[command(version)]
#[command(about = "Records Spotify listening history and streams new plays")]
struct Args {
    /// Host address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Path to a TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Import plays from a legacy `spotify_history` database and exit
    #[arg(long, value_name = "PATH")]
    import_legacy: Option<PathBuf>,
}

fn init_logging(settings: &LoggingSettings, debug: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("debug,sqlx=warn")
        } else {
            EnvFilter::new(&settings.filter)
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match settings.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().flatten_event(true).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // values from .env are visible to the settings loader and the fallbacks
    let dotenv = dotenvy::dotenv();

    let config_file = resolve_config_file(args.config.clone());
    let mut settings = Settings::load(config_file.as_deref())?;
    if let Some(host) = args.host {
        settings.server.host = host;
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    init_logging(&settings.logging, args.debug);
    info!("playlog v{} starting...", env!("CARGO_PKG_VERSION"));
    match (&config_file, dotenv) {
        (Some(path), _) => info!("Settings file: {:?}", path),
        (None, Ok(path)) => info!("No settings file, using environment from {:?}", path),
        (None, Err(_)) => info!("No settings file, using defaults and environment"),
    }

    info!("Database: {:?}", settings.database.path);
    let db = DbEngine::open(&settings.database).await?;
    run_migrations(&db).await?;
    info!("{} plays stored", PlayTable::count(db.pool()).await?);

    if let Some(path) = args.import_legacy {
        let report = legacy::import_from_file(db.pool(), &path)
            .await
            .with_context(|| format!("Legacy import from {:?} failed", path))?;
        info!(
            imported = report.imported,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Import complete"
        );
        db.pool().close().await;
        return Ok(());
    }

    let registry = Arc::new(SubscriberRegistry::new(settings.feed.queue_capacity));
    start_background_tasks(&settings, &db, &registry).await?;

    let state = AppState {
        db,
        registry,
        feed: settings.feed.clone(),
    };
    serve(&settings, state).await
}

async fn start_background_tasks(
    settings: &Settings,
    db: &DbEngine,
    registry: &Arc<SubscriberRegistry>,
) -> Result<()> {
    // the feed reads through its own connection
    let reader = FeedReader::new(DbEngine::open_reader(&settings.database).await?);
    let feed = ChangeFeed::new(Arc::new(reader), Arc::clone(registry), settings.feed.clone());
    tokio::spawn(feed.run());

    if !settings.spotify.has_credentials() {
        warn!(
            "Spotify credentials are missing (CLIENT_ID, CLIENT_SECRET, SPOTIFY_REFRESH_TOKEN); \
             pollers are disabled and only the HTTP service runs"
        );
        return Ok(());
    }

    let poller = &settings.poller;
    let api: Arc<dyn PlaybackApi> = Arc::new(SpotifyClient::new(&settings.spotify, poller.default_retry_after())?);
    let ingestor = Arc::new(Ingestor::new(Arc::new(db.clone()), poller.now_playing_window()));

    if poller.recent_enabled {
        tokio::spawn(RecentPoller::new(Arc::clone(&api), Arc::clone(&ingestor), poller.clone()).run());
    } else {
        info!("Recently played poller disabled");
    }

    if poller.now_playing_enabled {
        tokio::spawn(NowPlayingPoller::new(api, ingestor, poller.clone()).run());
    }

    Ok(())
}

async fn serve(settings: &Settings, state: AppState) -> Result<()> {
    use actix_cors::Cors;
    use actix_web::{middleware, web, App, HttpServer};

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let allowed_origin = settings.server.allowed_origin.clone();
    let data = web::Data::new(state);
    info!("Server listening on http://{}", addr);

    // no Compress middleware: it would buffer the event stream
    HttpServer::new(move || {
        let cors = match &allowed_origin {
            Some(origin) => Cors::default().allowed_origin(origin),
            None => Cors::default().allow_any_origin(),
        }
        .allowed_methods(vec!["GET"])
        .allow_any_header()
        .max_age(3600);

        App::new()
            .app_data(data.clone())
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .configure(api::configure)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
