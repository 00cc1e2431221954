use axum::http::HeaderValue;
use axum::Router;
use std::{net::SocketAddr, path::Path, sync::Arc};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod constants;
mod crypto;
mod db;
mod error;
mod models;
mod services;
mod storage;
mod utils;
mod websocket;

use config::Config;
use constants::API_VERSION;
use db::Database;
use storage::{FsBlobStore, KvStore, MemoryKv, RedisKv};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sprout_world=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting Sprout World server");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    // Initialize database
    ensure_sqlite_parent_dir(&config.database_url).await?;
    let db = Database::new(&config).await?;

    tracing::info!("Running database migrations...");
    db.run_migrations().await?;

    // Initialize KV
    let kv: Arc<dyn KvStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisKv::connect(url).await?),
        None => Arc::new(MemoryKv::new()),
    };

    let blobs = Arc::new(FsBlobStore::open(&config.blob_dir).await?);
    let generator = Arc::new(services::StabilityClient::new(&config)?);

    let app_state = api::AppState::new(db.clone(), kv, blobs, generator, config.clone());

    // Start background services
    tokio::spawn(services::start_background_services(
        app_state.creation_service(),
        db,
        config.clone(),
    ));

    let app = build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: api::AppState) -> Router {
    let cors = cors_from_config(&state.config);

    api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    // Credentialed CORS cannot use wildcard methods or headers.
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
        .allow_credentials(true)
}

/// SQLite creates the file but not its directory.
async fn ensure_sqlite_parent_dir(database_url: &str) -> anyhow::Result<()> {
    let Some(rest) = database_url.strip_prefix("sqlite:") else {
        return Ok(());
    };
    let path = rest.trim_start_matches("//");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return Ok(());
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    Ok(())
}
