use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use entity_api::cache::{CacheBackend, MemoryCache, PgCache};
use entity_api::config::{self, CacheBackendKind};
use entity_api::database::{DatabaseManager, PgBackend};
use entity_api::{app, AppContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, TOKEN_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = config::config();
    config.validate().context("invalid configuration")?;
    tracing::info!("Starting {} in {:?} mode", config.name, config.environment);

    let pool = DatabaseManager::connect(&config.database).await.context("connecting to database")?;
    let backend = Arc::new(PgBackend::new(pool.clone(), config.database.enable_query_logging));

    let cache: Arc<dyn CacheBackend> = match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.cache.max_capacity)),
        CacheBackendKind::Postgres => Arc::new(PgCache::new(pool)),
    };
    cache.init().await.context("initialising cache backend")?;

    let ctx = AppContext::new(backend, cache, config).context("building application context")?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Listening on http://{}", bind_addr);
    axum::serve(listener, app(ctx)).await.context("server")?;
    Ok(())
}
