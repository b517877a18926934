//! Siren API server binary entrypoint.

use std::net::SocketAddr;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use siren_common::config::AppConfig;
use siren_common::db;
use siren_common::redis_pool::create_redis_pool;

use siren_api::routes::create_router;
use siren_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("siren_api=debug,siren_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting Siren API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;

    // Create Redis connection (broadcast publisher)
    let redis = create_redis_pool(&config.redis_url).await?;

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("LISTEN_ADDR '{}' is invalid: {}", config.listen_addr, e))?;

    // Build application state
    let state = AppState::new(pool, redis, config);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, draining connections...");
        }
    })
    .await?;

    tracing::info!("Siren API server stopped.");
    Ok(())
}
