//! booktrade API Server
//!
//! REST API server for booktrade sessions and identities.

use booktrade_api::{auth::ensure_schema, create_router, state::AppState};
use booktrade_core::AppConfig;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Filter from `LOG_LEVEL`; an unparsable value falls back to `info`
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("Invalid LOG_LEVEL {level:?} ({e}), using info");
        EnvFilter::new("info")
    })
}

fn init_tracing(config: &AppConfig) {
    // RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level_filter(&config.logging.level));

    if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Periodically delete expired refresh tokens
fn spawn_token_sweep(state: &Arc<AppState>) {
    let sessions = Arc::clone(&state.sessions);
    let every = state.config.auth.sweep_interval().max(Duration::from_secs(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sessions.sweep_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Swept expired refresh tokens"),
                Err(e) => tracing::warn!(error = %e, "Refresh token sweep failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config);

    if config.auth.uses_development_secrets() {
        tracing::warn!("Using built-in development signing secrets; set JWT_SECRET and JWT_REFRESH_SECRET");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.database.pool_size)
        .connect(&config.database.url)
        .await?;
    ensure_schema(&pool).await?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let cache_sweep = config.cache.sweep_interval();

    let state = Arc::new(AppState::postgres(config, pool)?);
    if !state.user_cache.start_sweeper(cache_sweep) {
        tracing::warn!("User cache sweeper not started");
    }
    spawn_token_sweep(&state);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("booktrade API Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui/", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
