//! Tablesync Server binary.

use std::sync::Arc;

use tablesync_engine::{Clock, SystemClock};
use tablesync_server::backend::Backend;
use tablesync_server::config::Config;
use tablesync_server::{app, db, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tablesync_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tablesync Server on {}:{}", config.host, config.port);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let backend = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            Backend::postgres(pool, clock, config.sync_options())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, rows are kept in memory only");
            Backend::memory(clock, config.sync_options())
        }
    };
    tracing::info!(backend = backend.kind(), "Storage backend ready");

    let addr = format!("{}:{}", config.host, config.port);
    let app = app(AppState::new(backend, config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
