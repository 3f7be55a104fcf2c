//! Gabinete Digital data store
//!
//! REST backend with SQLite persistence and Tantivy full-text search, serving
//! the collections the offline sync client reads and writes.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gabinete_sync::config::Config;
use gabinete_sync::db::{self, Repository};
use gabinete_sync::search::SearchIndex;
use gabinete_sync::{create_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gabinete Digital data store");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (GABINETE_API_PSK). Authentication is disabled!");
    }

    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let search = Arc::new(SearchIndex::open(&config.index_path)?);
    let demands = repo.list_demands().await?;
    search.rebuild(&demands).await?;

    let state = AppState {
        repo,
        search,
        config: Arc::new(config.clone()),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
