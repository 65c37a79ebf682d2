use anyhow::Result;
use periodic_api::config::Config;
use periodic_api::seed::seed_store;
use periodic_api::server::Server;
use periodic_api::store::SqliteElementStore;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("periodic_api={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting periodic table API");
    tracing::info!(
        "Configuration: bind_addr={}, database_path={}, cache_ttl={:?}, anon_rate={}, user_rate={}",
        config.bind_addr,
        config.database_path.display(),
        config.cache_ttl,
        config.anon_rate,
        config.user_rate
    );

    let store = SqliteElementStore::open(&config.database_path)
        .map_err(|e| anyhow::anyhow!("Failed to open element store: {}", e))?;

    if let Some(seed_file) = &config.seed_file {
        seed_store(&store, seed_file)
            .map_err(|e| anyhow::anyhow!("Failed to seed element store: {}", e))?;
    }

    let server = Server::new(&config, Arc::new(store));

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
