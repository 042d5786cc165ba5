mod api;
mod cacher;
mod config;
mod db;
mod detector;
mod erc20;
mod error;
mod ids;
mod indexer;
mod models;
mod notifier;
mod rpc;
mod schema;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::api::server::create_router;
use crate::cacher::OrderCacher;
use crate::config::Config;
use crate::db::connection::establish_pool;
use crate::db::orders::DbOrderStore;
use crate::db::watchers::DbWatcherRegistry;
use crate::detector::Detector;
use crate::ids::IdGenerator;
use crate::indexer::BlockIndexer;
use crate::notifier::WebhookNotifier;
use crate::rpc::client::EthRpcClient;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    init_logging(&config.log_level)?;

    info!("Starting eth-sensors");
    info!("RPC URL: {}", config.eth_node_url);
    info!(
        "Confirm blocks: {}, timeout blocks: {}",
        config.confirm_blocks, config.timeout_blocks
    );

    let pool = establish_pool(&config.database_url)?;

    run_migrations(&pool)?;

    let rpc_client = EthRpcClient::new(&config.eth_node_url).await?;
    let ids = Arc::new(IdGenerator::new(config.snowflake_node));

    let store = Arc::new(DbOrderStore::new(pool.clone()));
    let registry: Arc<DbWatcherRegistry> =
        Arc::new(DbWatcherRegistry::new(pool, ids.clone()));
    let notifier = Arc::new(WebhookNotifier::new(config.notify_url.clone()));
    let cacher = OrderCacher::new(config.confirm_blocks, config.timeout_blocks);

    let detector = Arc::new(Detector::new(
        cacher,
        store,
        registry.clone(),
        notifier,
        Arc::new(rpc_client.clone()),
        ids,
    ));

    // In-flight orders from a previous run must be back in the cacher
    // before the first block is ingested.
    detector.rehydrate()?;

    let block_indexer = BlockIndexer::new(
        rpc_client,
        detector.clone(),
        config.start_block,
        Duration::from_secs(config.poll_interval_secs),
    );

    let indexer_handle = tokio::spawn(async move {
        if let Err(e) = block_indexer.run().await {
            tracing::error!("Indexer failed: {:#}", e);
        }
    });

    let app = create_router(registry, detector);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Watcher API listening on {}", config.bind_addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            tracing::error!("Server failed: {}", e);
        }
    });

    tokio::select! {
        _ = indexer_handle => info!("Indexer stopped"),
        _ = server_handle => info!("Server stopped"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
}

fn run_migrations(pool: &crate::db::connection::DbPool) -> Result<()> {
    info!("Running database migrations...");

    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;

    info!("Migrations completed");
    Ok(())
}
