use anyhow::{Context, Result};
use std::env;

/// Runtime configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Snowflake node id used when minting order/watcher ids.
    pub snowflake_node: i32,
    /// Upstream Ethereum JSON-RPC endpoint.
    pub eth_node_url: String,
    /// Blocks that must pass after mining before the receipt is trusted.
    pub confirm_blocks: i64,
    /// Blocks after which a pending order is given up as lost.
    pub timeout_blocks: i64,
    pub database_url: String,
    /// Webhook endpoint that receives `{watcher, order}` notifications.
    pub notify_url: String,
    /// First block to ingest; defaults to the chain head at startup.
    pub start_block: Option<u64>,
    pub poll_interval_secs: u64,
    pub bind_addr: String,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            snowflake_node: parse_or("SNODE", 4)?,
            eth_node_url: env::var("ETH_NODE_URL")
                .unwrap_or_else(|_| "http://localhost:8545".to_string()),
            confirm_blocks: parse_or("ORDER_CONFIRMED", 1)?,
            timeout_blocks: parse_or("ORDER_TIMEOUT", 60)?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/sensors".to_string()),
            notify_url: env::var("NOTIFY_URL")
                .unwrap_or_else(|_| "http://localhost:9000/notify".to_string()),
            start_block: match env::var("START_BLOCK") {
                Ok(raw) => Some(raw.parse().context("invalid START_BLOCK")?),
                Err(_) => None,
            },
            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", 12)?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn parse_or<T: std::str::FromStr>(var: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(var) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {}", var)),
        Err(_) => Ok(default),
    }
}
