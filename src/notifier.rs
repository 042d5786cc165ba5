use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use crate::models::{Order, Watcher};

/// Delivers one status update to one watcher.
///
/// Delivery is at-least-once: the detector notifies before it persists,
/// so a crash between the two replays the notification on retry.
/// Receivers must treat `(order.id, order.status)` as idempotent. A
/// returned error halts block processing; absence of error means
/// "delivered" for the purposes of progress.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, watcher: &Watcher, order: &Order) -> Result<()>;
}

/// POSTs `{watcher, order}` as JSON to a single configured endpoint.
pub struct WebhookNotifier {
    client: Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, watcher: &Watcher, order: &Order) -> Result<()> {
        debug!(key = %watcher.key, tx = %order.tx, status = %order.status, "notifying watcher");

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "watcher": watcher,
                "order": order,
            }))
            .send()
            .await
            .with_context(|| format!("Failed to reach notify endpoint {}", self.endpoint))?;

        response
            .error_for_status()
            .with_context(|| format!("Notify endpoint rejected update for tx {}", order.tx))?;

        Ok(())
    }
}
