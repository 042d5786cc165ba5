use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::time::{interval, sleep};
use tracing::{error, info, warn};

use crate::detector::Detector;
use crate::rpc::client::EthRpcClient;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Feeds blocks to the detector strictly in height order.
///
/// A block that fails stays current: the detector has already restored
/// its in-flight state, so the same height is retried until it goes
/// through. Only a fully processed block advances the cursor.
pub struct BlockIndexer {
    rpc_client: EthRpcClient,
    detector: Arc<Detector>,
    start_block: Option<u64>,
    poll_interval: Duration,
}

impl BlockIndexer {
    pub fn new(
        rpc_client: EthRpcClient,
        detector: Arc<Detector>,
        start_block: Option<u64>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            rpc_client,
            detector,
            start_block,
            poll_interval,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let mut next_block = match self.start_block {
            Some(block_number) => block_number,
            None => self.rpc_client.latest_block_number().await?,
        };

        info!("Starting block ingestion at #{}", next_block);

        let mut ticker = interval(self.poll_interval);

        loop {
            ticker.tick().await;

            let head = match self.rpc_client.latest_block_number().await {
                Ok(head) => head,
                Err(e) => {
                    warn!("Failed to fetch chain head: {}", e);
                    continue;
                }
            };

            while next_block <= head {
                match self.process_one(next_block).await {
                    Ok(true) => {
                        next_block += 1;
                    }
                    Ok(false) => {
                        // The head moved past a block the node does not
                        // serve yet; wait for the next poll.
                        break;
                    }
                    Err(e) => {
                        error!("Failed to process block #{}: {:#}", next_block, e);
                        sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn process_one(&self, block_number: u64) -> Result<bool> {
        let Some(block) = self.rpc_client.block_with_txs(block_number).await? else {
            return Ok(false);
        };

        self.detector.process_block(&block).await?;

        if block_number % 100 == 0 {
            info!(
                "Processed block #{}, {} orders in flight",
                block_number,
                self.detector.in_flight()
            );
        }

        Ok(true)
    }
}
