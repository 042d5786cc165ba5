use anyhow::{anyhow, Result};
use async_trait::async_trait;
use ethers::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Receipt lookup, as narrow as the detector needs it. A missing receipt
/// is a transient downstream error: the block is retried as a whole.
#[async_trait]
pub trait ReceiptClient: Send + Sync {
    /// True unless the receipt reports status 0x0.
    async fn transaction_succeeded(&self, tx_hash: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct EthRpcClient {
    provider: Arc<Provider<Http>>,
}

impl EthRpcClient {
    pub async fn new(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let client = Self {
            provider: Arc::new(provider),
        };

        client.validate_connection().await?;
        Ok(client)
    }

    async fn validate_connection(&self) -> Result<()> {
        let chain_id = self.provider.get_chainid().await?;
        info!("Connected to upstream node, chain ID: {}", chain_id);
        Ok(())
    }

    pub async fn latest_block_number(&self) -> Result<u64> {
        let block_number = self.provider.get_block_number().await?;
        Ok(block_number.as_u64())
    }

    pub async fn block_with_txs(&self, block_number: u64) -> Result<Option<Block<Transaction>>> {
        let block = self
            .provider
            .get_block_with_txs(BlockNumber::Number(block_number.into()))
            .await?;
        Ok(block)
    }

    pub async fn transaction_receipt(&self, tx_hash: H256) -> Result<Option<TransactionReceipt>> {
        let receipt = self.provider.get_transaction_receipt(tx_hash).await?;
        Ok(receipt)
    }
}

#[async_trait]
impl ReceiptClient for EthRpcClient {
    async fn transaction_succeeded(&self, tx_hash: &str) -> Result<bool> {
        let hash: H256 = tx_hash
            .parse()
            .map_err(|e| anyhow!("invalid tx hash {}: {}", tx_hash, e))?;

        let receipt = self
            .transaction_receipt(hash)
            .await?
            .ok_or_else(|| anyhow!("no receipt for tx {}", tx_hash))?;

        Ok(receipt.status != Some(U64::zero()))
    }
}
