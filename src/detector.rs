use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use ethers::types::{Block, Transaction, U256};
use tracing::{debug, info, warn};

use crate::cacher::OrderCacher;
use crate::db::orders::OrderStore;
use crate::db::watchers::WatcherRegistry;
use crate::erc20::{self, DecodeError};
use crate::ids::IdGenerator;
use crate::models::{Order, Status};
use crate::notifier::Notifier;
use crate::rpc::client::ReceiptClient;

/// Per-block driver of the order lifecycle.
///
/// For each ingested block the detector matches transactions against the
/// registered watchers, creates and publishes new orders, and reconciles
/// the cacher against the new height: mature orders are resolved through
/// their receipts, re-notified, and written back to the store.
///
/// The cacher holds authoritative in-flight state between blocks. If a
/// terminal decision cannot be durably published and persisted, it is not
/// committed in memory either: every failure after the cacher handed out
/// orders restores them with their statuses reverted, and the error
/// propagates so the ingester retries the same block.
pub struct Detector {
    cacher: OrderCacher,
    store: Arc<dyn OrderStore>,
    watchers: Arc<dyn WatcherRegistry>,
    notifier: Arc<dyn Notifier>,
    chain: Arc<dyn ReceiptClient>,
    ids: Arc<IdGenerator>,
}

impl Detector {
    pub fn new(
        cacher: OrderCacher,
        store: Arc<dyn OrderStore>,
        watchers: Arc<dyn WatcherRegistry>,
        notifier: Arc<dyn Notifier>,
        chain: Arc<dyn ReceiptClient>,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            cacher,
            store,
            watchers,
            notifier,
            chain,
            ids,
        }
    }

    /// Load the store's unconfirmed orders into the cacher. Must complete
    /// before block ingestion starts, or in-flight orders from a previous
    /// run are lost.
    pub fn rehydrate(&self) -> Result<()> {
        let orders = self.store.unconfirmed()?;
        info!("loaded {} unconfirmed orders", orders.len());
        self.cacher.cache(orders);
        Ok(())
    }

    /// Number of in-flight orders.
    pub fn in_flight(&self) -> usize {
        self.cacher.len()
    }

    /// The latest-enqueued order, iff it is still waiting to be mined.
    pub fn pending(&self) -> Option<Order> {
        self.cacher.pending()
    }

    /// Process one upstream block: every transaction in array order, then
    /// the block-level reconciliation. An error leaves the cacher in its
    /// pre-call state; the caller must retry the same block.
    pub async fn process_block(&self, block: &Block<Transaction>) -> Result<()> {
        let block_number = block
            .number
            .ok_or_else(|| anyhow!("block has no number"))?
            .as_u64() as i64;
        let block_time = DateTime::from_timestamp(block.timestamp.as_u64() as i64, 0)
            .ok_or_else(|| anyhow!("block {} has an out-of-range timestamp", block_number))?;

        for tx in &block.transactions {
            self.handle_transaction(tx, block_number, block_time)
                .await
                .with_context(|| format!("Failed to handle tx {:#x}", tx.hash))?;
        }

        self.handle_block(block_number, block_time)
            .await
            .with_context(|| format!("Failed to reconcile block {}", block_number))?;

        debug!(block = block_number, "block processed");

        Ok(())
    }

    /// Match one transaction against the watchers and, if it is of
    /// interest, create its order: notify, persist, enqueue.
    async fn handle_transaction(
        &self,
        tx: &Transaction,
        block_number: i64,
        block_time: DateTime<Utc>,
    ) -> Result<()> {
        let tx_hash = format!("{:#x}", tx.hash);
        let from = format!("{:#x}", tx.from);
        let to = tx
            .to
            .map(|address| format!("{:#x}", address))
            .unwrap_or_default();
        let code = format!("0x{}", hex::encode(&tx.input));

        let destination = self.effective_destination(&tx_hash, &to, &code)?;

        let watchers = self.watchers.find_matching(&from, &destination)?;
        if watchers.is_empty() {
            return Ok(());
        }

        debug!(tx = %tx_hash, watchers = watchers.len(), "found watchers for tx");

        // Malformed gas data must not block ingestion: log and move on.
        let Some(gas_price) = tx.gas_price else {
            warn!(tx = %tx_hash, "transaction carries no gas price, skipping");
            return Ok(());
        };
        let Some(gas_limits) = effective_gas_limit(tx.gas, gas_price) else {
            warn!(tx = %tx_hash, gas = %tx.gas, "cannot compute effective gas limit, skipping");
            return Ok(());
        };

        let order = Order {
            id: self.ids.order_id(),
            tx: tx_hash,
            status: Status::Running,
            pending_block: block_number,
            commit_block: block_number,
            confirm_block: -1,
            create_time: block_time,
            pending_time: block_time,
            commit_time: block_time,
            confirm_time: None,
            from_address: from,
            to_address: to,
            value: format!("{:#x}", tx.value),
            code,
            gas_limits: format!("{:#x}", gas_limits),
            gas_price: format!("{:#x}", gas_price),
        };

        // Notify before persisting: subscribers are idempotent, the store
        // is the source of truth across restarts, not within a block.
        for watcher in &watchers {
            self.notifier
                .notify(watcher, &order)
                .await
                .with_context(|| format!("Failed to notify watcher {}", watcher.key))?;
        }

        self.store.save(&order)?;
        self.cacher.pend(order);

        Ok(())
    }

    /// Reconcile the cacher against the new block height: resolve mature
    /// orders, publish their terminal state, and write them back. On any
    /// failure the removed orders re-enter the cacher unchanged.
    async fn handle_block(&self, block_number: i64, block_time: DateTime<Utc>) -> Result<()> {
        let (mut timeout, mut confirmed) = self.cacher.confirm(block_number, block_time);
        if timeout.is_empty() && confirmed.is_empty() {
            return Ok(());
        }

        if let Err(e) = self
            .publish_terminal(&mut timeout, &mut confirmed, block_number, block_time)
            .await
        {
            self.recache(timeout, confirmed);
            return Err(e);
        }

        Ok(())
    }

    async fn publish_terminal(
        &self,
        timeout: &mut [Order],
        confirmed: &mut [Order],
        block_number: i64,
        block_time: DateTime<Utc>,
    ) -> Result<()> {
        for order in timeout.iter_mut() {
            info!(id = %order.id, tx = %order.tx, block = block_number, "order timed out");
            order.status = Status::Failed;
            order.confirm_block = block_number;
            order.confirm_time = Some(block_time);
        }

        for order in confirmed.iter_mut() {
            let succeeded = self
                .chain
                .transaction_succeeded(&order.tx)
                .await
                .with_context(|| format!("Failed to fetch receipt for tx {}", order.tx))?;

            order.status = if succeeded {
                Status::Succeed
            } else {
                Status::Failed
            };
            order.confirm_block = block_number;
            order.confirm_time = Some(block_time);

            info!(id = %order.id, tx = %order.tx, status = %order.status, block = block_number, "order confirmed");
        }

        for order in timeout.iter().chain(confirmed.iter()) {
            let destination =
                self.effective_destination(&order.tx, &order.to_address, &order.code)?;
            let watchers = self
                .watchers
                .find_matching(&order.from_address, &destination)?;

            for watcher in &watchers {
                self.notifier
                    .notify(watcher, order)
                    .await
                    .with_context(|| format!("Failed to notify watcher {}", watcher.key))?;
            }
        }

        for order in timeout.iter().chain(confirmed.iter()) {
            self.store.update(order)?;
        }

        Ok(())
    }

    /// Hand orders back to the cacher with their statuses reverted so
    /// they re-enter the normal lifecycle on the retry of this block.
    fn recache(&self, mut timeout: Vec<Order>, mut confirmed: Vec<Order>) {
        for order in &mut timeout {
            order.status = Status::Pending;
            order.confirm_block = -1;
            order.confirm_time = None;
        }
        for order in &mut confirmed {
            order.status = Status::Running;
            order.confirm_block = -1;
            order.confirm_time = None;
        }

        warn!(
            orders = timeout.len() + confirmed.len(),
            "recaching orders after failed block"
        );

        timeout.extend(confirmed);
        self.cacher.cache(timeout);
    }

    /// The address used for watcher matching: `to` unchanged, unless `to`
    /// is a registered ERC-20 contract and the input is a well-formed
    /// `transfer` call, in which case the decoded recipient.
    fn effective_destination(&self, tx_hash: &str, to: &str, code: &str) -> Result<String> {
        if to.is_empty() {
            // Contract creation has no destination to match.
            return Ok(String::new());
        }

        if self.watchers.find_erc20(to)?.is_none() {
            return Ok(to.to_string());
        }

        match erc20::transfer_recipient(code) {
            Ok(recipient) => {
                debug!(tx = %tx_hash, recipient = %recipient, "decoded erc20 transfer recipient");
                Ok(recipient)
            }
            Err(DecodeError::NotTransfer) => {
                warn!(tx = %tx_hash, contract = %to, "call to watched contract is not a transfer");
                Ok(to.to_string())
            }
            Err(DecodeError::BadPayload) => {
                warn!(tx = %tx_hash, contract = %to, "unrecognized contract transfer shape");
                Ok(to.to_string())
            }
        }
    }
}

/// Effective gas limit: `gas / gas_price`, truncating. None when the gas
/// price is zero or missing upstream.
fn effective_gas_limit(gas: U256, gas_price: U256) -> Option<U256> {
    if gas_price.is_zero() {
        return None;
    }
    Some(gas / gas_price)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use anyhow::bail;
    use async_trait::async_trait;
    use ethers::types::{H256, U64};

    use super::*;
    use crate::error::SensorsError;
    use crate::models::{NewWatcher, Watcher};

    const ALICE: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa01";
    const BOB: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb02";
    const TOKEN: &str = "0xcccccccccccccccccccccccccccccccccccccc03";
    const CAROL: &str = "0xdddddddddddddddddddddddddddddddddddddd04";
    const STRANGER: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee05";

    struct MemoryStore {
        orders: Mutex<Vec<Order>>,
        fail_update: AtomicBool,
    }

    impl MemoryStore {
        fn new() -> Self {
            Self {
                orders: Mutex::new(Vec::new()),
                fail_update: AtomicBool::new(false),
            }
        }

        fn orders(&self) -> Vec<Order> {
            self.orders.lock().unwrap().clone()
        }
    }

    impl OrderStore for MemoryStore {
        fn save(&self, order: &Order) -> Result<()> {
            let mut orders = self.orders.lock().unwrap();
            if orders.iter().any(|existing| existing.tx == order.tx) {
                return Ok(());
            }
            orders.push(order.clone());
            Ok(())
        }

        fn update(&self, order: &Order) -> Result<()> {
            if self.fail_update.load(Ordering::Relaxed) {
                bail!("store offline");
            }
            let mut orders = self.orders.lock().unwrap();
            match orders.iter_mut().find(|existing| existing.id == order.id) {
                Some(slot) => {
                    *slot = order.clone();
                    Ok(())
                }
                None => Err(SensorsError::Version.into()),
            }
        }

        fn unconfirmed(&self) -> Result<Vec<Order>> {
            Ok(self
                .orders
                .lock()
                .unwrap()
                .iter()
                .filter(|order| !order.status.is_terminal())
                .cloned()
                .collect())
        }
    }

    struct MemoryWatchers {
        watchers: Mutex<Vec<Watcher>>,
    }

    impl MemoryWatchers {
        fn new() -> Self {
            Self {
                watchers: Mutex::new(Vec::new()),
            }
        }
    }

    impl WatcherRegistry for MemoryWatchers {
        fn create(&self, watcher: NewWatcher) -> Result<Watcher> {
            let mut watchers = self.watchers.lock().unwrap();
            if watchers.iter().any(|existing| existing.key == watcher.key) {
                return Err(SensorsError::WatcherExists.into());
            }
            let watcher = Watcher {
                id: format!("W_{}", watchers.len() + 1),
                name: watcher.name,
                key: watcher.key,
                address: watcher.address.to_lowercase(),
                erc20: watcher.erc20,
            };
            watchers.push(watcher.clone());
            Ok(watcher)
        }

        fn delete(&self, key: &str) -> Result<()> {
            self.watchers
                .lock()
                .unwrap()
                .retain(|watcher| watcher.key != key);
            Ok(())
        }

        fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Watcher>, i64)> {
            let watchers = self.watchers.lock().unwrap();
            let page = watchers
                .iter()
                .skip(offset as usize)
                .take(limit as usize)
                .cloned()
                .collect();
            Ok((page, watchers.len() as i64))
        }

        fn find_matching(&self, from: &str, to: &str) -> Result<Vec<Watcher>> {
            Ok(self
                .watchers
                .lock()
                .unwrap()
                .iter()
                .filter(|watcher| {
                    !watcher.erc20 && (watcher.address == from || watcher.address == to)
                })
                .cloned()
                .collect())
        }

        fn find_erc20(&self, address: &str) -> Result<Option<Watcher>> {
            Ok(self
                .watchers
                .lock()
                .unwrap()
                .iter()
                .find(|watcher| watcher.erc20 && watcher.address == address)
                .cloned())
        }
    }

    struct RecordingNotifier {
        sent: Mutex<Vec<(String, Order)>>,
        fail: AtomicBool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn sent(&self) -> Vec<(String, Order)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, watcher: &Watcher, order: &Order) -> Result<()> {
            if self.fail.load(Ordering::Relaxed) {
                bail!("notify failed");
            }
            self.sent
                .lock()
                .unwrap()
                .push((watcher.key.clone(), order.clone()));
            Ok(())
        }
    }

    struct FakeChain {
        receipts: Mutex<HashMap<String, bool>>,
    }

    impl FakeChain {
        fn new() -> Self {
            Self {
                receipts: Mutex::new(HashMap::new()),
            }
        }

        fn set_receipt(&self, tx: &str, succeeded: bool) {
            self.receipts
                .lock()
                .unwrap()
                .insert(tx.to_string(), succeeded);
        }
    }

    #[async_trait]
    impl ReceiptClient for FakeChain {
        async fn transaction_succeeded(&self, tx_hash: &str) -> Result<bool> {
            self.receipts
                .lock()
                .unwrap()
                .get(tx_hash)
                .copied()
                .ok_or_else(|| anyhow!("no receipt for tx {}", tx_hash))
        }
    }

    struct Harness {
        detector: Detector,
        store: Arc<MemoryStore>,
        watchers: Arc<MemoryWatchers>,
        notifier: Arc<RecordingNotifier>,
        chain: Arc<FakeChain>,
    }

    fn harness(confirm_blocks: i64, timeout_blocks: i64) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let watchers = Arc::new(MemoryWatchers::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let chain = Arc::new(FakeChain::new());

        let detector = Detector::new(
            OrderCacher::new(confirm_blocks, timeout_blocks),
            store.clone(),
            watchers.clone(),
            notifier.clone(),
            chain.clone(),
            Arc::new(IdGenerator::new(4)),
        );

        Harness {
            detector,
            store,
            watchers,
            notifier,
            chain,
        }
    }

    fn register(watchers: &MemoryWatchers, key: &str, address: &str, erc20: bool) -> Watcher {
        watchers
            .create(NewWatcher {
                name: key.to_string(),
                key: key.to_string(),
                address: address.to_string(),
                erc20,
            })
            .unwrap()
    }

    fn transaction(hash_byte: u64, from: &str, to: &str, input: Vec<u8>) -> Transaction {
        Transaction {
            hash: H256::from_low_u64_be(hash_byte),
            from: from.parse().unwrap(),
            to: Some(to.parse().unwrap()),
            gas: U256::from(21000),
            gas_price: Some(U256::from(1000)),
            value: U256::from(10),
            input: input.into(),
            ..Default::default()
        }
    }

    fn block(number: u64, transactions: Vec<Transaction>) -> Block<Transaction> {
        Block {
            number: Some(U64::from(number)),
            timestamp: U256::from(1_700_000_000u64 + number),
            transactions,
            ..Default::default()
        }
    }

    fn tx_hash(hash_byte: u64) -> String {
        format!("{:#x}", H256::from_low_u64_be(hash_byte))
    }

    /// Everything still in the cacher, drained for inspection.
    fn drain_cacher(detector: &Detector) -> Vec<Order> {
        let (timeout, confirmed) = detector.cacher.confirm(i64::MAX, Utc::now());
        timeout.into_iter().chain(confirmed).collect()
    }

    #[tokio::test]
    async fn happy_path_notifies_running_then_succeed() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);
        h.chain.set_receipt(&tx_hash(1), true);

        h.detector
            .process_block(&block(100, vec![transaction(1, ALICE, BOB, vec![])]))
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        let (key, order) = &sent[0];
        assert_eq!(key, "alice");
        assert_eq!(order.status, Status::Running);
        assert_eq!(order.pending_block, 100);
        assert_eq!(order.commit_block, 100);
        assert_eq!(order.confirm_block, -1);
        // 21000 / 1000, truncating.
        assert_eq!(order.gas_limits, "0x15");
        assert_eq!(h.detector.in_flight(), 1);

        // 101 - 100 = 1 is not > confirm_blocks: nothing happens yet.
        h.detector.process_block(&block(101, vec![])).await.unwrap();
        assert_eq!(h.notifier.sent().len(), 1);
        assert_eq!(h.detector.in_flight(), 1);

        // 102 - 100 = 2 > 1: receipt is consulted and the order succeeds.
        h.detector.process_block(&block(102, vec![])).await.unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        let (_, order) = &sent[1];
        assert_eq!(order.status, Status::Succeed);
        assert_eq!(order.confirm_block, 102);
        assert!(order.confirm_time.is_some());
        assert_eq!(h.detector.in_flight(), 0);

        let stored = h.store.orders();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, Status::Succeed);
    }

    #[tokio::test]
    async fn failed_receipt_marks_order_failed() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);
        h.chain.set_receipt(&tx_hash(1), false);

        h.detector
            .process_block(&block(100, vec![transaction(1, ALICE, BOB, vec![])]))
            .await
            .unwrap();
        h.detector.process_block(&block(101, vec![])).await.unwrap();
        h.detector.process_block(&block(102, vec![])).await.unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.last().unwrap().1.status, Status::Failed);
        assert_eq!(h.store.orders()[0].status, Status::Failed);
    }

    #[tokio::test]
    async fn pending_orders_time_out_to_failed() {
        let h = harness(1, 3);
        let watcher = register(&h.watchers, "alice", ALICE, false);

        let now = Utc::now();
        let order = Order {
            id: "O_1".to_string(),
            tx: tx_hash(7),
            status: Status::Pending,
            pending_block: 10,
            commit_block: 10,
            confirm_block: -1,
            create_time: now,
            pending_time: now,
            commit_time: now,
            confirm_time: None,
            from_address: watcher.address.clone(),
            to_address: BOB.to_string(),
            value: "0x0".to_string(),
            code: "0x".to_string(),
            gas_limits: "0x15".to_string(),
            gas_price: "0x3b9aca00".to_string(),
        };
        h.store.save(&order).unwrap();
        h.detector.cacher.pend(order);

        // 14 - 10 = 4 > 3: the pending order is given up as lost.
        h.detector.process_block(&block(14, vec![])).await.unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.status, Status::Failed);
        assert_eq!(sent[0].1.confirm_block, 14);
        assert_eq!(h.detector.in_flight(), 0);
        assert_eq!(h.store.orders()[0].status, Status::Failed);
    }

    #[tokio::test]
    async fn duplicate_block_feed_is_idempotent() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        let feed = block(200, vec![transaction(9, ALICE, BOB, vec![])]);
        h.detector.process_block(&feed).await.unwrap();
        h.detector.process_block(&feed).await.unwrap();

        // The second save collapses to a no-op and the cacher keeps one
        // entry; the watcher simply sees the creation notification again.
        assert_eq!(h.store.orders().len(), 1);
        assert_eq!(h.detector.in_flight(), 1);
        assert_eq!(h.notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn erc20_transfer_routes_to_decoded_recipient() {
        let h = harness(1, 60);
        register(&h.watchers, "token", TOKEN, true);
        register(&h.watchers, "carol", CAROL, false);

        let input = hex::decode(format!(
            "a9059cbb{:0>64}{:0>64}",
            CAROL.trim_start_matches("0x"),
            "64"
        ))
        .unwrap();

        h.detector
            .process_block(&block(300, vec![transaction(2, STRANGER, TOKEN, input)]))
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "carol");
        // The order itself keeps the raw destination.
        assert_eq!(sent[0].1.to_address, TOKEN);
    }

    #[tokio::test]
    async fn non_transfer_call_to_watched_contract_falls_back() {
        let h = harness(1, 60);
        register(&h.watchers, "token", TOKEN, true);

        // approve(address,uint256): not a transfer, so the effective
        // destination stays the contract, which only the ERC-20 watcher
        // covers; no order is created.
        let input = hex::decode(format!(
            "095ea7b3{:0>64}{:0>64}",
            CAROL.trim_start_matches("0x"),
            "64"
        ))
        .unwrap();

        h.detector
            .process_block(&block(300, vec![transaction(3, STRANGER, TOKEN, input)]))
            .await
            .unwrap();

        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.detector.in_flight(), 0);
    }

    #[tokio::test]
    async fn notify_failure_recaches_with_reverted_status() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        let now = Utc::now();
        let order = Order {
            id: "O_1".to_string(),
            tx: tx_hash(5),
            status: Status::Running,
            pending_block: 50,
            commit_block: 50,
            confirm_block: -1,
            create_time: now,
            pending_time: now,
            commit_time: now,
            confirm_time: None,
            from_address: ALICE.to_string(),
            to_address: BOB.to_string(),
            value: "0x0".to_string(),
            code: "0x".to_string(),
            gas_limits: "0x15".to_string(),
            gas_price: "0x3b9aca00".to_string(),
        };
        h.store.save(&order).unwrap();
        h.detector.cacher.pend(order);
        h.chain.set_receipt(&tx_hash(5), true);
        h.notifier.fail.store(true, Ordering::Relaxed);

        let err = h.detector.process_block(&block(52, vec![])).await;
        assert!(err.is_err());

        // The order is back in flight exactly as it was before the call.
        let cached = drain_cacher(&h.detector);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].status, Status::Running);
        assert_eq!(cached[0].confirm_block, -1);
        assert!(cached[0].confirm_time.is_none());
        // The store never saw the terminal transition.
        assert_eq!(h.store.orders()[0].status, Status::Running);
    }

    #[tokio::test]
    async fn receipt_failure_recaches_before_any_notify() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        let now = Utc::now();
        let order = Order {
            id: "O_1".to_string(),
            tx: tx_hash(6),
            status: Status::Running,
            pending_block: 50,
            commit_block: 50,
            confirm_block: -1,
            create_time: now,
            pending_time: now,
            commit_time: now,
            confirm_time: None,
            from_address: ALICE.to_string(),
            to_address: BOB.to_string(),
            value: "0x0".to_string(),
            code: "0x".to_string(),
            gas_limits: "0x15".to_string(),
            gas_price: "0x3b9aca00".to_string(),
        };
        h.store.save(&order).unwrap();
        h.detector.cacher.pend(order);
        // No receipt registered: the lookup fails.

        let err = h.detector.process_block(&block(52, vec![])).await;
        assert!(err.is_err());

        assert!(h.notifier.sent().is_empty());
        let cached = drain_cacher(&h.detector);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].status, Status::Running);
    }

    #[tokio::test]
    async fn missing_store_row_recaches_and_propagates() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        let now = Utc::now();
        let order = Order {
            id: "O_1".to_string(),
            tx: tx_hash(8),
            status: Status::Running,
            pending_block: 50,
            commit_block: 50,
            confirm_block: -1,
            create_time: now,
            pending_time: now,
            commit_time: now,
            confirm_time: None,
            from_address: ALICE.to_string(),
            to_address: BOB.to_string(),
            value: "0x0".to_string(),
            code: "0x".to_string(),
            gas_limits: "0x15".to_string(),
            gas_price: "0x3b9aca00".to_string(),
        };
        // Deliberately not saved: update will touch zero rows.
        h.detector.cacher.pend(order);
        h.chain.set_receipt(&tx_hash(8), true);

        let err = h
            .detector
            .process_block(&block(52, vec![]))
            .await
            .unwrap_err();
        assert_eq!(
            err.root_cause()
                .downcast_ref::<SensorsError>()
                .expect("version error"),
            &SensorsError::Version
        );

        let cached = drain_cacher(&h.detector);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].status, Status::Running);
        assert_eq!(cached[0].confirm_block, -1);
    }

    #[tokio::test]
    async fn malformed_gas_data_skips_the_transaction() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        let mut no_price = transaction(11, ALICE, BOB, vec![]);
        no_price.gas_price = None;

        let mut zero_price = transaction(12, ALICE, BOB, vec![]);
        zero_price.gas_price = Some(U256::zero());

        h.detector
            .process_block(&block(100, vec![no_price, zero_price]))
            .await
            .unwrap();

        assert!(h.notifier.sent().is_empty());
        assert!(h.store.orders().is_empty());
        assert_eq!(h.detector.in_flight(), 0);
    }

    #[tokio::test]
    async fn unwatched_transactions_are_ignored() {
        let h = harness(1, 60);
        register(&h.watchers, "alice", ALICE, false);

        h.detector
            .process_block(&block(100, vec![transaction(13, STRANGER, BOB, vec![])]))
            .await
            .unwrap();

        assert!(h.notifier.sent().is_empty());
        assert_eq!(h.detector.in_flight(), 0);
    }

    #[tokio::test]
    async fn rehydrate_loads_only_unconfirmed_orders() {
        let h = harness(1, 60);

        let now = Utc::now();
        for (i, status) in [Status::Running, Status::Pending, Status::Succeed]
            .into_iter()
            .enumerate()
        {
            let order = Order {
                id: format!("O_{}", i),
                tx: tx_hash(20 + i as u64),
                status,
                pending_block: 5 + i as i64,
                commit_block: 5 + i as i64,
                confirm_block: -1,
                create_time: now,
                pending_time: now,
                commit_time: now,
                confirm_time: None,
                from_address: ALICE.to_string(),
                to_address: BOB.to_string(),
                value: "0x0".to_string(),
                code: "0x".to_string(),
                gas_limits: "0x15".to_string(),
                gas_price: "0x3b9aca00".to_string(),
            };
            h.store.save(&order).unwrap();
        }

        h.detector.rehydrate().unwrap();
        assert_eq!(h.detector.in_flight(), 2);
    }

    #[test]
    fn effective_gas_limit_truncates() {
        assert_eq!(
            effective_gas_limit(U256::from(21000), U256::from(1_000_000_000u64)),
            Some(U256::zero())
        );
        assert_eq!(
            effective_gas_limit(U256::from(21000), U256::from(1000)),
            Some(U256::from(21))
        );
        assert_eq!(effective_gas_limit(U256::from(21000), U256::zero()), None);
    }
}
