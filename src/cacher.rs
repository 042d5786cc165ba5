use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::models::{Order, Status};

/// In-memory lifecycle state machine for in-flight orders.
///
/// Holds exactly the set of orders whose status is PENDING or RUNNING,
/// sorted by ascending `pending_block`. Given the current block height it
/// classifies each order as still in flight, confirmable, or timed out.
/// All operations are pure in-memory and infallible; the collection is
/// bounded by the number of in-flight watched transactions.
pub struct OrderCacher {
    inner: Mutex<Vec<Order>>,
    confirm_blocks: i64,
    timeout_blocks: i64,
}

impl OrderCacher {
    pub fn new(confirm_blocks: i64, timeout_blocks: i64) -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
            confirm_blocks,
            timeout_blocks,
        }
    }

    /// Merge orders into the collection and re-sort by `pending_block`.
    /// Called at startup with the store's unconfirmed orders, and on
    /// recovery when a failed block hands its orders back.
    pub fn cache(&self, orders: Vec<Order>) {
        let mut inner = self.inner.lock().unwrap();
        inner.extend(orders);
        inner.sort_by_key(|order| order.pending_block);
    }

    /// Append a single order. Orders arrive in non-decreasing block
    /// order, so appending preserves the sort; a repeated `tx` is
    /// tolerated as a no-op.
    pub fn pend(&self, order: Order) {
        let mut inner = self.inner.lock().unwrap();
        if inner.iter().any(|cached| cached.tx == order.tx) {
            debug!(tx = %order.tx, "order already cached, skipping pend");
            return;
        }
        inner.push(order);
    }

    /// Transition a cached PENDING order to RUNNING once its transaction
    /// is seen in a mined block. Unused by the block driver, which
    /// creates orders directly RUNNING; kept for mempool-originated
    /// sources that observe submission before mining.
    pub fn mint(&self, tx: &str, block: i64, time: DateTime<Utc>) -> Option<Order> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner.iter_mut().find(|order| order.tx == tx)?;
        order.status = Status::Running;
        order.commit_block = block;
        order.commit_time = time;
        Some(order.clone())
    }

    /// Partition the collection at the given block height.
    ///
    /// Returns `(timeout, confirmed)`: PENDING orders older than
    /// `timeout_blocks` and RUNNING orders older than `confirm_blocks`.
    /// Returned orders are removed in the same critical section; they are
    /// the cacher's handoff to the detector, which must either publish
    /// them terminally or hand them back via [`cache`](Self::cache).
    pub fn confirm(&self, block: i64, _time: DateTime<Utc>) -> (Vec<Order>, Vec<Order>) {
        let mut inner = self.inner.lock().unwrap();

        let mut timeout = Vec::new();
        let mut confirmed = Vec::new();
        let mut remaining = Vec::with_capacity(inner.len());

        for order in inner.drain(..) {
            if order.status == Status::Pending && block - order.pending_block > self.timeout_blocks
            {
                timeout.push(order);
            } else if order.status == Status::Running
                && block - order.commit_block > self.confirm_blocks
            {
                confirmed.push(order);
            } else {
                remaining.push(order);
            }
        }

        *inner = remaining;

        (timeout, confirmed)
    }

    /// The latest-inserted order, iff it is still PENDING.
    pub fn pending(&self) -> Option<Order> {
        let inner = self.inner.lock().unwrap();
        let order = inner.last()?;
        if order.status == Status::Pending {
            Some(order.clone())
        } else {
            None
        }
    }

    /// Number of in-flight orders.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
