use anyhow::{Context, Result};
use diesel::prelude::*;
use tracing::warn;

use crate::db::connection::DbPool;
use crate::error::SensorsError;
use crate::models::{Order, Status};
use crate::schema::eth_sensors_order;

/// Durable persistence of orders. The store is the source of truth
/// across restarts; within a block the cacher leads and the store
/// follows.
pub trait OrderStore: Send + Sync {
    /// Insert one order. A duplicate `tx` collapses to a no-op success;
    /// any other persistence error propagates.
    fn save(&self, order: &Order) -> Result<()>;

    /// Write by primary key. Zero affected rows means an order believed
    /// in-flight is no longer in the store; fails with
    /// [`SensorsError::Version`].
    fn update(&self, order: &Order) -> Result<()>;

    /// All rows whose status is PENDING or RUNNING. Called once at
    /// startup to rehydrate the cacher.
    fn unconfirmed(&self) -> Result<Vec<Order>>;
}

pub struct DbOrderStore {
    pool: DbPool,
}

impl DbOrderStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl OrderStore for DbOrderStore {
    fn save(&self, order: &Order) -> Result<()> {
        let mut conn = self.pool.get()?;

        let inserted = diesel::insert_into(eth_sensors_order::table)
            .values(order)
            .on_conflict(eth_sensors_order::tx)
            .do_nothing()
            .execute(&mut conn)
            .context("Failed to insert order")?;

        if inserted == 0 {
            warn!(tx = %order.tx, "order already saved for tx, skipping");
        }

        Ok(())
    }

    fn update(&self, order: &Order) -> Result<()> {
        let mut conn = self.pool.get()?;

        let affected = diesel::update(eth_sensors_order::table.find(&order.id))
            .set(order)
            .execute(&mut conn)
            .context("Failed to update order")?;

        if affected == 0 {
            return Err(SensorsError::Version.into());
        }

        Ok(())
    }

    fn unconfirmed(&self) -> Result<Vec<Order>> {
        let mut conn = self.pool.get()?;

        let orders = eth_sensors_order::table
            .filter(
                eth_sensors_order::status
                    .eq(Status::Pending)
                    .or(eth_sensors_order::status.eq(Status::Running)),
            )
            .order(eth_sensors_order::pending_block.asc())
            .load::<Order>(&mut conn)
            .context("Failed to load unconfirmed orders")?;

        Ok(orders)
    }
}
