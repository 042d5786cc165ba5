use std::sync::Arc;

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::info;

use crate::db::connection::DbPool;
use crate::error::SensorsError;
use crate::ids::IdGenerator;
use crate::models::{NewWatcher, Watcher};
use crate::schema::eth_sensors_watcher;

/// Registration and lookup of watchers. The detector consumes the two
/// lookup operations; the API surface consumes the rest.
pub trait WatcherRegistry: Send + Sync {
    /// Assign an id, lower-case the address, insert. A duplicate `key`
    /// fails with [`SensorsError::WatcherExists`].
    fn create(&self, watcher: NewWatcher) -> Result<Watcher>;

    /// Remove by business key.
    fn delete(&self, key: &str) -> Result<()>;

    /// Paginated enumeration; returns the page and the total count.
    fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Watcher>, i64)>;

    /// Non-ERC-20 watchers whose address equals `from` or `to`.
    fn find_matching(&self, from: &str, to: &str) -> Result<Vec<Watcher>>;

    /// The ERC-20 watcher registered for a contract address, if any.
    fn find_erc20(&self, address: &str) -> Result<Option<Watcher>>;
}

pub struct DbWatcherRegistry {
    pool: DbPool,
    ids: Arc<IdGenerator>,
}

impl DbWatcherRegistry {
    pub fn new(pool: DbPool, ids: Arc<IdGenerator>) -> Self {
        Self { pool, ids }
    }
}

impl WatcherRegistry for DbWatcherRegistry {
    fn create(&self, watcher: NewWatcher) -> Result<Watcher> {
        let mut conn = self.pool.get()?;

        let watcher = Watcher {
            id: self.ids.watcher_id(),
            name: watcher.name,
            key: watcher.key,
            address: watcher.address.to_lowercase(),
            erc20: watcher.erc20,
        };

        match diesel::insert_into(eth_sensors_watcher::table)
            .values(&watcher)
            .execute(&mut conn)
        {
            Ok(_) => {
                info!(id = %watcher.id, key = %watcher.key, address = %watcher.address, "registered watcher");
                Ok(watcher)
            }
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(SensorsError::WatcherExists.into())
            }
            Err(e) => Err(e).context("Failed to insert watcher"),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.pool.get()?;

        diesel::delete(eth_sensors_watcher::table.filter(eth_sensors_watcher::key.eq(key)))
            .execute(&mut conn)
            .context("Failed to delete watcher")?;

        Ok(())
    }

    fn list(&self, limit: i64, offset: i64) -> Result<(Vec<Watcher>, i64)> {
        let mut conn = self.pool.get()?;

        let watchers = eth_sensors_watcher::table
            .order(eth_sensors_watcher::id.asc())
            .limit(limit)
            .offset(offset)
            .load::<Watcher>(&mut conn)
            .context("Failed to list watchers")?;

        let total = eth_sensors_watcher::table
            .count()
            .get_result::<i64>(&mut conn)
            .context("Failed to count watchers")?;

        Ok((watchers, total))
    }

    fn find_matching(&self, from: &str, to: &str) -> Result<Vec<Watcher>> {
        let mut conn = self.pool.get()?;

        let watchers = eth_sensors_watcher::table
            .filter(
                eth_sensors_watcher::erc20.eq(false).and(
                    eth_sensors_watcher::address
                        .eq(from)
                        .or(eth_sensors_watcher::address.eq(to)),
                ),
            )
            .load::<Watcher>(&mut conn)
            .context("Failed to find matching watchers")?;

        Ok(watchers)
    }

    fn find_erc20(&self, address: &str) -> Result<Option<Watcher>> {
        let mut conn = self.pool.get()?;

        let watcher = eth_sensors_watcher::table
            .filter(
                eth_sensors_watcher::address
                    .eq(address)
                    .and(eth_sensors_watcher::erc20.eq(true)),
            )
            .first::<Watcher>(&mut conn)
            .optional()
            .context("Failed to look up erc20 watcher")?;

        Ok(watcher)
    }
}
