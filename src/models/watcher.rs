use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::eth_sensors_watcher;

/// Registered interest in transactions touching an address.
///
/// When `erc20` is true the address is a token contract and the watcher
/// marks it for `transfer` decoding; the decoded recipient is the real
/// target of interest.
#[derive(
    Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize,
)]
#[diesel(table_name = eth_sensors_watcher)]
pub struct Watcher {
    pub id: String,
    pub name: String,
    /// Unique business key provided by the notifier side.
    pub key: String,
    /// Watched address, stored lower-cased.
    pub address: String,
    pub erc20: bool,
}

/// Registration request; the registry assigns the id and normalizes
/// the address.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWatcher {
    pub name: String,
    pub key: String,
    pub address: String,
    #[serde(default)]
    pub erc20: bool,
}
