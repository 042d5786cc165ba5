use std::fmt;
use std::io::Write;

use chrono::{DateTime, Utc};
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};

use crate::schema::eth_sensors_order;

/// Lifecycle status of an order.
///
/// Progression is monotone along one of two paths:
/// `RUNNING -> SUCCEED | FAILED`, or
/// `PENDING -> RUNNING -> SUCCEED | FAILED`, or
/// `PENDING -> FAILED` (timeout).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Created,
    Pending,
    Running,
    Succeed,
    Failed,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Created => "CREATED",
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Succeed => "SUCCEED",
            Status::Failed => "FAILED",
        }
    }

    /// Terminal orders never re-enter the cacher.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Succeed | Status::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql<Text, Pg> for Status {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        out.write_all(self.as_str().as_bytes())?;
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Pg> for Status {
    fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
        match std::str::from_utf8(bytes.as_bytes())? {
            "CREATED" => Ok(Status::Created),
            "PENDING" => Ok(Status::Pending),
            "RUNNING" => Ok(Status::Running),
            "SUCCEED" => Ok(Status::Succeed),
            "FAILED" => Ok(Status::Failed),
            other => Err(format!("unknown order status: {}", other).into()),
        }
    }
}

/// One row per watched transaction.
///
/// `tx` is the unique business key; saving the same transaction twice
/// collapses to a no-op. `confirm_block` stays at -1 and `confirm_time`
/// at NULL until the order reaches a terminal status.
#[derive(
    Debug, Clone, PartialEq, Queryable, Selectable, Insertable, AsChangeset, Serialize, Deserialize,
)]
#[diesel(table_name = eth_sensors_order)]
#[diesel(treat_none_as_null = true)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub tx: String,
    pub status: Status,
    pub pending_block: i64,
    pub commit_block: i64,
    pub confirm_block: i64,
    pub create_time: DateTime<Utc>,
    pub pending_time: DateTime<Utc>,
    pub commit_time: DateTime<Utc>,
    pub confirm_time: Option<DateTime<Utc>>,
    #[serde(rename = "from")]
    pub from_address: String,
    #[serde(rename = "to")]
    pub to_address: String,
    /// Hex-encoded transfer value.
    pub value: String,
    /// Raw transaction input data, hex.
    pub code: String,
    /// Computed effective gas limit, `gas / gas_price`, hex.
    pub gas_limits: String,
    pub gas_price: String,
}
