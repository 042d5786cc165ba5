use std::sync::Mutex;

use snowflake::SnowflakeIdGenerator;

/// Mints globally unique, monotonically-sortable identifiers for orders
/// and watchers. The generator itself needs `&mut`, so it sits behind a
/// mutex; contention is negligible at the rates a single chain produces.
pub struct IdGenerator {
    node: Mutex<SnowflakeIdGenerator>,
}

impl IdGenerator {
    pub fn new(node_id: i32) -> Self {
        Self {
            node: Mutex::new(SnowflakeIdGenerator::new(1, node_id)),
        }
    }

    pub fn order_id(&self) -> String {
        format!("O_{}", self.next())
    }

    pub fn watcher_id(&self) -> String {
        format!("W_{}", self.next())
    }

    fn next(&self) -> i64 {
        self.node.lock().unwrap().real_time_generate()
    }
}
