pub mod order;
pub mod watcher;

pub use order::{Order, Status};
pub use watcher::{NewWatcher, Watcher};
