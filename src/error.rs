use thiserror::Error;

/// Typed error kinds the core raises; everything else travels as
/// `anyhow::Error` context from the layer that produced it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SensorsError {
    /// A watcher with the same key is already registered.
    #[error("watcher exists")]
    WatcherExists,

    /// An update touched zero rows: an order believed in-flight is no
    /// longer in the store. Fatal for the current block.
    #[error("order version error")]
    Version,
}
