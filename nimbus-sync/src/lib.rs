#![warn(missing_docs)]
//! Observable caches of ledger state, kept in sync through a [`client::LedgerClient`].
//!
//! Entrypoint: [`crate::stores::NimbusStores`]

use std::sync::Once;

pub mod accounts;
pub mod address;
pub mod blockchain;
pub mod client;
pub mod consensus;
pub mod error;
pub mod network;
pub mod observable;
#[allow(missing_docs)]
pub mod primitives;
pub mod refresh;
pub mod stores;
#[cfg(any(test, feature = "test-features"))]
#[allow(missing_docs)]
pub mod test_utils;
pub mod transactions;

static LOG_INIT: Once = Once::new();

/// Installs the default `tracing` subscriber, once per process. Later calls do nothing.
pub fn init_logging() {
    LOG_INIT.call_once(tracing_subscriber::fmt::init);
}
