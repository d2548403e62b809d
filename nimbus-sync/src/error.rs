//! Top level error module for the crate

use crate::address::AddressError;
use crate::client::ClientError;

/// Top level error enum encapsulating any error that may occur while refreshing the stores
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SyncError {
    /// Malformed address-like input
    #[error("Address error. {0}")]
    Address(#[from] AddressError),
    /// The remote client failed a request or subscription
    #[error("Client error. {0}")]
    Client(#[from] ClientError),
}
