//! A transaction known to the client is in exactly one of these states.
//!  New === created locally, not yet relayed
//!  Pending === in the mempool
//!  Mined === included in a block, not yet final
//!  Confirmed === included with enough confirmations
//!  Invalidated / Expired === dropped, will never be mined

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownStatus;

/// Lifecycle state of a transaction as reported by the remote client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// Created locally and not yet relayed.
    New,
    /// Waiting in the mempool.
    Pending,
    /// Included in a block.
    Mined,
    /// Rejected by the network.
    Invalidated,
    /// Left the validity window without being mined.
    Expired,
    /// Included in a block that has enough confirmations.
    Confirmed,
}

impl TransactionState {
    /// A wrapper matching the states that have not reached a block yet.
    ///
    /// ```
    /// use nimbus_status::transaction_state::TransactionState;
    ///
    /// assert!(TransactionState::Pending.is_pending());
    /// assert!(TransactionState::New.is_pending());
    /// assert!(!TransactionState::Mined.is_pending());
    /// ```
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::New | Self::Pending)
    }

    /// A wrapper matching the states that are in a block.
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Mined | Self::Confirmed)
    }

    /// True if the transaction will never be mined.
    pub fn is_dropped(&self) -> bool {
        matches!(self, Self::Invalidated | Self::Expired)
    }

    /// The lowercase name the client uses on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Mined => "mined",
            Self::Invalidated => "invalidated",
            Self::Expired => "expired",
            Self::Confirmed => "confirmed",
        }
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionState {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "pending" => Ok(Self::Pending),
            "mined" => Ok(Self::Mined),
            "invalidated" => Ok(Self::Invalidated),
            "expired" => Ok(Self::Expired),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(UnknownStatus::new("transaction state", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(TransactionState::New, true, false, false)]
    #[test_case(TransactionState::Pending, true, false, false)]
    #[test_case(TransactionState::Mined, false, true, false)]
    #[test_case(TransactionState::Confirmed, false, true, false)]
    #[test_case(TransactionState::Invalidated, false, false, true)]
    #[test_case(TransactionState::Expired, false, false, true)]
    fn classifies(state: TransactionState, pending: bool, confirmed: bool, dropped: bool) {
        assert_eq!(state.is_pending(), pending);
        assert_eq!(state.is_confirmed(), confirmed);
        assert_eq!(state.is_dropped(), dropped);
    }

    #[test]
    fn string_form_matches_serde() {
        for state in [
            TransactionState::New,
            TransactionState::Pending,
            TransactionState::Mined,
            TransactionState::Invalidated,
            TransactionState::Expired,
            TransactionState::Confirmed,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
            assert_eq!(state.as_str().parse::<TransactionState>().unwrap(), state);
        }
    }
}
