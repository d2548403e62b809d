//! Consensus as reported by the remote client.
//!
//! `Loading` is local only: it is what the stores show before the client has
//! reported anything.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::UnknownStatus;

/// Consensus state of the remote client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusState {
    /// The client has not reported a state yet.
    #[default]
    Loading,
    /// Connecting to peers.
    Connecting,
    /// Connected, catching up with the chain.
    Syncing,
    /// The client has a trustworthy view of the chain head.
    Established,
}

impl ConsensusState {
    /// A wrapper matching the Established case.
    ///
    /// ```
    /// use nimbus_status::consensus_state::ConsensusState;
    ///
    /// assert!(ConsensusState::Established.is_established());
    /// assert!(!ConsensusState::Syncing.is_established());
    /// ```
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established)
    }

    /// The lowercase name the client uses on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Connecting => "connecting",
            Self::Syncing => "syncing",
            Self::Established => "established",
        }
    }
}

impl std::fmt::Display for ConsensusState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusState {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(Self::Loading),
            "connecting" => Ok(Self::Connecting),
            "syncing" => Ok(Self::Syncing),
            "established" => Ok(Self::Established),
            other => Err(UnknownStatus::new("consensus state", other)),
        }
    }
}

impl From<ConsensusState> for String {
    fn from(value: ConsensusState) -> Self {
        format!("{value}")
    }
}
