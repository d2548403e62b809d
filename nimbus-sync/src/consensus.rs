//! Consensus state as an observable

use std::sync::Arc;

use nimbus_status::consensus_state::ConsensusState;

use crate::client::gate::ConsensusGate;
use crate::client::ListenerHandle;
use crate::error::SyncError;
use crate::observable::Observable;

/// Mirrors the client's consensus state. Starts as [`ConsensusState::Loading`].
#[derive(Clone, Debug)]
pub struct Consensus {
    consensus: Observable<ConsensusState>,
    established: Observable<bool>,
}

impl Consensus {
    #[allow(missing_docs)]
    pub fn new() -> Self {
        let consensus = Observable::new(ConsensusState::Loading);
        let established = consensus.map(|state| state.is_established());
        Self {
            consensus,
            established,
        }
    }

    /// Current consensus state.
    pub fn consensus(&self) -> Observable<ConsensusState> {
        self.consensus.clone()
    }

    /// True while consensus is established.
    pub fn established(&self) -> Observable<bool> {
        self.established.clone()
    }

    /// Copies the client's state once initialized, then follows its changes.
    pub async fn bind(&self, gate: &ConsensusGate) -> Result<ListenerHandle, SyncError> {
        let client = gate.initialized().await?;
        self.consensus.set_if_changed(client.consensus_state());

        let consensus = self.consensus.clone();
        let handle = client
            .add_consensus_changed_listener(Arc::new(move |state| {
                tracing::info!("Consensus {}.", state);
                consensus.set_if_changed(state);
            }))
            .await?;

        Ok(handle)
    }
}

impl Default for Consensus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockClient;

    #[tokio::test]
    async fn follows_client_state() {
        let mock = Arc::new(MockClient::with_consensus(ConsensusState::Connecting));
        let consensus = Consensus::new();
        assert_eq!(consensus.consensus().get(), ConsensusState::Loading);

        consensus.bind(&ConsensusGate::new(mock.clone())).await.unwrap();
        assert_eq!(consensus.consensus().get(), ConsensusState::Connecting);
        assert!(!consensus.established().get());

        mock.set_consensus(ConsensusState::Established);
        assert_eq!(consensus.consensus().get().to_string(), "established");
        assert!(consensus.established().get());
    }
}
