//! Chain head as observables

use std::sync::Arc;

use crate::client::gate::ConsensusGate;
use crate::client::ListenerHandle;
use crate::error::SyncError;
use crate::observable::Observable;
use crate::primitives::{Block, Hash};

/// Current head hash, head block and height.
///
/// The block is fetched whenever the head hash changes. A fetch that finishes after the head has
/// moved on is discarded.
#[derive(Clone, Debug)]
pub struct Blockchain {
    head_hash: Observable<Option<Hash>>,
    head: Observable<Option<Block>>,
    height: Observable<u32>,
}

impl Blockchain {
    /// Must be constructed within a tokio runtime if the head hash may change.
    pub fn new(gate: ConsensusGate) -> Self {
        let head_hash: Observable<Option<Hash>> = Observable::new(None);
        let head: Observable<Option<Block>> = Observable::new(None);
        let height = head.map(|head| head.as_ref().map_or(0, |block| block.height()));

        let current_hash = head_hash.clone();
        let target = head.clone();
        head_hash.subscribe(move |hash| {
            let Some(hash) = *hash else {
                return;
            };
            let gate = gate.clone();
            let current_hash = current_hash.clone();
            let target = target.clone();
            tokio::spawn(async move {
                let block = match gate.initialized().await {
                    Ok(client) => client.get_block(hash).await,
                    Err(e) => Err(e),
                };
                match block {
                    Ok(block) if current_hash.get() == Some(hash) => target.set(Some(block)),
                    Ok(_) => tracing::debug!("Discarding stale head block {}.", hash),
                    Err(e) => tracing::warn!("Fetching head block {} failed. {}", hash, e),
                }
            });
        });

        Self {
            head_hash,
            head,
            height,
        }
    }

    #[allow(missing_docs)]
    pub fn head_hash(&self) -> Observable<Option<Hash>> {
        self.head_hash.clone()
    }

    #[allow(missing_docs)]
    pub fn head(&self) -> Observable<Option<Block>> {
        self.head.clone()
    }

    /// Height of the head block, 0 before the first block is known.
    pub fn height(&self) -> Observable<u32> {
        self.height.clone()
    }

    /// Reads the head once if consensus is already established, then follows head changes.
    pub async fn bind(&self, gate: &ConsensusGate) -> Result<ListenerHandle, SyncError> {
        let client = gate.initialized().await?;
        if client.consensus_state().is_established() {
            self.head_hash.set_if_changed(Some(client.get_head_hash().await?));
        }

        let head_hash = self.head_hash.clone();
        let handle = client
            .add_head_changed_listener(Arc::new(move |hash| {
                head_hash.set_if_changed(Some(hash));
            }))
            .await?;

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{hash, MockCall, MockClient};
    use nimbus_status::consensus_state::ConsensusState;

    async fn wait_for_height(blockchain: &Blockchain, height: u32) {
        let mut heights = blockchain.height().watch();
        while *heights.borrow_and_update() != height {
            heights.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn follows_the_head() {
        let mock = Arc::new(MockClient::new());
        mock.set_head(Block::from_parts(hash(1), hash(0), 10, 1_000));
        let gate = ConsensusGate::new(mock.clone());
        let blockchain = Blockchain::new(gate.clone());
        assert_eq!(blockchain.height().get(), 0);

        blockchain.bind(&gate).await.unwrap();
        assert_eq!(blockchain.head_hash().get(), Some(hash(1)));
        wait_for_height(&blockchain, 10).await;

        mock.set_head(Block::from_parts(hash(2), hash(1), 11, 1_060));
        wait_for_height(&blockchain, 11).await;
        assert_eq!(blockchain.head().get().unwrap().hash(), hash(2));
    }

    #[tokio::test]
    async fn skips_head_read_without_consensus() {
        let mock = Arc::new(MockClient::with_consensus(ConsensusState::Syncing));
        let gate = ConsensusGate::new(mock.clone());
        let blockchain = Blockchain::new(gate.clone());

        blockchain.bind(&gate).await.unwrap();
        assert_eq!(blockchain.head_hash().get(), None);
        assert!(!mock.calls().contains(&MockCall::GetHeadHash));
        assert!(mock.calls().contains(&MockCall::AddHeadListener));
    }
}
