//! Consensus gate in front of every remote read

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::client::{ClientError, LedgerClient};
use crate::observable::Observable;

/// Owns the client handle and its one-time initialization.
///
/// Reads go through [`ConsensusGate::established`], subscriptions through
/// [`ConsensusGate::initialized`]. Clones share the client and the init state.
#[derive(Clone)]
pub struct ConsensusGate {
    client: Arc<dyn LedgerClient>,
    initialized: Arc<OnceCell<()>>,
    ready: Observable<bool>,
}

impl ConsensusGate {
    /// Wraps a client that has not been initialized yet.
    pub fn new(client: Arc<dyn LedgerClient>) -> Self {
        Self {
            client,
            initialized: Arc::new(OnceCell::new()),
            ready: Observable::new(false),
        }
    }

    /// True once the client has been initialized.
    pub fn ready(&self) -> Observable<bool> {
        self.ready.clone()
    }

    /// Initializes the client on first use and returns it.
    ///
    /// Concurrent callers share one initialization. A failed initialization is retried by the
    /// next caller.
    pub async fn initialized(&self) -> Result<&Arc<dyn LedgerClient>, ClientError> {
        self.initialized
            .get_or_try_init(|| async {
                self.client.init().await?;
                tracing::info!("Ledger client initialized.");
                self.ready.set(true);
                Ok::<(), ClientError>(())
            })
            .await?;

        Ok(&self.client)
    }

    /// Initializes the client, then waits for consensus. Checked fresh on every call.
    pub async fn established(&self) -> Result<&Arc<dyn LedgerClient>, ClientError> {
        let client = self.initialized().await?;
        if !client.consensus_state().is_established() {
            tracing::debug!("Waiting for consensus.");
            client.wait_for_consensus_established().await?;
        }

        Ok(client)
    }
}
