//! Module for handling all communication with the remote ledger client

use std::sync::Arc;

use nimbus_status::consensus_state::ConsensusState;

use crate::address::Address;
use crate::primitives::{Account, Block, Hash, NetworkStatistics, TransactionDetails};

pub mod gate;

/// Callback for consensus state changes
pub type ConsensusListener = Arc<dyn Fn(ConsensusState) + Send + Sync>;
/// Callback for head hash changes
pub type HeadListener = Arc<dyn Fn(Hash) + Send + Sync>;
/// Callback for pushed transactions
pub type TransactionListener = Arc<dyn Fn(TransactionDetails) + Send + Sync>;

/// Handle returned by the client when a listener is registered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u64);

/// Errors reported by a [`LedgerClient`] implementation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The client could not be initialized
    #[error("client initialization failed. {0}")]
    Initialization(String),
    /// A read request failed
    #[error("request failed. {0}")]
    Request(String),
    /// Registering or removing a listener failed
    #[error("subscription failed. {0}")]
    Subscription(String),
    /// The client shut down
    #[error("client disconnected")]
    Disconnected,
}

/// Interface the stores need from the remote ledger client.
///
/// Every read may suspend. The stores never issue a read before [`LedgerClient::init`]
/// has completed and consensus has been established, see [`gate::ConsensusGate`].
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// One-time initialization. Called exactly once per process by the gate.
    async fn init(&self) -> Result<(), ClientError>;

    /// Current consensus state, without waiting.
    fn consensus_state(&self) -> ConsensusState;

    /// Resolves once consensus is established. Resolves immediately if it already is.
    async fn wait_for_consensus_established(&self) -> Result<(), ClientError>;

    /// Registers a listener for consensus state changes.
    async fn add_consensus_changed_listener(
        &self,
        listener: ConsensusListener,
    ) -> Result<ListenerHandle, ClientError>;

    /// Hash of the current chain head.
    async fn get_head_hash(&self) -> Result<Hash, ClientError>;

    /// Block by hash.
    async fn get_block(&self, hash: Hash) -> Result<Block, ClientError>;

    /// Registers a listener for head changes.
    async fn add_head_changed_listener(
        &self,
        listener: HeadListener,
    ) -> Result<ListenerHandle, ClientError>;

    /// Network statistics, passed through unchanged.
    async fn get_network_statistics(&self) -> Result<NetworkStatistics, ClientError>;

    /// Account state for each address, in input order.
    async fn get_accounts(&self, addresses: &[Address]) -> Result<Vec<Account>, ClientError>;

    /// Transaction history of one address. `known` lists records the caller already has so the
    /// client may skip them.
    async fn get_transactions_by_address(
        &self,
        address: Address,
        since_block_height: u32,
        known: &[TransactionDetails],
    ) -> Result<Vec<TransactionDetails>, ClientError>;

    /// Registers a listener for transactions involving any of `addresses`.
    async fn add_transaction_listener(
        &self,
        addresses: &[Address],
        listener: TransactionListener,
    ) -> Result<ListenerHandle, ClientError>;

    /// Removes any listener previously registered.
    async fn remove_listener(&self, handle: ListenerHandle) -> Result<(), ClientError>;
}
