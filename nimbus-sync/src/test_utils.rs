//! Scriptable in-memory [`LedgerClient`] for tests

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use nimbus_status::consensus_state::ConsensusState;
use nimbus_status::transaction_state::TransactionState;

use crate::address::{Address, ADDRESS_SIZE};
use crate::client::{
    ClientError, ConsensusListener, HeadListener, LedgerClient, ListenerHandle,
    TransactionListener,
};
use crate::primitives::{Account, Block, Hash, NetworkStatistics, TransactionDetails, HASH_SIZE};

/// Address made of one repeated byte
pub fn address(byte: u8) -> Address {
    Address::from_bytes([byte; ADDRESS_SIZE])
}

/// Hash made of one repeated byte
pub fn hash(byte: u8) -> Hash {
    Hash::from_bytes([byte; HASH_SIZE])
}

/// Transaction with hash, sender and recipient made of repeated bytes
pub fn transaction(
    hash_byte: u8,
    sender: u8,
    recipient: u8,
    timestamp: Option<u64>,
) -> TransactionDetails {
    TransactionDetails {
        transaction_hash: hash(hash_byte),
        sender: address(sender),
        recipient: address(recipient),
        timestamp,
        value: 1000,
        fee: 0,
        state: if timestamp.is_some() {
            TransactionState::Mined
        } else {
            TransactionState::Pending
        },
        block_hash: None,
        block_height: None,
        confirmations: 0,
        data: Vec::new(),
        flags: 0,
        validity_start_height: 1,
    }
}

/// Calls recorded by [`MockClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Init,
    GetHeadHash,
    GetBlock(Hash),
    GetNetworkStatistics,
    GetAccounts(Vec<Address>),
    /// address and number of known transactions passed along
    GetTransactions(Address, usize),
    AddConsensusListener,
    AddHeadListener,
    AddTransactionListener(Vec<Address>),
    RemoveListener(ListenerHandle),
}

#[derive(Default)]
struct MockState {
    calls: Vec<MockCall>,
    accounts: HashMap<Address, Account>,
    histories: HashMap<Address, Vec<TransactionDetails>>,
    blocks: HashMap<Hash, Block>,
    head_hash: Option<Hash>,
    statistics: NetworkStatistics,
    fail_init: bool,
    fail_requests: bool,
    fail_subscriptions: bool,
    failing_histories: HashSet<Address>,
    next_handle: u64,
    consensus_listeners: Vec<(ListenerHandle, ConsensusListener)>,
    head_listeners: Vec<(ListenerHandle, HeadListener)>,
    transaction_listeners: HashMap<ListenerHandle, (Vec<Address>, TransactionListener)>,
}

/// In-memory ledger client.
///
/// Reads answer from scripted state, every call is recorded, and [`MockClient::pause`] holds
/// reads until [`MockClient::resume`].
pub struct MockClient {
    state: Mutex<MockState>,
    consensus: watch::Sender<ConsensusState>,
    paused: watch::Sender<bool>,
}

impl MockClient {
    /// Client with consensus already established
    pub fn new() -> Self {
        Self::with_consensus(ConsensusState::Established)
    }

    pub fn with_consensus(consensus: ConsensusState) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            consensus: watch::channel(consensus).0,
            paused: watch::channel(false).0,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: MockCall) {
        self.state().calls.push(call);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn set_consensus(&self, consensus: ConsensusState) {
        self.consensus.send_replace(consensus);
        let listeners = self.state().consensus_listeners.clone();
        for (_, listener) in listeners {
            listener(consensus);
        }
    }

    pub fn set_account(&self, account: Account) {
        self.state().accounts.insert(account.address, account);
    }

    pub fn set_history(&self, address: Address, transactions: Vec<TransactionDetails>) {
        self.state().histories.insert(address, transactions);
    }

    pub fn add_block(&self, block: Block) {
        self.state().blocks.insert(block.hash(), block);
    }

    pub fn set_statistics(&self, statistics: NetworkStatistics) {
        self.state().statistics = statistics;
    }

    /// Moves the head and notifies head listeners
    pub fn set_head(&self, block: Block) {
        let listeners = {
            let mut state = self.state();
            state.blocks.insert(block.hash(), block.clone());
            state.head_hash = Some(block.hash());
            state.head_listeners.clone()
        };
        for (_, listener) in listeners {
            listener(block.hash());
        }
    }

    pub fn fail_init(&self, fail: bool) {
        self.state().fail_init = fail;
    }

    pub fn fail_requests(&self, fail: bool) {
        self.state().fail_requests = fail;
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.state().fail_subscriptions = fail;
    }

    pub fn fail_history_of(&self, address: Address) {
        self.state().failing_histories.insert(address);
    }

    /// Holds every read until [`MockClient::resume`]
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn transaction_listener_count(&self) -> usize {
        self.state().transaction_listeners.len()
    }

    /// Delivers `tx` to every transaction listener covering its sender or recipient
    pub fn push_transaction(&self, tx: TransactionDetails) {
        let listeners: Vec<TransactionListener> = self
            .state()
            .transaction_listeners
            .values()
            .filter(|(addresses, _)| addresses.iter().any(|address| tx.involves(address)))
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(tx.clone());
        }
    }

    async fn unpaused(&self) {
        let mut paused = self.paused.subscribe();
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                return;
            }
        }
    }

    fn check_requests(&self) -> Result<(), ClientError> {
        if self.state().fail_requests {
            return Err(ClientError::Request("scripted failure".to_string()));
        }
        Ok(())
    }

    fn check_subscriptions(&self) -> Result<(), ClientError> {
        if self.state().fail_subscriptions {
            return Err(ClientError::Subscription("scripted failure".to_string()));
        }
        Ok(())
    }

    fn next_handle(&self) -> ListenerHandle {
        let mut state = self.state();
        let handle = ListenerHandle(state.next_handle);
        state.next_handle += 1;
        handle
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LedgerClient for MockClient {
    async fn init(&self) -> Result<(), ClientError> {
        self.record(MockCall::Init);
        if self.state().fail_init {
            return Err(ClientError::Initialization("scripted failure".to_string()));
        }
        Ok(())
    }

    fn consensus_state(&self) -> ConsensusState {
        *self.consensus.borrow()
    }

    async fn wait_for_consensus_established(&self) -> Result<(), ClientError> {
        let mut consensus = self.consensus.subscribe();
        while !consensus.borrow_and_update().is_established() {
            consensus
                .changed()
                .await
                .map_err(|_| ClientError::Disconnected)?;
        }
        Ok(())
    }

    async fn add_consensus_changed_listener(
        &self,
        listener: ConsensusListener,
    ) -> Result<ListenerHandle, ClientError> {
        self.record(MockCall::AddConsensusListener);
        self.check_subscriptions()?;
        let handle = self.next_handle();
        self.state().consensus_listeners.push((handle, listener));
        Ok(handle)
    }

    async fn get_head_hash(&self) -> Result<Hash, ClientError> {
        self.record(MockCall::GetHeadHash);
        self.unpaused().await;
        self.check_requests()?;
        self.state()
            .head_hash
            .ok_or_else(|| ClientError::Request("no head".to_string()))
    }

    async fn get_block(&self, hash: Hash) -> Result<Block, ClientError> {
        self.record(MockCall::GetBlock(hash));
        self.unpaused().await;
        self.check_requests()?;
        self.state()
            .blocks
            .get(&hash)
            .cloned()
            .ok_or_else(|| ClientError::Request(format!("unknown block {hash}")))
    }

    async fn add_head_changed_listener(
        &self,
        listener: HeadListener,
    ) -> Result<ListenerHandle, ClientError> {
        self.record(MockCall::AddHeadListener);
        self.check_subscriptions()?;
        let handle = self.next_handle();
        self.state().head_listeners.push((handle, listener));
        Ok(handle)
    }

    async fn get_network_statistics(&self) -> Result<NetworkStatistics, ClientError> {
        self.record(MockCall::GetNetworkStatistics);
        self.unpaused().await;
        self.check_requests()?;
        Ok(self.state().statistics.clone())
    }

    async fn get_accounts(&self, addresses: &[Address]) -> Result<Vec<Account>, ClientError> {
        self.record(MockCall::GetAccounts(addresses.to_vec()));
        self.unpaused().await;
        self.check_requests()?;
        let state = self.state();
        Ok(addresses
            .iter()
            .map(|address| {
                state
                    .accounts
                    .get(address)
                    .cloned()
                    .unwrap_or_else(|| Account::new(*address))
            })
            .collect())
    }

    async fn get_transactions_by_address(
        &self,
        address: Address,
        _since_block_height: u32,
        known: &[TransactionDetails],
    ) -> Result<Vec<TransactionDetails>, ClientError> {
        self.record(MockCall::GetTransactions(address, known.len()));
        self.unpaused().await;
        self.check_requests()?;
        let state = self.state();
        if state.failing_histories.contains(&address) {
            return Err(ClientError::Request(format!("history of {address}")));
        }
        Ok(state.histories.get(&address).cloned().unwrap_or_default())
    }

    async fn add_transaction_listener(
        &self,
        addresses: &[Address],
        listener: TransactionListener,
    ) -> Result<ListenerHandle, ClientError> {
        self.record(MockCall::AddTransactionListener(addresses.to_vec()));
        self.check_subscriptions()?;
        let handle = self.next_handle();
        self.state()
            .transaction_listeners
            .insert(handle, (addresses.to_vec(), listener));
        Ok(handle)
    }

    async fn remove_listener(&self, handle: ListenerHandle) -> Result<(), ClientError> {
        self.record(MockCall::RemoveListener(handle));
        self.check_subscriptions()?;
        let mut state = self.state();
        state.transaction_listeners.remove(&handle);
        state.consensus_listeners.retain(|(listener, _)| *listener != handle);
        state.head_listeners.retain(|(listener, _)| *listener != handle);
        Ok(())
    }
}
