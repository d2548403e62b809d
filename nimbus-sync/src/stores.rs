//! All stores wired to one ledger client

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use nimbusconfig::NimbusConfig;

use crate::accounts::Accounts;
use crate::blockchain::Blockchain;
use crate::client::gate::ConsensusGate;
use crate::client::{LedgerClient, ListenerHandle};
use crate::consensus::Consensus;
use crate::error::SyncError;
use crate::network::Network;
use crate::observable::Observable;
use crate::refresh::spawn_refresh;
use crate::transactions::Transactions;

/// The account, transaction, consensus, blockchain and network stores sharing one client.
///
/// Changes of the account list drive transaction tracking. If configured, every head change
/// refreshes the cached accounts. Construct within a tokio runtime.
pub struct NimbusStores {
    gate: ConsensusGate,
    accounts: Accounts,
    transactions: Transactions,
    consensus: Consensus,
    blockchain: Blockchain,
    network: Network,
    network_stats_interval: Duration,
    consensus_listener: OnceCell<ListenerHandle>,
    head_listener: OnceCell<ListenerHandle>,
    polling: Mutex<Option<JoinHandle<()>>>,
}

impl NimbusStores {
    /// Builds and wires the stores. Nothing touches the client until [`NimbusStores::start`] or
    /// the first account is added.
    pub fn new(client: Arc<dyn LedgerClient>, config: &NimbusConfig) -> Self {
        let gate = ConsensusGate::new(client);
        let accounts = Accounts::new(gate.clone());
        let transactions = Transactions::new(gate.clone());
        let blockchain = Blockchain::new(gate.clone());

        let tracker = transactions.clone();
        accounts.accounts().subscribe(move |accounts| {
            spawn_refresh("transactions", tracker.on_tracked_addresses_changed(accounts));
        });
        if config.refresh_accounts_on_head_change {
            accounts.refresh_on(&blockchain.head_hash());
        }

        Self {
            gate,
            accounts,
            transactions,
            consensus: Consensus::new(),
            blockchain,
            network: Network::new(),
            network_stats_interval: config.network_stats_interval,
            consensus_listener: OnceCell::new(),
            head_listener: OnceCell::new(),
            polling: Mutex::new(None),
        }
    }

    /// Initializes the client, binds consensus and head tracking, and starts network polling.
    ///
    /// Each listener is registered once for the lifetime of the stores. Calling it again only
    /// retries a bind that failed.
    pub async fn start(&self) -> Result<(), SyncError> {
        self.consensus_listener
            .get_or_try_init(|| self.consensus.bind(&self.gate))
            .await?;
        self.head_listener
            .get_or_try_init(|| self.blockchain.bind(&self.gate))
            .await?;

        let mut polling = self.polling.lock().unwrap_or_else(PoisonError::into_inner);
        if polling.is_none() {
            *polling = Some(
                self.network
                    .start_polling(self.gate.clone(), self.network_stats_interval),
            );
            tracing::info!("Stores started.");
        }
        Ok(())
    }

    /// True once the client has been initialized.
    pub fn ready(&self) -> Observable<bool> {
        self.gate.ready()
    }

    #[allow(missing_docs)]
    pub fn accounts(&self) -> &Accounts {
        &self.accounts
    }

    #[allow(missing_docs)]
    pub fn transactions(&self) -> &Transactions {
        &self.transactions
    }

    #[allow(missing_docs)]
    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    #[allow(missing_docs)]
    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    #[allow(missing_docs)]
    pub fn network(&self) -> &Network {
        &self.network
    }
}

impl Drop for NimbusStores {
    fn drop(&mut self) {
        if let Some(polling) = self
            .polling
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            polling.abort();
        }

        let handles: Vec<ListenerHandle> = [
            self.consensus_listener.take(),
            self.head_listener.take(),
        ]
        .into_iter()
        .flatten()
        .collect();
        if handles.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime to remove {} client listeners on.", handles.len());
            return;
        };
        let gate = self.gate.clone();
        runtime.spawn(async move {
            let client = match gate.initialized().await {
                Ok(client) => client,
                Err(e) => {
                    tracing::warn!("Client listeners not removed. {}", e);
                    return;
                }
            };
            for handle in handles {
                if let Err(e) = client.remove_listener(handle).await {
                    tracing::warn!("Removing client listener {:?} failed. {}", handle, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Account, Block, KnownAddressCounts, NetworkStatistics, PeerCounts};
    use crate::test_utils::{address, hash, transaction, MockCall, MockClient};
    use nimbus_status::consensus_state::ConsensusState;
    use nimbusconfig::ChainType;

    fn config(refresh_accounts_on_head_change: bool) -> NimbusConfig {
        NimbusConfig {
            network_stats_interval: Duration::from_millis(10),
            refresh_accounts_on_head_change,
            ..NimbusConfig::create(ChainType::Devnet, None)
        }
    }

    async fn wait_until<T: Clone + Send + Sync + 'static>(
        observable: Observable<T>,
        done: impl Fn(&T) -> bool,
    ) {
        let mut values = observable.watch();
        while !done(&values.borrow_and_update()) {
            values.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn added_accounts_are_tracked() {
        let mock = Arc::new(MockClient::new());
        mock.set_history(
            address(1),
            vec![transaction(1, 1, 2, Some(100)), transaction(2, 3, 1, None)],
        );
        let stores = NimbusStores::new(mock.clone(), &config(false));

        stores.accounts().add([address(1)]).unwrap();
        wait_until(stores.transactions().transactions(), |transactions| {
            transactions.len() == 2
        })
        .await;

        let hashes: Vec<_> = stores
            .transactions()
            .transactions()
            .get()
            .iter()
            .map(|tx| tx.transaction_hash)
            .collect();
        assert_eq!(hashes, vec![hash(2), hash(1)]);
        assert_eq!(stores.transactions().tracked_addresses(), vec![address(1)]);
        assert!(stores.ready().get());

        while mock.transaction_listener_count() == 0 {
            tokio::task::yield_now().await;
        }
        mock.push_transaction(transaction(3, 4, 1, None));
        let pushed = stores.transactions().new_transaction().get().unwrap();
        assert_eq!(pushed.transaction_hash, hash(3));
        assert_eq!(stores.transactions().transactions().get().len(), 3);
    }

    #[tokio::test]
    async fn head_change_refreshes_accounts() {
        let mock = Arc::new(MockClient::new());
        mock.set_head(Block::from_parts(hash(10), hash(9), 1, 1_000));
        let stores = NimbusStores::new(mock.clone(), &config(true));
        stores.start().await.unwrap();

        stores
            .accounts()
            .add([address(1)])
            .unwrap()
            .unwrap()
            .await
            .unwrap()
            .unwrap();
        mock.set_account(Account {
            balance: Some(42),
            ..Account::new(address(1))
        });

        mock.set_head(Block::from_parts(hash(11), hash(10), 2, 1_060));
        wait_until(stores.accounts().accounts(), |accounts| {
            accounts.first().and_then(|account| account.balance) == Some(42)
        })
        .await;
        wait_until(stores.blockchain().height(), |height| *height == 2).await;
    }

    #[tokio::test]
    async fn head_change_is_ignored_when_disabled() {
        let mock = Arc::new(MockClient::new());
        mock.set_head(Block::from_parts(hash(10), hash(9), 1, 1_000));
        let stores = NimbusStores::new(mock.clone(), &config(false));
        stores.start().await.unwrap();
        stores
            .accounts()
            .add([address(1)])
            .unwrap()
            .unwrap()
            .await
            .unwrap()
            .unwrap();

        mock.set_head(Block::from_parts(hash(11), hash(10), 2, 1_060));
        wait_until(stores.blockchain().height(), |height| *height == 2).await;

        let account_fetches = mock
            .calls()
            .into_iter()
            .filter(|call| matches!(call, MockCall::GetAccounts(_)))
            .count();
        assert_eq!(account_fetches, 1);
    }

    #[tokio::test]
    async fn start_binds_consensus_and_network() {
        let mock = Arc::new(MockClient::with_consensus(ConsensusState::Syncing));
        mock.set_statistics(NetworkStatistics::from_parts(
            0,
            0,
            PeerCounts {
                total: 3,
                ..Default::default()
            },
            KnownAddressCounts::default(),
            0,
        ));
        let stores = NimbusStores::new(mock.clone(), &config(true));
        assert!(!stores.ready().get());

        stores.start().await.unwrap();
        assert!(stores.ready().get());
        assert_eq!(stores.consensus().consensus().get(), ConsensusState::Syncing);

        mock.set_consensus(ConsensusState::Established);
        assert!(stores.consensus().established().get());
        wait_until(stores.network().peer_count(), |count| *count == 3).await;
    }

    #[tokio::test]
    async fn start_twice_binds_once() {
        let mock = Arc::new(MockClient::new());
        mock.set_head(Block::from_parts(hash(10), hash(9), 1, 1_000));
        let stores = NimbusStores::new(mock.clone(), &config(true));

        stores.start().await.unwrap();
        stores.start().await.unwrap();

        let count = |expected: MockCall| {
            mock.calls()
                .into_iter()
                .filter(|call| *call == expected)
                .count()
        };
        assert_eq!(count(MockCall::AddConsensusListener), 1);
        assert_eq!(count(MockCall::AddHeadListener), 1);
    }

    #[tokio::test]
    async fn dropping_removes_client_listeners() {
        let mock = Arc::new(MockClient::new());
        mock.set_head(Block::from_parts(hash(10), hash(9), 1, 1_000));
        let stores = NimbusStores::new(mock.clone(), &config(true));
        stores.start().await.unwrap();

        drop(stores);
        let removed = || {
            mock.calls()
                .into_iter()
                .filter(|call| matches!(call, MockCall::RemoveListener(_)))
                .count()
        };
        while removed() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            mock.calls()
                .into_iter()
                .filter(|call| matches!(call, MockCall::RemoveListener(_)))
                .collect::<Vec<_>>(),
            vec![
                MockCall::RemoveListener(ListenerHandle(0)),
                MockCall::RemoveListener(ListenerHandle(1)),
            ]
        );
    }

    #[tokio::test]
    async fn start_fails_when_init_fails() {
        let mock = Arc::new(MockClient::new());
        mock.fail_init(true);
        let stores = NimbusStores::new(mock.clone(), &config(true));

        assert!(stores.start().await.is_err());
        assert!(!stores.ready().get());
    }
}
