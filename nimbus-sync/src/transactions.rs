//! Transaction cache and the push subscription for tracked addresses

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{self, join_all, FutureExt};
use indexmap::{IndexMap, IndexSet};

use crate::address::{parse_addresses, Address, AddressLike};
use crate::client::gate::ConsensusGate;
use crate::client::{ListenerHandle, TransactionListener};
use crate::error::SyncError;
use crate::observable::Observable;
use crate::primitives::{Account, Hash, TransactionDetails};
use crate::refresh::{Refresh, RefreshCounter};

/// Display order of transactions: pending first, then newest first.
///
/// Transactions with equal timestamps, including two pending ones, compare equal so a stable sort
/// keeps their previous order.
pub fn compare_transactions(a: &TransactionDetails, b: &TransactionDetails) -> Ordering {
    match (a.confirmed_timestamp(), b.confirmed_timestamp()) {
        (a_timestamp, b_timestamp) if a_timestamp == b_timestamp => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a_timestamp), Some(b_timestamp)) => b_timestamp.cmp(&a_timestamp),
        (None, None) => Ordering::Equal,
    }
}

// the listener currently installed at the client, the addresses it covers and the generation of
// the newest account list applied
#[derive(Default)]
struct ListenerBinding {
    handle: Option<ListenerHandle>,
    addresses: IndexSet<Address>,
    generation: u64,
}

struct TransactionsInner {
    gate: ConsensusGate,
    transactions_map: RwLock<IndexMap<Hash, TransactionDetails>>,
    transactions: Observable<Vec<TransactionDetails>>,
    new_transaction: Observable<Option<TransactionDetails>>,
    tracked_addresses: RwLock<IndexSet<Address>>,
    refresh_counter: RefreshCounter,
    binding: tokio::sync::Mutex<ListenerBinding>,
    rebind_generation: AtomicU64,
}

/// Hash-keyed transaction cache for the tracked addresses.
///
/// Records are merged last-write-wins and the observed sequence is kept sorted by
/// [`compare_transactions`]. Clones share the same cache.
#[derive(Clone)]
pub struct Transactions {
    inner: Arc<TransactionsInner>,
}

impl Transactions {
    /// Empty cache reading through `gate`.
    pub fn new(gate: ConsensusGate) -> Self {
        Self {
            inner: Arc::new(TransactionsInner {
                gate,
                transactions_map: RwLock::new(IndexMap::new()),
                transactions: Observable::new(Vec::new()),
                new_transaction: Observable::new(None),
                tracked_addresses: RwLock::new(IndexSet::new()),
                refresh_counter: RefreshCounter::new(),
                binding: tokio::sync::Mutex::new(ListenerBinding::default()),
                rebind_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Observed transaction sequence, sorted.
    pub fn transactions(&self) -> Observable<Vec<TransactionDetails>> {
        self.inner.transactions.clone()
    }

    /// Most recently pushed transaction.
    pub fn new_transaction(&self) -> Observable<Option<TransactionDetails>> {
        self.inner.new_transaction.clone()
    }

    /// True while at least one transaction refresh is in flight.
    pub fn refreshing(&self) -> Observable<bool> {
        self.inner.refresh_counter.refreshing()
    }

    /// Addresses with an initial history fetch issued, in the order they were first tracked.
    pub fn tracked_addresses(&self) -> Vec<Address> {
        self.inner
            .tracked_addresses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    /// Cached records sent from or to `address`.
    pub fn transactions_for_address(&self, address: &Address) -> Vec<TransactionDetails> {
        self.inner
            .transactions_map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|tx| tx.involves(address))
            .cloned()
            .collect()
    }

    /// Merges records by hash, the later record replacing the earlier one whole, then republishes
    /// the sorted sequence.
    pub fn add_transactions<I>(&self, transactions: I)
    where
        I: IntoIterator<Item = TransactionDetails>,
    {
        let transactions: Vec<TransactionDetails> = transactions.into_iter().collect();
        if transactions.is_empty() {
            return;
        }
        tracing::debug!("Adding {} transactions.", transactions.len());

        {
            let mut map = self
                .inner
                .transactions_map
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for tx in transactions {
                map.insert(tx.transaction_hash, tx);
            }
            map.sort_by(|_, a, _, b| compare_transactions(a, b));
            // staged under the lock so snapshots land in merge order
            self.inner
                .transactions
                .stage(map.values().cloned().collect());
        }
        self.inner.transactions.publish();
    }

    /// Fetches the history of the given addresses, or of every tracked address if none are given.
    ///
    /// One refresh covers the whole batch: it is counted as soon as this returns and stops being
    /// counted once every per-address fetch has settled. The first fetch error is returned after
    /// all fetches are done.
    pub fn refresh<I>(&self, input: I) -> Refresh
    where
        I: IntoIterator,
        I::Item: Into<AddressLike>,
    {
        let addresses = match parse_addresses(input) {
            Ok(addresses) if addresses.is_empty() => self.tracked_addresses(),
            Ok(addresses) => addresses,
            Err(e) => return future::ready(Err(e.into())).boxed(),
        };
        if addresses.is_empty() {
            return future::ready(Ok(())).boxed();
        }

        tracing::debug!(
            "Refreshing transactions {:?}",
            addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>()
        );
        let guard = self.inner.refresh_counter.start();
        let transactions = self.clone();

        async move {
            let _guard = guard;
            let client = transactions.inner.gate.established().await?;

            let fetches = addresses.iter().map(|address| {
                let transactions = &transactions;
                async move {
                    let known = transactions.transactions_for_address(address);
                    let fetched = client
                        .get_transactions_by_address(*address, 0, &known)
                        .await?;
                    transactions.add_transactions(fetched);
                    Ok::<(), SyncError>(())
                }
            });

            join_all(fetches).await.into_iter().collect()
        }
        .boxed()
    }

    /// Follows a change of the account list.
    ///
    /// Addresses seen for the first time are added to the tracked set and get a history refresh,
    /// counted before this returns. The push subscription is swapped to cover exactly the given
    /// addresses if that set differs from the one currently subscribed. A failed swap leaves the
    /// tracked set as it is and is retried on the next call. Swaps apply in call order: once a
    /// later call has swapped, an earlier one still pending does nothing.
    pub fn on_tracked_addresses_changed(&self, accounts: &[Account]) -> Refresh {
        let addresses: IndexSet<Address> = accounts.iter().map(|account| account.address).collect();

        let new_addresses: Vec<Address> = {
            let mut tracked = self
                .inner
                .tracked_addresses
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            addresses
                .iter()
                .filter(|address| tracked.insert(**address))
                .copied()
                .collect()
        };

        let history = if new_addresses.is_empty() {
            future::ready(Ok(())).boxed()
        } else {
            self.refresh(new_addresses)
        };
        let generation = self
            .inner
            .rebind_generation
            .fetch_add(1, AtomicOrdering::SeqCst)
            + 1;
        let rebind = self.clone().rebind_listener(addresses, generation);

        async move {
            let (rebound, refreshed) = futures::join!(rebind, history);
            rebound.and(refreshed)
        }
        .boxed()
    }

    // the old listener is removed before the new one is installed, so pushes are never delivered
    // twice
    async fn rebind_listener(
        self,
        addresses: IndexSet<Address>,
        generation: u64,
    ) -> Result<(), SyncError> {
        let mut binding = self.inner.binding.lock().await;
        if generation < binding.generation {
            tracing::debug!("Skipping rebind for an outdated account list.");
            return Ok(());
        }
        binding.generation = generation;
        if binding.addresses == addresses && (binding.handle.is_some() || addresses.is_empty()) {
            return Ok(());
        }

        let client = self.inner.gate.initialized().await?;
        if let Some(old_handle) = binding.handle.take() {
            if let Err(e) = client.remove_listener(old_handle).await {
                binding.handle = Some(old_handle);
                return Err(e.into());
            }
        }
        binding.addresses.clear();
        if addresses.is_empty() {
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let listener: TransactionListener = Arc::new(move |tx| {
            if let Some(inner) = weak.upgrade() {
                Transactions { inner }.on_pushed_transaction(tx);
            }
        });
        let address_list: Vec<Address> = addresses.iter().copied().collect();
        let handle = client
            .add_transaction_listener(&address_list, listener)
            .await?;

        tracing::info!(
            "Listening for transactions of {} addresses.",
            address_list.len()
        );
        binding.handle = Some(handle);
        binding.addresses = addresses;
        Ok(())
    }

    fn on_pushed_transaction(&self, tx: TransactionDetails) {
        self.inner.new_transaction.set(Some(tx.clone()));
        self.add_transactions([tx]);
    }
}
