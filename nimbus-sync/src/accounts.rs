//! Account cache: latest known attributes per address

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::{self, FutureExt};
use indexmap::IndexMap;

use crate::address::{parse_address_likes, parse_addresses, Address, AddressError, AddressLike};
use crate::client::gate::ConsensusGate;
use crate::error::SyncError;
use crate::observable::{Observable, SubscriptionId};
use crate::primitives::Account;
use crate::refresh::{spawn_refresh, Refresh, RefreshCounter, RefreshHandle};

struct AccountsInner {
    gate: ConsensusGate,
    accounts_map: RwLock<IndexMap<Address, Account>>,
    accounts: Observable<Vec<Account>>,
    refresh_counter: RefreshCounter,
}

/// Address-keyed account cache kept in sync with the remote client.
///
/// The observed sequence is in insertion order and is republished as a whole after every
/// change. Clones share the same cache.
#[derive(Clone)]
pub struct Accounts {
    inner: Arc<AccountsInner>,
}

impl Accounts {
    /// Empty cache reading through `gate`.
    pub fn new(gate: ConsensusGate) -> Self {
        Self {
            inner: Arc::new(AccountsInner {
                gate,
                accounts_map: RwLock::new(IndexMap::new()),
                accounts: Observable::new(Vec::new()),
                refresh_counter: RefreshCounter::new(),
            }),
        }
    }

    /// Observed account sequence.
    pub fn accounts(&self) -> Observable<Vec<Account>> {
        self.inner.accounts.clone()
    }

    /// True while at least one account refresh is in flight.
    pub fn refreshing(&self) -> Observable<bool> {
        self.inner.refresh_counter.refreshing()
    }

    /// Stored record for `address`.
    pub fn get(&self, address: &Address) -> Option<Account> {
        self.read_map(|map| map.get(address).cloned())
    }

    /// Number of cached accounts.
    pub fn len(&self) -> usize {
        self.read_map(|map| map.len())
    }

    /// True if no account is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges each input into the cache and refreshes the addresses that were not cached before.
    ///
    /// Returns the handle of the spawned refresh, or `None` if every address was already known.
    /// Malformed input fails the whole call before anything is merged.
    /// Must be called from within a tokio runtime.
    pub fn add<I>(&self, input: I) -> Result<Option<RefreshHandle>, AddressError>
    where
        I: IntoIterator,
        I::Item: Into<AddressLike>,
    {
        let accounts = parse_address_likes(input)?;
        if accounts.is_empty() {
            return Ok(None);
        }

        let mut new_addresses = Vec::new();
        self.merge_and_publish(|map| {
            for account in accounts {
                match map.get_mut(&account.address) {
                    Some(stored) => stored.merge(account),
                    None => {
                        new_addresses.push(account.address);
                        map.insert(account.address, account);
                    }
                }
            }
        });

        if new_addresses.is_empty() {
            return Ok(None);
        }
        Ok(Some(spawn_refresh("accounts", self.refresh(new_addresses))))
    }

    /// Drops each named address. Unknown addresses are ignored.
    pub fn remove<I>(&self, input: I) -> Result<(), AddressError>
    where
        I: IntoIterator,
        I::Item: Into<AddressLike>,
    {
        let addresses = parse_addresses(input)?;
        if addresses.is_empty() {
            return Ok(());
        }

        self.merge_and_publish(|map| {
            for address in &addresses {
                map.shift_remove(address);
            }
        });

        Ok(())
    }

    /// Fetches the given addresses, or every cached address if none are given.
    ///
    /// The refresh is counted as soon as this returns. The returned future waits for consensus,
    /// fetches, merges and stops being counted when it completes, fails or is dropped.
    pub fn refresh<I>(&self, input: I) -> Refresh
    where
        I: IntoIterator,
        I::Item: Into<AddressLike>,
    {
        let addresses = match parse_addresses(input) {
            Ok(addresses) if addresses.is_empty() => {
                self.read_map(|map| map.keys().copied().collect())
            }
            Ok(addresses) => addresses,
            Err(e) => return future::ready(Err(e.into())).boxed(),
        };
        if addresses.is_empty() {
            return future::ready(Ok(())).boxed();
        }

        tracing::debug!(
            "Refreshing accounts {:?}",
            addresses.iter().map(|a| a.to_string()).collect::<Vec<_>>()
        );
        let guard = self.inner.refresh_counter.start();
        let accounts = self.clone();

        async move {
            let _guard = guard;
            let client = accounts.inner.gate.established().await?;
            let fetched = client.get_accounts(&addresses).await?;
            if fetched.len() != addresses.len() {
                tracing::warn!(
                    "Requested {} accounts, client returned {}.",
                    addresses.len(),
                    fetched.len()
                );
            }

            accounts.merge_and_publish(|map| {
                for (address, account) in addresses.iter().zip(fetched) {
                    map.entry(*address)
                        .or_insert_with(|| Account::new(*address))
                        .merge(account);
                }
            });

            Ok(())
        }
        .boxed()
    }

    /// Refreshes every cached account.
    pub fn refresh_all(&self) -> Refresh {
        self.refresh(None::<Address>)
    }

    /// Refreshes every cached account whenever `trigger` changes.
    pub fn refresh_on<T>(&self, trigger: &Observable<T>) -> SubscriptionId
    where
        T: Clone + Send + Sync + 'static,
    {
        let accounts = self.clone();
        trigger.subscribe(move |_| {
            if !accounts.is_empty() {
                spawn_refresh("accounts", accounts.refresh_all());
            }
        })
    }

    fn read_map<R>(&self, f: impl FnOnce(&IndexMap<Address, Account>) -> R) -> R {
        f(&self
            .inner
            .accounts_map
            .read()
            .unwrap_or_else(PoisonError::into_inner))
    }

    // the whole batch is applied, and the snapshot staged, under one write lock so snapshots land
    // in merge order; listeners run after the lock is released
    fn merge_and_publish(&self, f: impl FnOnce(&mut IndexMap<Address, Account>)) {
        {
            let mut map = self
                .inner
                .accounts_map
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut map);
            self.inner.accounts.stage(map.values().cloned().collect());
        }
        self.inner.accounts.publish();
    }
}
