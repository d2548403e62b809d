//! Module for primitive structs associated with the ledger stores

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use nimbus_status::transaction_state::TransactionState;

use crate::address::Address;

/// Size of a block or transaction hash in bytes.
pub const HASH_SIZE: usize = 32;

/// Block or transaction hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    /// Wraps raw hash bytes
    pub const fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw hash bytes
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    /// Parses a 64 character hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Account type discriminator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// Plain balance account
    Basic,
    /// Vesting contract
    Vesting,
    /// Hashed time-locked contract
    Htlc,
}

/// Latest known state of an account.
///
/// Every field except the address is optional so that the same type serves as
/// a partial update. See [`Account::merge`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub address: Address,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<AccountType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,

    // vesting contracts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesting_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesting_step_blocks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesting_step_amount: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vesting_total_amount: Option<u64>,

    // htlcs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<u64>,
}

macro_rules! override_fields {
    ($target:expr, $update:expr, $($field:ident),+ $(,)?) => {
        $(
            if $update.$field.is_some() {
                $target.$field = $update.$field;
            }
        )+
    };
}

impl Account {
    /// An account with no known fields
    pub fn new(address: Address) -> Self {
        Account {
            address,
            ..Default::default()
        }
    }

    /// Field-wise override: fields present in `update` replace ours, absent fields are kept.
    /// The address is the key and is never changed.
    pub fn merge(&mut self, update: Account) {
        override_fields!(
            self,
            update,
            account_type,
            balance,
            owner,
            vesting_start,
            vesting_step_blocks,
            vesting_step_amount,
            vesting_total_amount,
            sender,
            recipient,
            hash_root,
            hash_count,
            timeout,
            total_amount,
        );
    }
}

/// Transaction as reported by the remote client.
///
/// Records are replaced whole when a newer one with the same hash arrives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub transaction_hash: Hash,
    pub sender: Address,
    pub recipient: Address,
    /// `None` while the transaction is not yet in a block
    #[serde(default)]
    pub timestamp: Option<u64>,
    pub value: u64,
    pub fee: u64,
    pub state: TransactionState,
    #[serde(default)]
    pub block_hash: Option<Hash>,
    #[serde(default)]
    pub block_height: Option<u32>,
    #[serde(default)]
    pub confirmations: u32,
    #[serde(default, with = "hex::serde")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub flags: u8,
    pub validity_start_height: u32,
}

impl TransactionDetails {
    /// True if the transaction moves funds from or to `address`
    pub fn involves(&self, address: &Address) -> bool {
        self.sender == *address || self.recipient == *address
    }

    /// The timestamp, treating zero as absent
    pub fn confirmed_timestamp(&self) -> Option<u64> {
        self.timestamp.filter(|timestamp| *timestamp != 0)
    }
}

/// Block header data the stores care about
#[derive(Debug, Clone, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct Block {
    hash: Hash,
    prev_hash: Hash,
    height: u32,
    timestamp: u64,
}

impl Block {
    #[allow(missing_docs)]
    pub fn from_parts(hash: Hash, prev_hash: Hash, height: u32, timestamp: u64) -> Self {
        Self {
            hash,
            prev_hash,
            height,
            timestamp,
        }
    }
}

/// Peer counts by connection type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PeerCounts {
    pub total: u32,
    pub connecting: u32,
    pub dumb: u32,
    pub rtc: u32,
    pub ws: u32,
    pub wss: u32,
}

/// Known peer addresses by protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct KnownAddressCounts {
    pub total: u32,
    pub rtc: u32,
    pub ws: u32,
    pub wss: u32,
}

/// Network statistics, passed through from the client unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters, CopyGetters)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatistics {
    #[getset(get_copy = "pub")]
    bytes_received: u64,
    #[getset(get_copy = "pub")]
    bytes_sent: u64,
    #[getset(get_copy = "pub")]
    total_peer_count: u32,
    #[getset(get = "pub")]
    peer_counts_by_type: PeerCounts,
    #[getset(get_copy = "pub")]
    total_known_addresses: u32,
    #[getset(get = "pub")]
    known_addresses_by_type: KnownAddressCounts,
    #[getset(get_copy = "pub")]
    time_offset: i64,
}

impl NetworkStatistics {
    #[allow(missing_docs)]
    pub fn from_parts(
        bytes_received: u64,
        bytes_sent: u64,
        peer_counts_by_type: PeerCounts,
        known_addresses_by_type: KnownAddressCounts,
        time_offset: i64,
    ) -> Self {
        Self {
            bytes_received,
            bytes_sent,
            total_peer_count: peer_counts_by_type.total,
            peer_counts_by_type,
            total_known_addresses: known_addresses_by_type.total,
            known_addresses_by_type,
            time_offset,
        }
    }
}
