//! Ledger addresses and the address-like inputs the stores accept.

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::primitives::Account;

/// Serialized size of an address in bytes.
pub const ADDRESS_SIZE: usize = 20;

const COUNTRY_CODE: &str = "NQ";
const BASE32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKLMNPQRSTUVXY";
const USER_FRIENDLY_LENGTH: usize = 36;
const HEX_LENGTH: usize = ADDRESS_SIZE * 2;
const BASE64_LENGTH: usize = 28;

/// Errors raised while normalizing address-like input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AddressError {
    /// Decoded to the wrong number of bytes
    #[error("invalid address length {0}, expected {ADDRESS_SIZE} bytes")]
    InvalidLength(usize),
    /// Not a recognised address encoding
    #[error("unrecognised address encoding '{0}'")]
    InvalidEncoding(String),
    /// User-friendly address without the `NQ` prefix
    #[error("invalid country code in '{0}'")]
    InvalidCountryCode(String),
    /// User-friendly address whose check digits do not match
    #[error("invalid checksum in '{0}'")]
    InvalidChecksum(String),
    /// Character outside the base32 alphabet
    #[error("invalid character '{0}'")]
    InvalidCharacter(char),
    /// Hex decoding failed
    #[error("invalid hex. {0}")]
    InvalidHex(#[from] hex::FromHexError),
    /// Base64 decoding failed
    #[error("invalid base64. {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// A ledger address.
///
/// Equality and hashing are over the raw bytes, so an address parsed from any
/// encoding keys maps and sets the same way.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Wraps raw address bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds an address from a byte slice of exactly [`ADDRESS_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let bytes: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Parses the user-friendly `NQxx XXXX ...` form. Spaces and case are ignored.
    pub fn from_user_friendly(s: &str) -> Result<Self, AddressError> {
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        if !compact.starts_with(COUNTRY_CODE) {
            return Err(AddressError::InvalidCountryCode(s.to_string()));
        }
        if !compact.is_ascii() || compact.len() != USER_FRIENDLY_LENGTH {
            return Err(AddressError::InvalidEncoding(s.to_string()));
        }
        let rearranged = format!("{}{}", &compact[4..], &compact[..4]);
        let digits = rearranged
            .chars()
            .map(|c| iban_value(c).ok_or(AddressError::InvalidCharacter(c)))
            .collect::<Result<Vec<_>, _>>()?;
        if iban_remainder(digits) != 1 {
            return Err(AddressError::InvalidChecksum(s.to_string()));
        }

        Self::from_slice(&base32_decode(&compact[4..])?)
    }

    /// Renders the user-friendly form, optionally grouped in blocks of four.
    pub fn to_user_friendly(&self, with_spaces: bool) -> String {
        let base32 = base32_encode(&self.0);
        let check = 98
            - iban_remainder(
                format!("{base32}{COUNTRY_CODE}00")
                    .chars()
                    .filter_map(iban_value),
            );
        let plain = format!("{COUNTRY_CODE}{check:02}{base32}");
        if !with_spaces {
            return plain;
        }

        plain
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parses a 40 character hex string.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        Self::from_slice(&hex::decode(s)?)
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a base64 string.
    pub fn from_base64(s: &str) -> Result<Self, AddressError> {
        Self::from_slice(&base64::decode(s)?)
    }

    /// Parses any supported string encoding: user-friendly, hex or base64.
    pub fn from_any(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        let compact_len = trimmed.chars().filter(|c| !c.is_whitespace()).count();

        if compact_len == USER_FRIENDLY_LENGTH
            && trimmed
                .get(..2)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(COUNTRY_CODE))
        {
            Self::from_user_friendly(trimmed)
        } else if trimmed.len() == HEX_LENGTH {
            Self::from_hex(trimmed)
        } else if trimmed.len() == BASE64_LENGTH {
            Self::from_base64(trimmed)
        } else {
            Err(AddressError::InvalidEncoding(s.to_string()))
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::from_bytes([0; ADDRESS_SIZE])
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_any(s)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_user_friendly(true))
    }
}

impl std::fmt::Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Address({})", self.to_user_friendly(false))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_user_friendly(true))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_any(&s).map_err(serde::de::Error::custom)
    }
}

// letters count as 10..=35
fn iban_value(c: char) -> Option<u32> {
    match c.to_ascii_uppercase() {
        d @ '0'..='9' => Some(d as u32 - '0' as u32),
        l @ 'A'..='Z' => Some(l as u32 - 'A' as u32 + 10),
        _ => None,
    }
}

// mod 97 over the decimal expansion of the values
fn iban_remainder(values: impl IntoIterator<Item = u32>) -> u32 {
    values.into_iter().fold(0, |remainder, value| {
        if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        }
    })
}

fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for byte in bytes {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(s: &str) -> Result<Vec<u8>, AddressError> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0;
    for c in s.chars() {
        let index = BASE32_ALPHABET
            .iter()
            .position(|a| *a as char == c)
            .ok_or(AddressError::InvalidCharacter(c))?;
        buffer = (buffer << 5) | index as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Ok(out)
}

/// Anything the stores accept where an address is expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressLike {
    /// An already parsed address.
    Address(Address),
    /// An address in any supported string encoding.
    Encoded(String),
    /// A (possibly partial) account record carrying its address.
    Account(Account),
}

impl From<Address> for AddressLike {
    fn from(address: Address) -> Self {
        AddressLike::Address(address)
    }
}

impl From<&Address> for AddressLike {
    fn from(address: &Address) -> Self {
        AddressLike::Address(*address)
    }
}

impl From<&str> for AddressLike {
    fn from(encoded: &str) -> Self {
        AddressLike::Encoded(encoded.to_string())
    }
}

impl From<String> for AddressLike {
    fn from(encoded: String) -> Self {
        AddressLike::Encoded(encoded)
    }
}

impl From<Account> for AddressLike {
    fn from(account: Account) -> Self {
        AddressLike::Account(account)
    }
}

impl AddressLike {
    /// Normalizes into an account record, bare addresses becoming records with no known fields.
    pub fn into_account(self) -> Result<Account, AddressError> {
        match self {
            AddressLike::Address(address) => Ok(Account::new(address)),
            AddressLike::Encoded(encoded) => Ok(Account::new(Address::from_any(&encoded)?)),
            AddressLike::Account(account) => Ok(account),
        }
    }
}

/// Normalizes a batch of address-like inputs. Fails on the first malformed input.
pub fn parse_address_likes<I>(input: I) -> Result<Vec<Account>, AddressError>
where
    I: IntoIterator,
    I::Item: Into<AddressLike>,
{
    input
        .into_iter()
        .map(|address_like| address_like.into().into_account())
        .collect()
}

/// Like [`parse_address_likes`] but keeps only the addresses.
pub fn parse_addresses<I>(input: I) -> Result<Vec<Address>, AddressError>
where
    I: IntoIterator,
    I::Item: Into<AddressLike>,
{
    Ok(parse_address_likes(input)?
        .into_iter()
        .map(|account| account.address)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const BURN_ADDRESS: &str = "NQ07 0000 0000 0000 0000 0000 0000 0000 0000";

    #[test]
    fn burn_address_user_friendly() {
        let zero = Address::from_bytes([0; ADDRESS_SIZE]);
        assert_eq!(zero.to_user_friendly(true), BURN_ADDRESS);
        assert_eq!(Address::from_user_friendly(BURN_ADDRESS).unwrap(), zero);
        assert_eq!(
            Address::from_user_friendly("nq0700000000000000000000000000000000").unwrap(),
            zero
        );
    }

    #[test]
    fn user_friendly_round_trip() {
        let address = Address::from_bytes([
            0xde, 0xad, 0xbe, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc,
            0xba, 0x98, 0x76, 0x54, 0x32, 0x10,
        ]);
        let encoded = address.to_string();
        assert_eq!(encoded.len(), 44);
        assert!(encoded.starts_with("NQ"));
        assert_eq!(encoded.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn detects_bad_checksum() {
        assert!(matches!(
            Address::from_user_friendly("NQ08 0000 0000 0000 0000 0000 0000 0000 0000"),
            Err(AddressError::InvalidChecksum(_))
        ));
    }

    #[test]
    fn rejects_bad_country_code() {
        assert!(matches!(
            Address::from_user_friendly("XX07 0000 0000 0000 0000 0000 0000 0000 0000"),
            Err(AddressError::InvalidCountryCode(_))
        ));
    }

    #[test]
    fn rejects_character_outside_the_alphabet() {
        assert_eq!(
            Address::from_user_friendly("NQ07 0000 0000 0000 0000 0000 0000 0000 000!"),
            Err(AddressError::InvalidCharacter('!'))
        );
    }

    #[test]
    fn bad_hex_is_reported_through_sync_error() {
        let error: crate::error::SyncError = Address::from_hex(&"zz".repeat(ADDRESS_SIZE))
            .unwrap_err()
            .into();
        assert_eq!(
            error,
            crate::error::SyncError::Address(AddressError::InvalidHex(
                hex::FromHexError::InvalidHexCharacter { c: 'z', index: 0 }
            ))
        );
    }

    #[test]
    fn rejects_unknown_encoding() {
        assert!(matches!(
            Address::from_any("not an address"),
            Err(AddressError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn encodings_are_structurally_equal() {
        let bytes = [7u8; ADDRESS_SIZE];
        let from_bytes = Address::from_bytes(bytes);
        let from_hex = Address::from_any(&hex::encode(bytes)).unwrap();
        let from_base64 = Address::from_any(&base64::encode(bytes)).unwrap();
        let from_friendly = Address::from_any(&from_bytes.to_user_friendly(false)).unwrap();

        let set: HashSet<Address> = [from_bytes, from_hex, from_base64, from_friendly]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn parse_address_likes_is_all_or_nothing() {
        let good = Address::from_bytes([1; ADDRESS_SIZE]);
        let result = parse_address_likes(vec![
            AddressLike::from(good),
            AddressLike::from("garbage"),
        ]);
        assert!(result.is_err());

        let parsed = parse_addresses(vec![
            AddressLike::from(good),
            AddressLike::from(good.to_hex()),
        ])
        .unwrap();
        assert_eq!(parsed, vec![good, good]);
    }

    #[test]
    fn serde_uses_user_friendly_form() {
        let zero = Address::from_bytes([0; ADDRESS_SIZE]);
        let json = serde_json::to_string(&zero).unwrap();
        assert_eq!(json, format!("\"{BURN_ADDRESS}\""));
        assert_eq!(serde_json::from_str::<Address>(&json).unwrap(), zero);
    }
}
