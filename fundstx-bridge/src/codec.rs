//! Cross-chain recipient codec.
//!
//! The destination bridge contract expects the recipient as a `bytes32`
//! whose layout depends on the destination domain's address family:
//!
//! ```text
//! hashed (Stacks): | 0x00 * 11 | version (1) | hash160 (20) |
//! raw (EVM):       | 0x00 * 12 |        account (20)        |
//! ```
//!
//! Every unused byte is zero. Decoding rejects non-zero padding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::address::{AccountReference, AddressFamily, ACCOUNT_LEN};
use crate::error::{BridgeError, BridgeResult};
use crate::types::DomainId;

/// Width of an encoded recipient.
pub const ENCODED_LEN: usize = 32;

/// Zero bytes ahead of the version byte in the hashed layout.
pub const HASHED_PADDING_LEN: usize = 11;

/// Position of the version byte in the hashed layout.
pub const VERSION_OFFSET: usize = HASHED_PADDING_LEN;

/// Start of the hash160 in the hashed layout.
pub const HASH_OFFSET: usize = VERSION_OFFSET + 1;

/// Zero bytes ahead of the account in the raw layout.
pub const RAW_PADDING_LEN: usize = ENCODED_LEN - ACCOUNT_LEN;

/// Fixed 32-byte recipient field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EncodedRecipient([u8; ENCODED_LEN]);

impl EncodedRecipient {
    /// Wrap bytes without validation. Use [`decode`] to interpret them.
    pub fn from_bytes(bytes: [u8; ENCODED_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8; ENCODED_LEN] {
        &self.0
    }

    /// Take the bytes.
    pub fn into_bytes(self) -> [u8; ENCODED_LEN] {
        self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for EncodedRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for EncodedRecipient {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits)?;
        let bytes: [u8; ENCODED_LEN] = bytes.as_slice().try_into().map_err(|_| {
            BridgeError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ENCODED_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl Serialize for EncodedRecipient {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EncodedRecipient {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Encode a reference for the given destination domain.
pub fn encode(reference: &AccountReference, domain: DomainId) -> BridgeResult<EncodedRecipient> {
    let family = domain.address_family()?;

    match (family, reference) {
        (AddressFamily::Stacks, AccountReference::Hashed { version, hash }) => {
            if !family.accepts_version(*version) {
                return Err(BridgeError::InvalidAddress(format!(
                    "version {} is not valid for domain {}",
                    version, domain
                )));
            }
            encode_hashed(*version, hash)
        }
        (AddressFamily::Evm, AccountReference::Raw(account)) => encode_raw(account),
        (family, reference) => Err(BridgeError::InvalidAddress(format!(
            "{} account {} cannot receive on {} domain {}",
            reference.family(),
            reference,
            family,
            domain
        ))),
    }
}

/// Encode a version byte and hash160 in the hashed layout.
pub fn encode_hashed(version: u8, hash: &[u8]) -> BridgeResult<EncodedRecipient> {
    check_account_len(hash)?;

    let mut out = [0u8; ENCODED_LEN];
    out[VERSION_OFFSET] = version;
    out[HASH_OFFSET..].copy_from_slice(hash);
    Ok(EncodedRecipient(out))
}

/// Encode a 20-byte account in the raw (left-padded) layout.
pub fn encode_raw(account: &[u8]) -> BridgeResult<EncodedRecipient> {
    check_account_len(account)?;

    let mut out = [0u8; ENCODED_LEN];
    out[RAW_PADDING_LEN..].copy_from_slice(account);
    Ok(EncodedRecipient(out))
}

/// Parse a chain-native address for the domain's family and encode it.
pub fn encode_address(address: &str, domain: DomainId) -> BridgeResult<EncodedRecipient> {
    let reference = domain.address_family()?.parse(address)?;
    encode(&reference, domain)
}

/// Decode a 32-byte recipient for the given domain.
pub fn decode(bytes: &[u8], domain: DomainId) -> BridgeResult<AccountReference> {
    if bytes.len() != ENCODED_LEN {
        return Err(BridgeError::InvalidAddress(format!(
            "expected {} bytes, got {}",
            ENCODED_LEN,
            bytes.len()
        )));
    }

    let family = domain.address_family()?;
    let padding_len = match family {
        AddressFamily::Stacks => HASHED_PADDING_LEN,
        AddressFamily::Evm => RAW_PADDING_LEN,
    };

    if let Some(pos) = bytes[..padding_len].iter().position(|b| *b != 0) {
        return Err(BridgeError::InvalidAddress(format!(
            "non-zero padding byte at position {}",
            pos
        )));
    }

    match family {
        AddressFamily::Stacks => {
            let version = bytes[VERSION_OFFSET];
            if !family.accepts_version(version) {
                return Err(BridgeError::InvalidAddress(format!(
                    "version {} is not valid for domain {}",
                    version, domain
                )));
            }
            AccountReference::hashed(version, &bytes[HASH_OFFSET..])
        }
        AddressFamily::Evm => AccountReference::raw(&bytes[RAW_PADDING_LEN..]),
    }
}

fn check_account_len(bytes: &[u8]) -> BridgeResult<()> {
    if bytes.len() != ACCOUNT_LEN {
        return Err(BridgeError::InvalidAddress(format!(
            "expected {} account bytes, got {}",
            ACCOUNT_LEN,
            bytes.len()
        )));
    }
    Ok(())
}
