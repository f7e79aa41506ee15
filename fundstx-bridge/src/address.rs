//! Chain-native account references.
//!
//! Two families are supported: Stacks-style version + hash160 accounts
//! (rendered as c32check strings) and flat 20-byte EVM accounts (rendered as
//! `0x` hex, EIP-55 checksummed on request).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::c32;
use crate::error::{BridgeError, BridgeResult};

/// Length of every account hash or raw account.
pub const ACCOUNT_LEN: usize = 20;

/// Stacks address version bytes.
pub mod stacks_version {
    /// Mainnet single-sig (`SP`).
    pub const MAINNET_SINGLE_SIG: u8 = 22;
    /// Mainnet multi-sig (`SM`).
    pub const MAINNET_MULTI_SIG: u8 = 20;
    /// Testnet single-sig (`ST`).
    pub const TESTNET_SINGLE_SIG: u8 = 26;
    /// Testnet multi-sig (`SN`).
    pub const TESTNET_MULTI_SIG: u8 = 21;

    /// All versions a Stacks domain accepts.
    pub const ALL: [u8; 4] = [
        MAINNET_SINGLE_SIG,
        MAINNET_MULTI_SIG,
        TESTNET_SINGLE_SIG,
        TESTNET_MULTI_SIG,
    ];
}

/// Address family of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// Version byte + hash160 (Stacks).
    Stacks,
    /// Flat 20-byte account (Ethereum and other EVM chains).
    Evm,
}

impl AddressFamily {
    /// Whether a hashed reference with this version belongs to the family.
    pub fn accepts_version(&self, version: u8) -> bool {
        match self {
            Self::Stacks => stacks_version::ALL.contains(&version),
            Self::Evm => false,
        }
    }

    /// Parse a chain-native address string of this family.
    pub fn parse(&self, address: &str) -> BridgeResult<AccountReference> {
        match self {
            Self::Stacks => AccountReference::parse_stacks(address),
            Self::Evm => AccountReference::parse_evm(address),
        }
    }

    /// Display name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stacks => "stacks",
            Self::Evm => "evm",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque chain-native identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccountReference {
    /// Version byte + hash160.
    Hashed {
        /// Address version byte.
        version: u8,
        /// hash160 of the account's public key or script.
        hash: [u8; ACCOUNT_LEN],
    },
    /// Flat 20-byte account.
    Raw([u8; ACCOUNT_LEN]),
}

impl AccountReference {
    /// Build a hashed reference, rejecting hashes that are not 20 bytes.
    pub fn hashed(version: u8, hash: &[u8]) -> BridgeResult<Self> {
        Ok(Self::Hashed {
            version,
            hash: fixed_account(hash)?,
        })
    }

    /// Build a raw reference, rejecting accounts that are not 20 bytes.
    pub fn raw(account: &[u8]) -> BridgeResult<Self> {
        Ok(Self::Raw(fixed_account(account)?))
    }

    /// Parse a c32check Stacks address (`ST…`, `SP…`, `SN…`, `SM…`).
    pub fn parse_stacks(address: &str) -> BridgeResult<Self> {
        let (version, hash) = c32::address_decode(address.trim())?;
        if !stacks_version::ALL.contains(&version) {
            return Err(BridgeError::InvalidAddress(format!(
                "unknown Stacks address version {}",
                version
            )));
        }
        Self::hashed(version, &hash)
    }

    /// Parse a `0x`-prefixed 20-byte EVM address. Mixed-case input must
    /// carry a valid EIP-55 checksum.
    pub fn parse_evm(address: &str) -> BridgeResult<Self> {
        let address = address.trim();
        let digits = address
            .strip_prefix("0x")
            .or_else(|| address.strip_prefix("0X"))
            .ok_or_else(|| {
                BridgeError::InvalidAddress(format!("{} is missing the 0x prefix", address))
            })?;

        if digits.len() != ACCOUNT_LEN * 2 {
            return Err(BridgeError::InvalidAddress(format!(
                "expected {} hex digits, got {}",
                ACCOUNT_LEN * 2,
                digits.len()
            )));
        }

        let bytes = hex::decode(digits)?;
        let account = fixed_account(&bytes)?;

        let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower && eip55_digits(&account) != digits {
            return Err(BridgeError::InvalidAddress(format!(
                "EIP-55 checksum mismatch for {}",
                address
            )));
        }

        Ok(Self::Raw(account))
    }

    /// The family this reference belongs to.
    pub fn family(&self) -> AddressFamily {
        match self {
            Self::Hashed { .. } => AddressFamily::Stacks,
            Self::Raw(_) => AddressFamily::Evm,
        }
    }

    /// The 20 account bytes.
    pub fn account_bytes(&self) -> &[u8; ACCOUNT_LEN] {
        match self {
            Self::Hashed { hash, .. } => hash,
            Self::Raw(account) => account,
        }
    }

    /// Version byte of a hashed reference.
    pub fn version(&self) -> Option<u8> {
        match self {
            Self::Hashed { version, .. } => Some(*version),
            Self::Raw(_) => None,
        }
    }

    /// Whether the reference is a Stacks testnet account.
    pub fn is_testnet(&self) -> bool {
        matches!(
            self.version(),
            Some(stacks_version::TESTNET_SINGLE_SIG) | Some(stacks_version::TESTNET_MULTI_SIG)
        )
    }

    /// EIP-55 rendering of a raw reference.
    pub fn to_checksum_address(&self) -> Option<String> {
        match self {
            Self::Raw(account) => Some(format!("0x{}", eip55_digits(account))),
            Self::Hashed { .. } => None,
        }
    }
}

impl fmt::Display for AccountReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hashed { version, hash } => match c32::address_encode(*version, hash) {
                Ok(address) => f.write_str(&address),
                Err(_) => write!(f, "{}:0x{}", version, hex::encode(hash)),
            },
            Self::Raw(account) => write!(f, "0x{}", hex::encode(account)),
        }
    }
}

impl FromStr for AccountReference {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.starts_with("0x") || s.starts_with("0X") {
            Self::parse_evm(s)
        } else {
            Self::parse_stacks(s)
        }
    }
}

impl Serialize for AccountReference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountReference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn fixed_account(bytes: &[u8]) -> BridgeResult<[u8; ACCOUNT_LEN]> {
    bytes.try_into().map_err(|_| {
        BridgeError::InvalidAddress(format!(
            "expected {} account bytes, got {}",
            ACCOUNT_LEN,
            bytes.len()
        ))
    })
}

fn eip55_digits(account: &[u8; ACCOUNT_LEN]) -> String {
    let lower = hex::encode(account);
    let hash = Keccak256::digest(lower.as_bytes());

    lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = (hash[i / 2] >> if i % 2 == 0 { 4 } else { 0 }) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TESTNET: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";

    #[test]
    fn test_parse_stacks() {
        let reference = AccountReference::parse_stacks(TESTNET).unwrap();
        assert_eq!(reference.version(), Some(stacks_version::TESTNET_SINGLE_SIG));
        assert!(reference.is_testnet());
        assert_eq!(reference.family(), AddressFamily::Stacks);
        assert_eq!(reference.to_string(), TESTNET);
    }

    #[test]
    fn test_unknown_stacks_version_rejected() {
        // Valid c32check, but version 0 is not a Stacks account version.
        let address = c32::address_encode(0, &[7u8; 20]).unwrap();
        assert!(AccountReference::parse_stacks(&address).is_err());
    }

    #[test]
    fn test_parse_evm() {
        let reference =
            AccountReference::parse_evm("0x1c7d4b196cb0c7b01d743fbc6116a902379c7238").unwrap();
        assert_eq!(reference.family(), AddressFamily::Evm);
        assert_eq!(reference.to_string(), "0x1c7d4b196cb0c7b01d743fbc6116a902379c7238");
    }

    #[test]
    fn test_evm_checksum() {
        // Vectors from EIP-55.
        for address in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        ] {
            let reference = AccountReference::parse_evm(address).unwrap();
            assert_eq!(reference.to_checksum_address().unwrap(), address);
        }

        assert!(AccountReference::parse_evm("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD").is_err());
    }

    #[test]
    fn test_evm_rejects_malformed() {
        assert!(AccountReference::parse_evm("1c7d4b196cb0c7b01d743fbc6116a902379c7238").is_err());
        assert!(AccountReference::parse_evm("0x1c7d4b").is_err());
        assert!(AccountReference::parse_evm("0xzz7d4b196cb0c7b01d743fbc6116a902379c7238").is_err());
    }

    #[test]
    fn test_slice_constructors_check_length() {
        assert!(AccountReference::hashed(26, &[1u8; 19]).is_err());
        assert!(AccountReference::hashed(26, &[1u8; 21]).is_err());
        assert!(AccountReference::raw(&[1u8; 32]).is_err());
        assert!(AccountReference::raw(&[1u8; 20]).is_ok());
    }

    #[test]
    fn test_from_str_and_serde() {
        let stacks: AccountReference = TESTNET.parse().unwrap();
        let json = serde_json::to_string(&stacks).unwrap();
        assert_eq!(json, format!("\"{}\"", TESTNET));
        let back: AccountReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stacks);

        let evm: AccountReference = "0x008888878f94C0d87defdf0B07f46B93C1934442"
            .to_lowercase()
            .parse()
            .unwrap();
        assert_eq!(evm.family(), AddressFamily::Evm);
    }
}
