//! Contract call descriptors and payload encoding for bridge operations.
//!
//! Each on-chain step is an [`Operation`] with a static
//! [`FunctionDescriptor`]. Chain clients may use [`Operation::evm_calldata`]
//! or [`Operation::clarity_args`] to build the transaction, or treat the
//! descriptor as opaque metadata and encode with their own SDK.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

use crate::address::{AccountReference, AddressFamily};
use crate::codec::EncodedRecipient;
use crate::error::{BridgeError, BridgeResult};
use crate::types::DomainId;

// ═══════════════════════════════════════════════════════════════════════════════
// DESCRIPTORS
// ═══════════════════════════════════════════════════════════════════════════════

/// Virtual machine a contract function runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractVm {
    /// Ethereum virtual machine (Solidity ABI).
    Evm,
    /// Stacks Clarity VM.
    Clarity,
}

/// Typed argument of a contract function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    Address,
    Uint256,
    Uint32,
    Bytes32,
    Bytes,
    ClarityUint,
    ClarityBuffer(u32),
}

impl AbiType {
    /// Canonical type name as it appears in signatures.
    pub fn canonical(&self) -> String {
        match self {
            Self::Address => "address".into(),
            Self::Uint256 => "uint256".into(),
            Self::Uint32 => "uint32".into(),
            Self::Bytes32 => "bytes32".into(),
            Self::Bytes => "bytes".into(),
            Self::ClarityUint => "uint".into(),
            Self::ClarityBuffer(len) => format!("(buff {})", len),
        }
    }
}

/// Named function parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: &'static str,
    pub ty: AbiType,
}

/// Static description of a contract function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    pub vm: ContractVm,
    pub inputs: &'static [Param],
}

impl FunctionDescriptor {
    /// `name(type,type,...)`
    pub fn signature(&self) -> String {
        let types: Vec<String> = self.inputs.iter().map(|p| p.ty.canonical()).collect();
        format!("{}({})", self.name, types.join(","))
    }

    /// 4-byte Keccak-256 selector for EVM functions.
    pub fn selector(&self) -> Option<[u8; 4]> {
        if self.vm != ContractVm::Evm {
            return None;
        }
        let hash = Keccak256::digest(self.signature().as_bytes());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&hash[..4]);
        Some(selector)
    }
}

/// ERC-20 `approve(address spender, uint256 amount)`.
pub const ERC20_APPROVE: FunctionDescriptor = FunctionDescriptor {
    name: "approve",
    vm: ContractVm::Evm,
    inputs: &[
        Param { name: "spender", ty: AbiType::Address },
        Param { name: "amount", ty: AbiType::Uint256 },
    ],
};

/// xReserve `depositToRemote`.
pub const XRESERVE_DEPOSIT_TO_REMOTE: FunctionDescriptor = FunctionDescriptor {
    name: "depositToRemote",
    vm: ContractVm::Evm,
    inputs: &[
        Param { name: "value", ty: AbiType::Uint256 },
        Param { name: "remoteDomain", ty: AbiType::Uint32 },
        Param { name: "remoteRecipient", ty: AbiType::Bytes32 },
        Param { name: "localToken", ty: AbiType::Address },
        Param { name: "maxFee", ty: AbiType::Uint256 },
        Param { name: "hookData", ty: AbiType::Bytes },
    ],
};

/// USDCx `burn` on Stacks.
pub const USDCX_BURN: FunctionDescriptor = FunctionDescriptor {
    name: "burn",
    vm: ContractVm::Clarity,
    inputs: &[
        Param { name: "amount", ty: AbiType::ClarityUint },
        Param { name: "native-domain", ty: AbiType::ClarityUint },
        Param { name: "native-recipient", ty: AbiType::ClarityBuffer(32) },
    ],
};

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT PRINCIPAL
// ═══════════════════════════════════════════════════════════════════════════════

/// Stacks contract identifier (`ADDRESS.contract-name`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContractPrincipal {
    pub address: AccountReference,
    pub name: String,
}

/// Maximum Clarity contract name length.
pub const MAX_CONTRACT_NAME_LEN: usize = 128;

impl ContractPrincipal {
    /// Build a principal, validating the deployer address and name.
    pub fn new(address: AccountReference, name: impl Into<String>) -> BridgeResult<Self> {
        let name = name.into();
        if address.family() != AddressFamily::Stacks {
            return Err(BridgeError::InvalidAddress(format!(
                "contract deployer {} is not a Stacks address",
                address
            )));
        }
        let mut chars = name.chars();
        let valid = name.len() <= MAX_CONTRACT_NAME_LEN
            && chars.next().map_or(false, |c| c.is_ascii_alphabetic())
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(BridgeError::InvalidAddress(format!(
                "invalid contract name '{}'",
                name
            )));
        }
        Ok(Self { address, name })
    }
}

impl fmt::Display for ContractPrincipal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.address, self.name)
    }
}

impl FromStr for ContractPrincipal {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, name) = s.trim().split_once('.').ok_or_else(|| {
            BridgeError::InvalidAddress(format!("{} is not ADDRESS.contract-name", s))
        })?;
        Self::new(AccountReference::parse_stacks(address)?, name)
    }
}

impl Serialize for ContractPrincipal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContractPrincipal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// One on-chain step of a transfer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Raise the bridge's allowance on the token.
    Approve {
        token: AccountReference,
        spender: AccountReference,
        amount: u128,
    },
    /// Lock tokens in xReserve for minting on the remote domain.
    DepositToRemote {
        xreserve: AccountReference,
        value: u128,
        remote_domain: DomainId,
        remote_recipient: EncodedRecipient,
        local_token: AccountReference,
        max_fee: u128,
        #[serde(with = "hex_bytes")]
        hook_data: Vec<u8>,
    },
    /// Burn USDCx with the native-chain recipient in the payload.
    Burn {
        contract: ContractPrincipal,
        amount: u128,
        native_domain: DomainId,
        native_recipient: EncodedRecipient,
    },
}

impl Operation {
    /// Descriptor of the called function.
    pub fn descriptor(&self) -> &'static FunctionDescriptor {
        match self {
            Self::Approve { .. } => &ERC20_APPROVE,
            Self::DepositToRemote { .. } => &XRESERVE_DEPOSIT_TO_REMOTE,
            Self::Burn { .. } => &USDCX_BURN,
        }
    }

    /// Contract the call targets.
    pub fn target(&self) -> String {
        match self {
            Self::Approve { token, .. } => token.to_string(),
            Self::DepositToRemote { xreserve, .. } => xreserve.to_string(),
            Self::Burn { contract, .. } => contract.to_string(),
        }
    }

    /// Token amount moved or authorised by the call.
    pub fn amount(&self) -> u128 {
        match self {
            Self::Approve { amount, .. } | Self::Burn { amount, .. } => *amount,
            Self::DepositToRemote { value, .. } => *value,
        }
    }

    /// Solidity ABI calldata (selector + arguments) for EVM operations.
    pub fn evm_calldata(&self) -> Option<Vec<u8>> {
        let selector = self.descriptor().selector()?;
        let mut data = selector.to_vec();

        match self {
            Self::Approve { spender, amount, .. } => {
                data.extend_from_slice(&address_word(spender));
                data.extend_from_slice(&uint_word(*amount));
            }
            Self::DepositToRemote {
                value,
                remote_domain,
                remote_recipient,
                local_token,
                max_fee,
                hook_data,
                ..
            } => {
                data.extend_from_slice(&uint_word(*value));
                data.extend_from_slice(&uint_word(remote_domain.as_u32() as u128));
                data.extend_from_slice(remote_recipient.as_bytes());
                data.extend_from_slice(&address_word(local_token));
                data.extend_from_slice(&uint_word(*max_fee));
                // Offset of the dynamic `bytes` tail, after six head words.
                data.extend_from_slice(&uint_word(6 * 32));
                data.extend_from_slice(&uint_word(hook_data.len() as u128));
                data.extend_from_slice(hook_data);
                let pad = (32 - hook_data.len() % 32) % 32;
                data.extend(std::iter::repeat(0u8).take(pad));
            }
            Self::Burn { .. } => return None,
        }

        Some(data)
    }

    /// Clarity arguments for Stacks operations.
    pub fn clarity_args(&self) -> Option<Vec<ClarityValue>> {
        match self {
            Self::Burn {
                amount,
                native_domain,
                native_recipient,
                ..
            } => Some(vec![
                ClarityValue::UInt(*amount),
                ClarityValue::UInt(native_domain.as_u32() as u128),
                ClarityValue::Buffer(native_recipient.as_bytes().to_vec()),
            ]),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.descriptor().name, self.target())
    }
}

/// Clarity value as used by the `burn` call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClarityValue {
    UInt(u128),
    Buffer(Vec<u8>),
}

impl ClarityValue {
    /// Stacks consensus serialization.
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::UInt(value) => {
                let mut out = Vec::with_capacity(17);
                out.push(0x01);
                out.extend_from_slice(&value.to_be_bytes());
                out
            }
            Self::Buffer(bytes) => {
                let mut out = Vec::with_capacity(5 + bytes.len());
                out.push(0x02);
                out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                out.extend_from_slice(bytes);
                out
            }
        }
    }
}

fn uint_word(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

fn address_word(address: &AccountReference) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..].copy_from_slice(address.account_bytes());
    word
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
