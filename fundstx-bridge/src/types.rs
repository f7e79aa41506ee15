//! Core types for bridge transfers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{AccountReference, AddressFamily};
use crate::amount;
use crate::error::{BridgeError, BridgeResult};

/// Integer identifying a chain/bridge route endpoint (xReserve `uint32`
/// remote domain).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(pub u32);

impl DomainId {
    /// Ethereum (and its Sepolia testnet).
    pub const ETHEREUM: DomainId = DomainId(0);
    /// Stacks (and its testnet).
    pub const STACKS: DomainId = DomainId(10003);

    /// Numeric value.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Address family used for recipients on this domain.
    pub fn address_family(&self) -> BridgeResult<AddressFamily> {
        match *self {
            Self::ETHEREUM => Ok(AddressFamily::Evm),
            Self::STACKS => Ok(AddressFamily::Stacks),
            other => Err(BridgeError::UnsupportedDomain(other.0)),
        }
    }

    /// Display name for known domains.
    pub fn display_name(&self) -> &'static str {
        match *self {
            Self::ETHEREUM => "Ethereum",
            Self::STACKS => "Stacks",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.0)
    }
}

/// Direction of a bridge transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    /// Lock USDC on the source chain (approve, then deposit) and mint on
    /// the destination chain.
    Deposit,
    /// Burn on the destination chain with the source-chain recipient in the
    /// payload.
    Withdraw,
}

impl TransferDirection {
    /// Domain the funds arrive on.
    pub fn default_domain(&self) -> DomainId {
        match self {
            Self::Deposit => DomainId::STACKS,
            Self::Withdraw => DomainId::ETHEREUM,
        }
    }

    /// Number of on-chain steps for this direction.
    pub fn step_count(&self) -> usize {
        match self {
            Self::Deposit => 2,
            Self::Withdraw => 1,
        }
    }
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deposit => f.write_str("deposit"),
            Self::Withdraw => f.write_str("withdraw"),
        }
    }
}

/// A user's transfer request. Immutable once submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferIntent {
    /// Transfer direction.
    pub direction: TransferDirection,
    /// Amount in the token's smallest unit.
    pub amount: u128,
    /// Signing identity already bound by the caller, if any.
    pub source_account: Option<String>,
    /// Recipient on the destination domain.
    pub destination: AccountReference,
    /// Destination domain.
    pub domain: DomainId,
    /// Balance the caller knows the source account holds.
    pub declared_balance: Option<u128>,
}

impl TransferIntent {
    /// Create a new transfer intent.
    pub fn new(
        direction: TransferDirection,
        amount: u128,
        destination: AccountReference,
        domain: DomainId,
    ) -> Self {
        Self {
            direction,
            amount,
            source_account: None,
            destination,
            domain,
            declared_balance: None,
        }
    }

    /// Deposit to a Stacks recipient.
    pub fn deposit(amount: u128, destination: AccountReference) -> Self {
        Self::new(TransferDirection::Deposit, amount, destination, DomainId::STACKS)
    }

    /// Withdraw to an Ethereum recipient.
    pub fn withdraw(amount: u128, destination: AccountReference) -> Self {
        Self::new(TransferDirection::Withdraw, amount, destination, DomainId::ETHEREUM)
    }

    /// Build an intent from user-entered strings. The amount is converted to
    /// smallest units exactly once, here.
    pub fn from_decimal(
        direction: TransferDirection,
        amount: &str,
        decimals: u8,
        destination: &str,
    ) -> BridgeResult<Self> {
        let amount = amount::parse_units(amount, decimals)?;
        let domain = direction.default_domain();
        let destination = domain.address_family()?.parse(destination)?;
        Ok(Self::new(direction, amount, destination, domain))
    }

    /// Bind a signing identity.
    pub fn with_source(mut self, account: impl Into<String>) -> Self {
        self.source_account = Some(account.into());
        self
    }

    /// Declare the source balance for validation.
    pub fn with_declared_balance(mut self, balance: u128) -> Self {
        self.declared_balance = Some(balance);
        self
    }

    /// Override the destination domain.
    pub fn with_domain(mut self, domain: DomainId) -> Self {
        self.domain = domain;
        self
    }
}
