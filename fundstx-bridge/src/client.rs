//! Chain client contract consumed by the orchestrator.
//!
//! Wallet connection, signing, broadcast and receipt polling live behind
//! [`ChainClient`]. Implementations wrap a wallet SDK or RPC node; the
//! orchestrator only sequences calls.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::abi::Operation;
use crate::error::BridgeResult;

/// Which client of the orchestrator an operation goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainSide {
    /// Chain USDC is deposited from (Ethereum).
    Source,
    /// Chain USDCx lives on (Stacks).
    Destination,
}

impl fmt::Display for ChainSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => f.write_str("source"),
            Self::Destination => f.write_str("destination"),
        }
    }
}

/// Signing identity bound by a wallet.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Chain-native account string of the signer.
    pub address: String,
}

impl Identity {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Handle to an operation accepted for inclusion.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    /// Transaction hash or id.
    pub tx_hash: String,
    /// Unix seconds at acceptance.
    pub submitted_at: u64,
}

/// Final status of an included operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// Receipt of a confirmed operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: String,
    pub block_height: Option<u64>,
    pub status: ReceiptStatus,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Wallet/RPC collaborator for one chain.
///
/// Implementations must be safe for concurrent use. The orchestrator
/// serialises `submit_operation` per signing identity, so an implementation
/// does not need its own nonce lock.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Name used in logs.
    fn chain_name(&self) -> &str;

    /// Ask the wallet for a signing identity. Fails with `UserRejected` if
    /// the user declines the connection.
    async fn request_signing_identity(&self) -> BridgeResult<Identity>;

    /// Sign and broadcast an operation. Fails with `UserRejected` or
    /// `BroadcastError`.
    async fn submit_operation(
        &self,
        identity: &Identity,
        operation: &Operation,
    ) -> BridgeResult<OperationHandle>;

    /// Wait for inclusion. Fails with `ConfirmationTimeout` or `ChainError`.
    async fn await_confirmation(
        &self,
        handle: &OperationHandle,
        timeout: Duration,
    ) -> BridgeResult<Receipt>;
}
