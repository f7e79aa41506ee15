//! Error types for bridge operations.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while encoding recipients or driving a transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum BridgeError {
    /// Malformed or unparseable account reference.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Non-positive, unparseable or over-precise amount.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Domain id with no known address family.
    #[error("Unsupported domain: {0}")]
    UnsupportedDomain(u32),

    /// The signer declined the request.
    #[error("User rejected request: {0}")]
    UserRejected(String),

    /// The node or wallet refused the submission.
    #[error("Broadcast failed: {0}")]
    BroadcastError(String),

    /// No confirmation observed within the bound.
    #[error("Confirmation timed out after {0} seconds")]
    ConfirmationTimeout(u64),

    /// Execution reverted or the chain reported a failure.
    #[error("Chain error: {0}")]
    ChainError(String),

    /// Cancellation requested after an operation was broadcast.
    #[error("Session cannot be cancelled in state {0}")]
    NotCancellable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// How a caller may react to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryClass {
    /// Input must be corrected before trying again.
    FixInput,
    /// A fresh session may be started right away.
    SafeToRetry,
    /// Outcome is ambiguous; query chain state before resubmitting.
    CheckChainFirst,
    /// Retrying the same intent will fail the same way.
    DoNotRetry,
}

impl BridgeError {
    /// Classify the error for retry decisions.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::InvalidAddress(_)
            | Self::InvalidAmount(_)
            | Self::UnsupportedDomain(_)
            | Self::Config(_)
            | Self::Serialization(_) => RetryClass::FixInput,
            Self::UserRejected(_) | Self::BroadcastError(_) => RetryClass::SafeToRetry,
            Self::ConfirmationTimeout(_) => RetryClass::CheckChainFirst,
            Self::ChainError(_) | Self::NotCancellable(_) => RetryClass::DoNotRetry,
        }
    }

    /// Whether a fresh attempt can be made without consulting the chain.
    pub fn is_retryable(&self) -> bool {
        self.retry_class() == RetryClass::SafeToRetry
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::UnsupportedDomain(_) => "unsupported_domain",
            Self::UserRejected(_) => "user_rejected",
            Self::BroadcastError(_) => "broadcast_error",
            Self::ConfirmationTimeout(_) => "confirmation_timeout",
            Self::ChainError(_) => "chain_error",
            Self::NotCancellable(_) => "not_cancellable",
            Self::Config(_) => "config",
            Self::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<hex::FromHexError> for BridgeError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidAddress(err.to_string())
    }
}

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
