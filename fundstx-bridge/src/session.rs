//! Transfer session state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::abi::Operation;
use crate::client::{Identity, OperationHandle};
use crate::codec::EncodedRecipient;
use crate::error::BridgeError;
use crate::types::TransferIntent;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Why a session ended in `Failed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Amount was zero or above the declared balance
    InvalidAmount,
    /// Destination could not be encoded for the route's domain
    InvalidAddress,
    /// Wallet connection or signature was refused
    UserRejected,
    /// A step could not be broadcast
    BroadcastError,
    /// A step was not confirmed within the configured bound
    ConfirmationTimeout,
    /// A step reverted or the node reported a failure
    ChainError,
}

impl FailureReason {
    /// Reason for an error, or `fallback` for errors that have no reason of
    /// their own.
    pub fn from_error(err: &BridgeError, fallback: FailureReason) -> Self {
        match err {
            BridgeError::InvalidAmount(_) => Self::InvalidAmount,
            BridgeError::InvalidAddress(_) | BridgeError::UnsupportedDomain(_) => {
                Self::InvalidAddress
            }
            BridgeError::UserRejected(_) => Self::UserRejected,
            BridgeError::BroadcastError(_) => Self::BroadcastError,
            BridgeError::ConfirmationTimeout(_) => Self::ConfirmationTimeout,
            BridgeError::ChainError(_) => Self::ChainError,
            BridgeError::NotCancellable(_)
            | BridgeError::Config(_)
            | BridgeError::Serialization(_) => fallback,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidAmount => "invalid_amount",
            Self::InvalidAddress => "invalid_address",
            Self::UserRejected => "user_rejected",
            Self::BroadcastError => "broadcast_error",
            Self::ConfirmationTimeout => "confirmation_timeout",
            Self::ChainError => "chain_error",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state. Steps are indexed from zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    /// Opened, nothing done yet
    Idle,
    /// Waiting for a signing identity on the signing chain
    WalletConnectRequired,
    /// Checking the amount and encoding the recipient
    Validating,
    /// Step ready to be broadcast
    StepPending(usize),
    /// Step broadcast, waiting for its receipt
    StepConfirming(usize),
    /// Every step confirmed
    Completed,
    /// Stopped on an error
    Failed(FailureReason),
    /// Cancelled before anything was broadcast
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    /// Cancellation is only possible before anything was broadcast.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::WalletConnectRequired | Self::Validating
        )
    }

    /// Short label without step index or reason.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WalletConnectRequired => "wallet_connect_required",
            Self::Validating => "validating",
            Self::StepPending(_) => "step_pending",
            Self::StepConfirming(_) => "step_confirming",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StepPending(i) | Self::StepConfirming(i) => write!(f, "{}({})", self.label(), i),
            Self::Failed(reason) => write!(f, "failed({})", reason),
            other => f.write_str(other.label()),
        }
    }
}

/// One transfer in flight.
///
/// A session has a single driver: it is moved into
/// [`Orchestrator::advance`](crate::orchestrator::Orchestrator::advance) and
/// handed back after each step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSession {
    /// Hex session id.
    pub id: String,
    /// What the caller asked for.
    pub intent: TransferIntent,
    /// Current position in the state machine.
    pub state: SessionState,
    /// Signing identity, once bound.
    pub identity: Option<Identity>,
    /// Encoded destination, once validated.
    pub recipient: Option<EncodedRecipient>,
    /// Ordered operations, once validated.
    pub plan: Vec<Operation>,
    /// Handles of broadcast steps, in step order.
    pub step_handles: Vec<OperationHandle>,
    /// Error that moved the session to `Failed`.
    pub last_error: Option<BridgeError>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl TransferSession {
    /// New session in `Idle`.
    pub fn new(intent: TransferIntent) -> Self {
        let now = unix_now();
        Self {
            id: session_id(&intent, now),
            identity: intent.source_account.as_deref().map(Identity::new),
            intent,
            state: SessionState::Idle,
            recipient: None,
            plan: Vec::new(),
            step_handles: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Transaction hashes of broadcast steps, in step order.
    pub fn step_hashes(&self) -> Vec<&str> {
        self.step_handles.iter().map(|h| h.tx_hash.as_str()).collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Failure reason, if the session failed.
    pub fn failure(&self) -> Option<FailureReason> {
        match self.state {
            SessionState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.updated_at = unix_now();
    }

    pub(crate) fn fail(&mut self, reason: FailureReason, err: BridgeError) {
        self.last_error = Some(err);
        self.set_state(SessionState::Failed(reason));
    }
}

fn session_id(intent: &TransferIntent, now: u64) -> String {
    let nonce = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut hasher = Sha256::new();
    hasher.update(now.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(intent.direction.to_string().as_bytes());
    hasher.update(intent.amount.to_be_bytes());
    hasher.update(intent.destination.to_string().as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
