//! In-memory chain client.
//!
//! [`SimulatedChain`] accepts every operation by default and confirms it
//! immediately. Outcomes can be scripted per submission index to exercise
//! rejection, broadcast failure, revert and stalled confirmation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::abi::Operation;
use crate::client::{ChainClient, Identity, OperationHandle, Receipt, ReceiptStatus};
use crate::error::{BridgeError, BridgeResult};
use crate::session::unix_now;

/// Scripted result of `submit_operation`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accept,
    /// The signer declines.
    Reject,
    /// The node refuses the transaction.
    BroadcastFail(String),
}

/// Scripted result of `await_confirmation`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirm,
    /// Included with a failed execution status.
    Revert,
    /// Never resolves. The caller's timeout decides.
    NeverConfirm,
    /// The node reports an error.
    ChainFailure(String),
}

#[derive(Default)]
struct SimState {
    attempts: usize,
    submitted: Vec<(Identity, Operation)>,
    index_by_hash: HashMap<String, usize>,
    block_height: u64,
}

/// Scriptable in-memory [`ChainClient`].
pub struct SimulatedChain {
    name: String,
    identity: Option<Identity>,
    submit_script: HashMap<usize, SubmitOutcome>,
    confirm_script: HashMap<usize, ConfirmOutcome>,
    confirmation_delay: Option<Duration>,
    state: Mutex<SimState>,
}

impl SimulatedChain {
    /// Chain whose wallet connects as `identity`.
    pub fn new(name: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: Some(Identity::new(identity)),
            submit_script: HashMap::new(),
            confirm_script: HashMap::new(),
            confirmation_delay: None,
            state: Mutex::new(SimState::default()),
        }
    }

    /// The wallet declines every connection request.
    pub fn rejecting_connection(mut self) -> Self {
        self.identity = None;
        self
    }

    /// Script the outcome of the `index`-th submission (zero-based).
    pub fn on_submit(mut self, index: usize, outcome: SubmitOutcome) -> Self {
        self.submit_script.insert(index, outcome);
        self
    }

    /// Script the confirmation of the `index`-th accepted submission.
    pub fn on_confirm(mut self, index: usize, outcome: ConfirmOutcome) -> Self {
        self.confirm_script.insert(index, outcome);
        self
    }

    /// Delay every confirmation.
    pub fn with_confirmation_delay(mut self, delay: Duration) -> Self {
        self.confirmation_delay = Some(delay);
        self
    }

    /// Accepted operations in submission order.
    pub async fn submitted_operations(&self) -> Vec<Operation> {
        let state = self.state.lock().await;
        state.submitted.iter().map(|(_, op)| op.clone()).collect()
    }

    /// Identities that signed accepted operations, in submission order.
    pub async fn signers(&self) -> Vec<Identity> {
        let state = self.state.lock().await;
        state.submitted.iter().map(|(id, _)| id.clone()).collect()
    }

    fn tx_hash(&self, index: usize, identity: &Identity, operation: &Operation) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update((index as u64).to_be_bytes());
        hasher.update(identity.address.as_bytes());
        hasher.update(operation.to_string().as_bytes());
        if let Some(calldata) = operation.evm_calldata() {
            hasher.update(&calldata);
        }
        format!("0x{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl ChainClient for SimulatedChain {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn request_signing_identity(&self) -> BridgeResult<Identity> {
        self.identity.clone().ok_or_else(|| {
            BridgeError::UserRejected(format!("{} wallet connection declined", self.name))
        })
    }

    async fn submit_operation(
        &self,
        identity: &Identity,
        operation: &Operation,
    ) -> BridgeResult<OperationHandle> {
        let mut state = self.state.lock().await;
        // Rejected and failed attempts still consume a submission index.
        let attempt = state.attempts;
        state.attempts += 1;
        let outcome = self
            .submit_script
            .get(&attempt)
            .cloned()
            .unwrap_or(SubmitOutcome::Accept);

        match outcome {
            SubmitOutcome::Accept => {}
            SubmitOutcome::Reject => {
                return Err(BridgeError::UserRejected(format!(
                    "signer declined {}",
                    operation
                )))
            }
            SubmitOutcome::BroadcastFail(msg) => return Err(BridgeError::BroadcastError(msg)),
        }

        let index = state.submitted.len();
        let tx_hash = self.tx_hash(index, identity, operation);
        debug!(chain = %self.name, index, tx = %tx_hash, "simulated submission");
        state.submitted.push((identity.clone(), operation.clone()));
        state.index_by_hash.insert(tx_hash.clone(), index);

        Ok(OperationHandle {
            tx_hash,
            submitted_at: unix_now(),
        })
    }

    async fn await_confirmation(
        &self,
        handle: &OperationHandle,
        _timeout: Duration,
    ) -> BridgeResult<Receipt> {
        let index = {
            let state = self.state.lock().await;
            *state.index_by_hash.get(&handle.tx_hash).ok_or_else(|| {
                BridgeError::ChainError(format!("unknown transaction {}", handle.tx_hash))
            })?
        };

        if let Some(delay) = self.confirmation_delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .confirm_script
            .get(&index)
            .cloned()
            .unwrap_or(ConfirmOutcome::Confirm);

        let status = match outcome {
            ConfirmOutcome::Confirm => ReceiptStatus::Success,
            ConfirmOutcome::Revert => ReceiptStatus::Reverted,
            ConfirmOutcome::NeverConfirm => std::future::pending().await,
            ConfirmOutcome::ChainFailure(msg) => return Err(BridgeError::ChainError(msg)),
        };

        let mut state = self.state.lock().await;
        state.block_height += 1;
        Ok(Receipt {
            tx_hash: handle.tx_hash.clone(),
            block_height: Some(state.block_height),
            status,
        })
    }
}
