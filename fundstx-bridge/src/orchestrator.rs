//! Bridge transfer orchestrator.
//!
//! Drives a [`TransferSession`] through
//! `WalletConnectRequired → Validating → StepPending(i) → StepConfirming(i) → Completed`,
//! one action per [`Orchestrator::advance`] call. Deposits run
//! `approve` then `depositToRemote` on the source chain; withdrawals run a
//! single `burn` on the destination chain. A failure at any step is
//! terminal and nothing is retried automatically.
//!
//! A session with a multi-step plan holds its signer from the first
//! broadcast until it reaches a terminal state, so another session for the
//! same signer cannot slip an `approve` between this session's `approve`
//! and `depositToRemote`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::abi::Operation;
use crate::client::{ChainClient, ChainSide, Identity};
use crate::codec::{self, EncodedRecipient};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::session::{FailureReason, SessionState, TransferSession};
use crate::types::{TransferDirection, TransferIntent};

/// Sequences transfer steps through the injected chain clients.
pub struct Orchestrator {
    config: BridgeConfig,
    source: Arc<dyn ChainClient>,
    destination: Arc<dyn ChainClient>,
    /// Serialises submissions per signing identity so nonces are not raced.
    identity_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Signer guards held by sessions partway through a multi-step plan.
    held: Mutex<HashMap<String, OwnedMutexGuard<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator with one client per chain.
    pub fn new(
        config: BridgeConfig,
        source: Arc<dyn ChainClient>,
        destination: Arc<dyn ChainClient>,
    ) -> Self {
        Self {
            config,
            source,
            destination,
            identity_locks: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Chain that signs every step of a direction.
    pub fn signing_side(direction: TransferDirection) -> ChainSide {
        match direction {
            TransferDirection::Deposit => ChainSide::Source,
            TransferDirection::Withdraw => ChainSide::Destination,
        }
    }

    fn client(&self, side: ChainSide) -> &Arc<dyn ChainClient> {
        match side {
            ChainSide::Source => &self.source,
            ChainSide::Destination => &self.destination,
        }
    }

    fn signer(&self, direction: TransferDirection) -> &Arc<dyn ChainClient> {
        self.client(Self::signing_side(direction))
    }

    /// Open a session for an intent. No I/O.
    pub fn submit(&self, intent: TransferIntent) -> TransferSession {
        let mut session = TransferSession::new(intent);
        tracing::info!(
            session_id = %session.id,
            direction = %session.intent.direction,
            amount = %session.intent.amount,
            destination = %session.intent.destination,
            "Transfer session opened"
        );
        self.leave_idle(&mut session);
        session
    }

    /// Perform exactly one action for the session's current state.
    /// Terminal sessions are returned unchanged.
    pub async fn advance(&self, mut session: TransferSession) -> TransferSession {
        match session.state {
            SessionState::Idle => self.leave_idle(&mut session),
            SessionState::WalletConnectRequired => self.connect_wallet(&mut session).await,
            SessionState::Validating => self.validate(&mut session),
            SessionState::StepPending(step) => self.submit_step(&mut session, step).await,
            SessionState::StepConfirming(step) => self.confirm_step(&mut session, step).await,
            SessionState::Completed | SessionState::Failed(_) | SessionState::Cancelled => {}
        }
        if session.is_terminal() {
            self.release(&session).await;
        }
        session
    }

    /// Advance until the session reaches a terminal state.
    pub async fn run_to_completion(&self, mut session: TransferSession) -> TransferSession {
        while !session.is_terminal() {
            session = self.advance(session).await;
        }
        session
    }

    /// Cancel a session that has not broadcast anything yet. Otherwise the
    /// session is left untouched and `NotCancellable` is returned.
    pub fn cancel(&self, session: &mut TransferSession) -> BridgeResult<()> {
        if !session.state.is_cancellable() {
            tracing::warn!(
                session_id = %session.id,
                state = %session.state,
                "Cancellation refused"
            );
            return Err(BridgeError::NotCancellable(session.state.to_string()));
        }
        self.transition(session, SessionState::Cancelled);
        Ok(())
    }

    fn leave_idle(&self, session: &mut TransferSession) {
        let next = if session.identity.is_some() {
            SessionState::Validating
        } else {
            SessionState::WalletConnectRequired
        };
        self.transition(session, next);
    }

    async fn connect_wallet(&self, session: &mut TransferSession) {
        let client = self.signer(session.intent.direction);
        match client.request_signing_identity().await {
            Ok(identity) => {
                tracing::info!(
                    session_id = %session.id,
                    chain = client.chain_name(),
                    identity = %identity,
                    "Wallet connected"
                );
                session.identity = Some(identity);
                self.transition(session, SessionState::Validating);
            }
            Err(err) => self.fail(session, err, FailureReason::UserRejected),
        }
    }

    fn validate(&self, session: &mut TransferSession) {
        match self.check_intent(&session.intent) {
            Ok(recipient) => {
                session.plan = build_plan(&self.config, &session.intent, recipient);
                session.recipient = Some(recipient);
                self.transition(session, SessionState::StepPending(0));
            }
            Err(err) => self.fail(session, err, FailureReason::InvalidAddress),
        }
    }

    /// Amount and destination checks. Returns the encoded recipient.
    fn check_intent(&self, intent: &TransferIntent) -> BridgeResult<EncodedRecipient> {
        if intent.amount == 0 {
            return Err(BridgeError::InvalidAmount(
                "amount must be greater than zero".into(),
            ));
        }
        if let Some(balance) = intent.declared_balance {
            if intent.amount > balance {
                return Err(BridgeError::InvalidAmount(format!(
                    "amount {} exceeds balance {}",
                    intent.amount, balance
                )));
            }
        }

        let expected = self.config.domain_for(intent.direction);
        if intent.domain != expected {
            return Err(BridgeError::UnsupportedDomain(intent.domain.as_u32()));
        }

        let recipient = codec::encode(&intent.destination, intent.domain)?;
        tracing::debug!(
            destination = %intent.destination,
            domain = %intent.domain,
            recipient = %recipient,
            "Encoded recipient"
        );
        Ok(recipient)
    }

    async fn submit_step(&self, session: &mut TransferSession, step: usize) {
        let Some(operation) = session.plan.get(step).cloned() else {
            let err = BridgeError::ChainError(format!("no operation for step {}", step));
            return self.fail(session, err, FailureReason::ChainError);
        };
        let Some(identity) = session.identity.clone() else {
            let err = BridgeError::UserRejected("no signing identity bound".into());
            return self.fail(session, err, FailureReason::UserRejected);
        };

        let client = self.signer(session.intent.direction);
        let result = if session.plan.len() > 1 {
            match self.hold_signer(&session.id, &identity).await {
                Ok(()) => client.submit_operation(&identity, &operation).await,
                Err(err) => Err(err),
            }
        } else {
            let lock = self.identity_lock(&identity).await;
            let result = {
                let _guard = lock.lock().await;
                client.submit_operation(&identity, &operation).await
            };
            drop(lock);
            self.prune_lock(&identity).await;
            result
        };

        match result {
            Ok(handle) => {
                tracing::info!(
                    session_id = %session.id,
                    step,
                    chain = client.chain_name(),
                    operation = %operation,
                    tx = %handle.tx_hash,
                    "Step broadcast"
                );
                session.step_handles.push(handle);
                self.transition(session, SessionState::StepConfirming(step));
            }
            Err(err) => self.fail(session, err, FailureReason::BroadcastError),
        }
    }

    async fn confirm_step(&self, session: &mut TransferSession, step: usize) {
        let Some(handle) = session.step_handles.get(step).cloned() else {
            let err = BridgeError::ChainError(format!("no handle for step {}", step));
            return self.fail(session, err, FailureReason::ChainError);
        };

        let client = self.signer(session.intent.direction);
        let timeout = self.config.confirmation_timeout();
        let wait = client.await_confirmation(&handle, timeout);
        let result = match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::ConfirmationTimeout(timeout.as_secs())),
        };

        match result {
            Ok(receipt) if receipt.is_success() => {
                tracing::info!(
                    session_id = %session.id,
                    step,
                    tx = %receipt.tx_hash,
                    block = ?receipt.block_height,
                    "Step confirmed"
                );
                let next = if step + 1 < session.plan.len() {
                    SessionState::StepPending(step + 1)
                } else {
                    SessionState::Completed
                };
                self.transition(session, next);
            }
            Ok(receipt) => {
                let err =
                    BridgeError::ChainError(format!("transaction {} reverted", receipt.tx_hash));
                self.fail(session, err, FailureReason::ChainError);
            }
            Err(err) => self.fail(session, err, FailureReason::ChainError),
        }
    }

    /// Drop the signer hold a session has, if any. Terminal sessions are
    /// released by [`Orchestrator::advance`]; call this for a session that is
    /// abandoned partway through its plan.
    pub async fn release(&self, session: &TransferSession) {
        let guard = self.held.lock().await.remove(&session.id);
        if guard.is_none() {
            return;
        }
        drop(guard);
        tracing::debug!(session_id = %session.id, "Signer released");
        if let Some(identity) = &session.identity {
            self.prune_lock(identity).await;
        }
    }

    /// Take the signer for the rest of the session's plan. Waiting for another
    /// session is bounded by the confirmation timeout.
    async fn hold_signer(&self, session_id: &str, identity: &Identity) -> BridgeResult<()> {
        if self.held.lock().await.contains_key(session_id) {
            return Ok(());
        }

        let lock = self.identity_lock(identity).await;
        let timeout = self.config.confirmation_timeout();
        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::debug!(
                    session_id,
                    identity = %identity,
                    "Signer busy, waiting for its current transfer"
                );
                match tokio::time::timeout(timeout, lock.lock_owned()).await {
                    Ok(guard) => guard,
                    Err(_) => {
                        self.prune_lock(identity).await;
                        return Err(BridgeError::BroadcastError(format!(
                            "signer {} busy with another transfer for {}s",
                            identity,
                            timeout.as_secs()
                        )));
                    }
                }
            }
        };
        self.held.lock().await.insert(session_id.to_string(), guard);
        Ok(())
    }

    async fn identity_lock(&self, identity: &Identity) -> Arc<Mutex<()>> {
        let mut locks = self.identity_locks.lock().await;
        locks.entry(identity.address.clone()).or_default().clone()
    }

    /// Remove an identity's lock once nothing else references it.
    async fn prune_lock(&self, identity: &Identity) {
        let mut locks = self.identity_locks.lock().await;
        if locks
            .get(&identity.address)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&identity.address);
        }
    }

    fn transition(&self, session: &mut TransferSession, next: SessionState) {
        let previous = session.state;
        session.set_state(next);
        tracing::info!(
            session_id = %session.id,
            from = %previous,
            state = %next,
            "Session transition"
        );
    }

    fn fail(&self, session: &mut TransferSession, err: BridgeError, fallback: FailureReason) {
        let reason = FailureReason::from_error(&err, fallback);
        tracing::warn!(
            session_id = %session.id,
            state = %session.state,
            reason = %reason,
            error = %err,
            "Transfer failed"
        );
        session.fail(reason, err);
    }
}

/// Ordered operations for an intent with an already encoded recipient.
pub fn build_plan(
    config: &BridgeConfig,
    intent: &TransferIntent,
    recipient: EncodedRecipient,
) -> Vec<Operation> {
    match intent.direction {
        TransferDirection::Deposit => vec![
            Operation::Approve {
                token: config.usdc_token,
                spender: config.xreserve,
                amount: intent.amount,
            },
            Operation::DepositToRemote {
                xreserve: config.xreserve,
                value: intent.amount,
                remote_domain: intent.domain,
                remote_recipient: recipient,
                local_token: config.usdc_token,
                max_fee: config.max_fee,
                hook_data: config.hook_data.clone(),
            },
        ],
        TransferDirection::Withdraw => vec![Operation::Burn {
            contract: config.usdcx_contract.clone(),
            amount: intent.amount,
            native_domain: intent.domain,
            native_recipient: recipient,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AccountReference;
    use crate::simulated::SimulatedChain;
    use crate::types::DomainId;

    const STACKS_RECIPIENT: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            BridgeConfig::testnet(),
            Arc::new(SimulatedChain::new("sepolia", "0x00000000000000000000000000000000000000aa")),
            Arc::new(SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT)),
        )
    }

    fn deposit(amount: u128) -> TransferIntent {
        TransferIntent::deposit(amount, AccountReference::parse_stacks(STACKS_RECIPIENT).unwrap())
    }

    #[test]
    fn test_submit_routes_on_identity() {
        let orch = orchestrator();
        let session = orch.submit(deposit(1));
        assert_eq!(session.state, SessionState::WalletConnectRequired);

        let session = orch.submit(deposit(1).with_source("0xabc"));
        assert_eq!(session.state, SessionState::Validating);
    }

    #[test]
    fn test_deposit_plan() {
        let config = BridgeConfig::testnet();
        let intent = deposit(2_500_000);
        let recipient = codec::encode(&intent.destination, intent.domain).unwrap();
        let plan = build_plan(&config, &intent, recipient);
        assert_eq!(plan.len(), intent.direction.step_count());
        assert!(matches!(
            &plan[0],
            Operation::Approve { spender, amount: 2_500_000, .. } if *spender == config.xreserve
        ));
        assert!(matches!(
            &plan[1],
            Operation::DepositToRemote { remote_domain, remote_recipient, .. }
                if *remote_domain == DomainId::STACKS && *remote_recipient == recipient
        ));
    }

    #[test]
    fn test_withdraw_plan() {
        let config = BridgeConfig::testnet();
        let destination = AccountReference::Raw([7u8; 20]);
        let intent = TransferIntent::withdraw(10, destination);
        let recipient = codec::encode(&destination, DomainId::ETHEREUM).unwrap();
        let plan = build_plan(&config, &intent, recipient);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].target(), config.usdcx_contract.to_string());
    }

    #[tokio::test]
    async fn test_validation_failures() {
        let orch = orchestrator();

        let session = orch.advance(orch.submit(deposit(0).with_source("0xabc"))).await;
        assert_eq!(session.failure(), Some(FailureReason::InvalidAmount));

        let wrong_family = TransferIntent::deposit(5, AccountReference::Raw([1u8; 20]))
            .with_source("0xabc");
        let session = orch.advance(orch.submit(wrong_family)).await;
        assert_eq!(session.failure(), Some(FailureReason::InvalidAddress));
        assert_eq!(session.last_error.as_ref().map(|e| e.kind()), Some("invalid_address"));

        let wrong_route = deposit(5).with_source("0xabc").with_domain(DomainId::ETHEREUM);
        let session = orch.advance(orch.submit(wrong_route)).await;
        assert_eq!(session.failure(), Some(FailureReason::InvalidAddress));
    }

    #[tokio::test]
    async fn test_terminal_sessions_are_unchanged() {
        let orch = orchestrator();
        let mut session = orch.submit(deposit(1));
        orch.cancel(&mut session).unwrap();
        let before = session.clone();
        let after = orch.advance(session).await;
        assert_eq!(after, before);
        assert_eq!(after.state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_locks_dropped_after_completion() {
        let orch = orchestrator();
        let session = orch.submit(deposit(1).with_source("0xabc"));
        let session = orch.run_to_completion(session).await;
        assert_eq!(session.state, SessionState::Completed);
        assert!(orch.held.lock().await.is_empty());
        assert!(orch.identity_locks.lock().await.is_empty());

        let withdraw = TransferIntent::withdraw(1, AccountReference::Raw([7u8; 20]))
            .with_source(STACKS_RECIPIENT);
        let session = orch.run_to_completion(orch.submit(withdraw)).await;
        assert_eq!(session.state, SessionState::Completed);
        assert!(orch.identity_locks.lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_signer_blocks_second_deposit() {
        let orch = orchestrator();
        let mut first = orch.submit(deposit(1).with_source("0xabc"));
        first = orch.advance(orch.advance(first).await).await;
        assert_eq!(first.state, SessionState::StepConfirming(0));

        let second = orch.advance(orch.submit(deposit(2).with_source("0xabc"))).await;
        let second = orch.advance(second).await;
        assert_eq!(second.failure(), Some(FailureReason::BroadcastError));
        assert!(second.step_handles.is_empty());

        orch.release(&first).await;
        assert!(orch.held.lock().await.is_empty());
        assert!(orch.identity_locks.lock().await.is_empty());
    }
}
