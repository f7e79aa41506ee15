//! End-to-end transfer sessions against simulated chains.

use std::sync::Arc;
use std::time::Duration;

use fundstx_bridge::{
    codec, AccountReference, BridgeConfig, BridgeError, ConfirmOutcome, DomainId,
    FailureReason, Operation, Orchestrator, RetryClass, SessionState, SimulatedChain,
    SubmitOutcome, TransferDirection, TransferIntent, TransferSession,
};

const STACKS_RECIPIENT: &str = "ST1PQHQKV0RJXZFY1DGX8MNSNYVE3VGZJSRTPGZGM";
const EVM_RECIPIENT: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
const EVM_SIGNER: &str = "0x00000000000000000000000000000000000000aa";

struct Harness {
    orchestrator: Orchestrator,
    source: Arc<SimulatedChain>,
    destination: Arc<SimulatedChain>,
}

fn harness_with(source: SimulatedChain, destination: SimulatedChain) -> Harness {
    let source = Arc::new(source);
    let destination = Arc::new(destination);
    Harness {
        orchestrator: Orchestrator::new(
            BridgeConfig::testnet(),
            source.clone(),
            destination.clone(),
        ),
        source,
        destination,
    }
}

fn harness() -> Harness {
    harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    )
}

fn deposit_intent() -> TransferIntent {
    TransferIntent::from_decimal(TransferDirection::Deposit, "1.5", 6, STACKS_RECIPIENT).unwrap()
}

/// Advance to a terminal state, recording every state visited.
async fn drive(orchestrator: &Orchestrator, mut session: TransferSession) -> Vec<SessionState> {
    let mut states = vec![session.state];
    while !session.is_terminal() {
        session = orchestrator.advance(session).await;
        states.push(session.state);
    }
    states
}

#[tokio::test]
async fn test_deposit_runs_approve_then_deposit() {
    let h = harness();
    let session = h.orchestrator.submit(deposit_intent());

    let states = drive(&h.orchestrator, session).await;
    assert_eq!(
        states,
        vec![
            SessionState::WalletConnectRequired,
            SessionState::Validating,
            SessionState::StepPending(0),
            SessionState::StepConfirming(0),
            SessionState::StepPending(1),
            SessionState::StepConfirming(1),
            SessionState::Completed,
        ]
    );

    let ops = h.source.submitted_operations().await;
    assert_eq!(ops.len(), 2);
    let config = h.orchestrator.config();
    match &ops[0] {
        Operation::Approve { token, spender, amount } => {
            assert_eq!(*token, config.usdc_token);
            assert_eq!(*spender, config.xreserve);
            assert_eq!(*amount, 1_500_000);
        }
        other => panic!("expected approve first, got {other}"),
    }
    match &ops[1] {
        Operation::DepositToRemote {
            value,
            remote_domain,
            remote_recipient,
            ..
        } => {
            assert_eq!(*value, 1_500_000);
            assert_eq!(*remote_domain, DomainId::STACKS);
            assert_eq!(
                *remote_recipient,
                codec::encode_address(STACKS_RECIPIENT, DomainId::STACKS).unwrap()
            );
        }
        other => panic!("expected deposit second, got {other}"),
    }
    assert!(h.destination.submitted_operations().await.is_empty());
}

#[tokio::test]
async fn test_completed_session_records_hashes() {
    let h = harness();
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent().with_source(EVM_SIGNER)))
        .await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.step_hashes().len(), 2);
    assert!(session.last_error.is_none());
    assert!(session.recipient.is_some());
    let link = h
        .orchestrator
        .config()
        .explorer_tx_url(TransferDirection::Deposit, session.step_hashes()[1]);
    assert!(link.starts_with("https://sepolia.etherscan.io/tx/0x"));
}

#[tokio::test]
async fn test_withdraw_is_a_single_burn() {
    let h = harness();
    let intent =
        TransferIntent::from_decimal(TransferDirection::Withdraw, "2", 6, EVM_RECIPIENT).unwrap();
    let session = h.orchestrator.submit(intent);

    let states = drive(&h.orchestrator, session).await;
    assert_eq!(
        states,
        vec![
            SessionState::WalletConnectRequired,
            SessionState::Validating,
            SessionState::StepPending(0),
            SessionState::StepConfirming(0),
            SessionState::Completed,
        ]
    );

    let ops = h.destination.submitted_operations().await;
    assert_eq!(ops.len(), 1);
    match &ops[0] {
        Operation::Burn {
            amount,
            native_domain,
            native_recipient,
            ..
        } => {
            assert_eq!(*amount, 2_000_000);
            assert_eq!(*native_domain, DomainId::ETHEREUM);
            assert_eq!(
                native_recipient.to_hex(),
                "0x0000000000000000000000005aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
            );
        }
        other => panic!("expected burn, got {other}"),
    }
    assert!(h.source.submitted_operations().await.is_empty());
    assert_eq!(
        h.destination.signers().await[0].address,
        STACKS_RECIPIENT,
        "withdrawals are signed by the Stacks wallet"
    );
}

#[tokio::test(start_paused = true)]
async fn test_approve_timeout_stops_before_deposit() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER).on_confirm(0, ConfirmOutcome::NeverConfirm),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    assert_eq!(
        session.state,
        SessionState::Failed(FailureReason::ConfirmationTimeout)
    );
    assert_eq!(session.last_error, Some(BridgeError::ConfirmationTimeout(300)));
    assert_eq!(
        session.last_error.as_ref().map(|e| e.retry_class()),
        Some(RetryClass::CheckChainFirst)
    );
    let ops = h.source.submitted_operations().await;
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], Operation::Approve { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_confirmation_within_bound_succeeds() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER).with_confirmation_delay(Duration::from_secs(120)),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;
    assert_eq!(session.state, SessionState::Completed);
}

#[tokio::test]
async fn test_cancel_after_broadcast_is_rejected() {
    let h = harness();
    let mut session = h.orchestrator.submit(deposit_intent().with_source(EVM_SIGNER));
    while session.state != SessionState::StepConfirming(0) {
        session = h.orchestrator.advance(session).await;
    }

    let before = session.clone();
    let err = h.orchestrator.cancel(&mut session).unwrap_err();
    assert!(matches!(err, BridgeError::NotCancellable(_)));
    assert_eq!(session, before);

    let session = h.orchestrator.run_to_completion(session).await;
    assert_eq!(session.state, SessionState::Completed);
}

#[tokio::test]
async fn test_cancel_before_broadcast() {
    let h = harness();
    let mut session = h.orchestrator.submit(deposit_intent());
    session = h.orchestrator.advance(session).await;
    assert_eq!(session.state, SessionState::Validating);

    h.orchestrator.cancel(&mut session).unwrap();
    assert_eq!(session.state, SessionState::Cancelled);
    let session = h.orchestrator.run_to_completion(session).await;
    assert_eq!(session.state, SessionState::Cancelled);
    assert!(h.source.submitted_operations().await.is_empty());
}

#[tokio::test]
async fn test_wallet_connection_rejected() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER).rejecting_connection(),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::UserRejected));
    assert!(session.last_error.as_ref().unwrap().is_retryable());
    assert!(session.identity.is_none());
}

#[tokio::test]
async fn test_signer_rejects_deposit() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER).on_submit(1, SubmitOutcome::Reject),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::UserRejected));
    assert_eq!(session.step_hashes().len(), 1);
}

#[tokio::test]
async fn test_broadcast_failure() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER)
            .on_submit(0, SubmitOutcome::BroadcastFail("nonce too low".into())),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::BroadcastError));
    assert_eq!(
        session.last_error,
        Some(BridgeError::BroadcastError("nonce too low".into()))
    );
}

#[tokio::test]
async fn test_reverted_receipt_fails_with_chain_error() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT)
            .on_confirm(0, ConfirmOutcome::Revert),
    );
    let intent =
        TransferIntent::from_decimal(TransferDirection::Withdraw, "1", 6, EVM_RECIPIENT).unwrap();
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(intent))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::ChainError));
    let err = session.last_error.unwrap();
    assert!(err.to_string().contains("reverted"));
    assert_eq!(err.retry_class(), RetryClass::DoNotRetry);
}

#[tokio::test]
async fn test_node_failure_while_confirming() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER)
            .on_confirm(1, ConfirmOutcome::ChainFailure("execution reverted: paused".into())),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::ChainError));
    assert_eq!(h.source.submitted_operations().await.len(), 2);
}

#[tokio::test]
async fn test_declared_balance_exceeded() {
    let h = harness();
    let intent = deposit_intent().with_declared_balance(1_000_000);
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(intent))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::InvalidAmount));
    assert!(h.source.submitted_operations().await.is_empty());
}

#[tokio::test]
async fn test_recipient_family_mismatch() {
    let h = harness();
    let intent = TransferIntent::deposit(
        1_000_000,
        AccountReference::parse_evm(EVM_RECIPIENT).unwrap(),
    );
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(intent))
        .await;

    assert_eq!(session.failure(), Some(FailureReason::InvalidAddress));
    assert_eq!(
        session.last_error.map(|e| e.retry_class()),
        Some(RetryClass::FixInput)
    );
}

#[tokio::test]
async fn test_concurrent_sessions_share_a_signer() {
    let h = harness_with(
        SimulatedChain::new("sepolia", EVM_SIGNER)
            .with_confirmation_delay(Duration::from_millis(5)),
        SimulatedChain::new("stacks-testnet", STACKS_RECIPIENT),
    );
    let a = h.orchestrator.submit(deposit_intent().with_source(EVM_SIGNER));
    let b = h.orchestrator.submit(
        TransferIntent::from_decimal(TransferDirection::Deposit, "2", 6, STACKS_RECIPIENT)
            .unwrap()
            .with_source(EVM_SIGNER),
    );
    assert_ne!(a.id, b.id);

    let (a, b) = tokio::join!(
        h.orchestrator.run_to_completion(a),
        h.orchestrator.run_to_completion(b)
    );
    assert_eq!(a.state, SessionState::Completed);
    assert_eq!(b.state, SessionState::Completed);

    let ops = h.source.submitted_operations().await;
    assert_eq!(ops.len(), 4);
    for pair in ops.chunks(2) {
        match pair {
            [Operation::Approve { amount, .. }, Operation::DepositToRemote { value, .. }] => {
                assert_eq!(amount, value)
            }
            other => panic!("approve not followed by its own deposit: {:?}", other),
        }
    }
    assert_ne!(a.step_hashes(), b.step_hashes());
}

#[tokio::test]
async fn test_session_serializes() {
    let h = harness();
    let session = h
        .orchestrator
        .run_to_completion(h.orchestrator.submit(deposit_intent()))
        .await;

    let json = serde_json::to_string(&session).unwrap();
    let back: TransferSession = serde_json::from_str(&json).unwrap();
    assert_eq!(back, session);
}
