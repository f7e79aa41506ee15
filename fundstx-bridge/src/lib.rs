//! fundstx-bridge
//!
//! Cross-chain recipient codec and USDC / USDCx transfer orchestration
//! between Ethereum (Circle xReserve) and Stacks (USDCx).
//!
//! # Overview
//!
//! Two pieces carry the protocol logic:
//!
//! 1. **Address codec** ([`codec`]): packs a chain-native account into the
//!    fixed 32-byte recipient field the bridge contracts carry, and back.
//! 2. **Transfer orchestrator** ([`orchestrator`]): an explicit state
//!    machine that sequences `approve → depositToRemote` (deposit) or
//!    `burn` (withdraw) through injected [`ChainClient`]s.
//!
//! # Flow
//!
//! ```text
//!  TransferIntent ──► submit ──► WalletConnectRequired ──► Validating
//!                                                              │
//!                                         codec::encode ◄──────┤
//!                                                              ▼
//!                        ┌──────── StepPending(i) ◄──────────────┐
//!                        ▼                                        │
//!             ChainClient::submit_operation                       │
//!                        │                                        │
//!                        ▼                                        │
//!                 StepConfirming(i) ── more steps ────────────────┘
//!                        │
//!                        ▼
//!                    Completed          (any error ──► Failed(reason))
//! ```
//!
//! # Recipient layouts
//!
//! | Domain        | Family | Layout                                   |
//! |---------------|--------|------------------------------------------|
//! | Stacks 10003  | hashed | `[0; 11] ‖ version ‖ hash160`            |
//! | Ethereum 0    | raw    | `[0; 12] ‖ account`                      |

pub mod abi;
pub mod address;
pub mod amount;
pub mod c32;
pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod session;
pub mod simulated;
pub mod types;

pub use abi::{ContractPrincipal, FunctionDescriptor, Operation};
pub use address::{AccountReference, AddressFamily};
pub use amount::{format_units, parse_units, USDC_DECIMALS};
pub use client::{ChainClient, ChainSide, Identity, OperationHandle, Receipt, ReceiptStatus};
pub use codec::{decode, encode, encode_address, EncodedRecipient};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, RetryClass};
pub use orchestrator::Orchestrator;
pub use session::{FailureReason, SessionState, TransferSession};
pub use simulated::{ConfirmOutcome, SimulatedChain, SubmitOutcome};
pub use types::{DomainId, TransferDirection, TransferIntent};

/// Rail identifier for the USDC / USDCx bridge.
pub const RAIL_ID_BRIDGE: &str = "FUNDSTX_USDCX_BRIDGE";

/// Version of the bridge crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
