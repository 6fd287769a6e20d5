//! Clearing-network client and payment orchestration
//!
//! One authenticated websocket session per logical operation, two cooperative
//! settlement paths over it, and an orchestrator that drives either path to a
//! verifiable payment proof.
//!
//! # Paths
//!
//! ```text
//! channel path                       app-session path
//! ------------                       ----------------
//! ensure channel (on-chain create)   create_app_session (quorum 1 or 2)
//! transfer (off-chain, unified       submit_app_state v+1
//!   balance)                           (both parties for quorum 2)
//! close_channel (on-chain)           close_app_session
//!   -> settlement tx hash              -> session:<id>:version:<n>
//! ```
//!
//! Every outbound frame is signed by an ephemeral session key authorized
//! during the auth handshake; `auth_verify` itself carries an EIP-712
//! signature from the identity key.

mod app_session;
mod channel;
mod error;
mod frame;
mod orchestrator;
mod session;
mod settlement;
mod types;

pub use app_session::{AppSession, AppSessionPath, SubmitOutcome};
pub use channel::ChannelPath;
pub use error::{ClearingError, Result};
pub use frame::{is_quorum_pending, RequestFrame, ServerFrame};
pub use orchestrator::{Orchestrator, PaymentPath};
pub use session::{ClearingConfig, ClearingSession};
pub use settlement::{SettlementClient, SettlementConfig};
pub use types::{
    Allocation, AppSessionInfo, ChannelSnapshot, CreateChannelReply, LedgerBalance,
    SessionDefinition,
};
