//! Error types for clearing-network operations

use agentpay_wallet::WalletError;
use thiserror::Error;

/// Result type alias for clearing operations
pub type Result<T> = std::result::Result<T, ClearingError>;

/// Errors that can occur talking to the clearing network or the settlement
/// chain
#[derive(Debug, Error)]
pub enum ClearingError {
    /// The auth handshake was rejected
    #[error("clearing auth rejected: {0}")]
    AuthRejected(String),

    /// A logical call exceeded its deadline; the socket has been closed
    #[error("clearing call timed out: {0}")]
    Timeout(String),

    /// The server violated the framing contract
    #[error("clearing protocol error: {0}")]
    Protocol(String),

    /// The server answered with an error frame
    #[error("clearing server error: {0}")]
    Server(String),

    /// Websocket transport failure
    #[error("clearing transport error: {0}")]
    Transport(String),

    /// Transfer attempted while the channel still holds an on-chain balance
    #[error("channel {channel_id} holds on-chain balance {amount}; transfer needs zero")]
    ChannelBalanceNotZero {
        /// The offending channel
        channel_id: String,
        /// Its current on-chain balance in asset units
        amount: u64,
    },

    /// A settlement-chain transaction or read failed
    #[error("on-chain operation failed: {0}")]
    OnChain(String),

    /// Identity/session-key signing failed
    #[error(transparent)]
    Wallet(#[from] WalletError),

    /// Frame (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session was shut down while a call was pending
    #[error("operation cancelled")]
    Cancelled,
}

impl ClearingError {
    /// Whether the orchestrator may retry the failed step.
    ///
    /// A [`ClearingError::Server`] rejection is a verdict, not a glitch —
    /// resubmitting a version-gapped state or a malformed payload gets the
    /// same answer, so those surface immediately.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClearingError::AuthRejected(_)
                | ClearingError::Timeout(_)
                | ClearingError::Protocol(_)
                | ClearingError::Transport(_)
        )
    }
}
