//! Error types for the broker

use agentpay_clearing::ClearingError;
use agentpay_ens::EnsError;
use agentpay_protocol::ProtocolError;
use thiserror::Error;

/// Result type alias for broker operations
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors raised on the hire path or inside the worker server
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Worker discovery failed
    #[error(transparent)]
    Resolve(#[from] EnsError),

    /// Payment could not be driven to a proof
    #[error(transparent)]
    Payment(#[from] ClearingError),

    /// A wire body failed to parse
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// HTTP transport failure talking to the worker
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON body (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The worker's bill was unacceptable (wrong recipient, expired on
    /// arrival)
    #[error("bill rejected: {0}")]
    BillRejected(String),

    /// The worker answered with a failure status
    #[error("worker returned {status}: {reason}")]
    WorkerFailure {
        /// HTTP status the worker answered with
        status: u16,
        /// Machine-readable reason from the body, when present
        reason: String,
    },
}
