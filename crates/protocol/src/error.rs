//! Error types for protocol parsing

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while parsing wire bodies and proofs
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON serialization error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A payment-proof reference did not match any known shape
    #[error("invalid proof reference: {0}")]
    InvalidProofReference(String),

    /// A field failed validation
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Field name as it appears on the wire
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
