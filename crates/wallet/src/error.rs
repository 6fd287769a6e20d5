//! Error types for identity handling

use thiserror::Error;

/// Result type alias for wallet operations
pub type Result<T> = std::result::Result<T, WalletError>;

/// Errors raised while loading or using the identity key
#[derive(Debug, Error)]
pub enum WalletError {
    /// The identity key is not configured or not readable
    #[error("identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The configured key material is malformed
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// A signing operation failed
    #[error("signing failed: {0}")]
    Signing(String),
}
