//! Error types for name resolution

use thiserror::Error;

/// Result type alias for resolver operations
pub type Result<T> = std::result::Result<T, EnsError>;

/// Errors raised while resolving an agent name
#[derive(Debug, Error)]
pub enum EnsError {
    /// The name has no resolver or no address on the name service
    #[error("name not found: {0}")]
    NameNotFound(String),

    /// The name exists but a required record is absent
    #[error("{name} has no {record} record")]
    RecordMissing {
        /// The name that was looked up
        name: String,
        /// The missing record key
        record: String,
    },

    /// A record was present but unparseable
    #[error("invalid {record} record for {name}: {reason}")]
    InvalidRecord {
        /// The name that was looked up
        name: String,
        /// The offending record key
        record: String,
        /// Why it was rejected
        reason: String,
    },

    /// The name-service RPC failed
    #[error("name service rpc error: {0}")]
    Rpc(String),
}
