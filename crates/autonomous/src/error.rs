//! Error types for feed access

use thiserror::Error;

/// Result type alias for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors raised while reading or writing the feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed endpoint could not be reached
    #[error("feed http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The feed answered with an unparseable body
    #[error("feed returned an invalid body: {0}")]
    InvalidBody(String),
}
