//! CLI error types and exit-code mapping
//!
//! Exit codes: 0 success, 1 generic failure, 2 configuration/identity
//! error, 3 payment failure, 4 counterparty failure.

use agentpay_broker::BrokerError;
use agentpay_clearing::ClearingError;
use agentpay_ens::EnsError;
use agentpay_wallet::WalletError;
use thiserror::Error;

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors, classified by exit code
#[derive(Error, Debug)]
pub enum CliError {
    /// Identity key missing or invalid
    #[error("{0}")]
    Identity(#[from] WalletError),

    /// Environment or argument configuration problem
    #[error("configuration error: {0}")]
    Config(String),

    /// Payment could not be settled
    #[error("payment failed: {0}")]
    Payment(#[from] ClearingError),

    /// The counterparty failed us: discovery, billing, or the worker itself
    #[error("counterparty failure: {0}")]
    Counterparty(String),

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CliError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Identity(_) | CliError::Config(_) => 2,
            CliError::Payment(_) => 3,
            CliError::Counterparty(_) => 4,
            CliError::Other(_) => 1,
        }
    }
}

impl From<EnsError> for CliError {
    fn from(e: EnsError) -> Self {
        CliError::Counterparty(e.to_string())
    }
}

impl From<BrokerError> for CliError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Payment(e) => CliError::Payment(e),
            BrokerError::Resolve(e) => CliError::Counterparty(e.to_string()),
            BrokerError::WorkerFailure { .. }
            | BrokerError::BillRejected(_)
            | BrokerError::Http(_) => CliError::Counterparty(e.to_string()),
            other => CliError::Other(other.into()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Other(e.into())
    }
}
