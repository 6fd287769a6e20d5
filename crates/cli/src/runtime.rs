//! Process-wide runtime configuration
//!
//! Everything environment-derived is read exactly once here and threaded
//! through explicitly; no module below the CLI touches the environment.
//!
//! Recognized variables:
//! - `CLIENT_PRIVATE_KEY` — identity key
//! - `AGENTPAY_ENS_NAME` — self-name override
//! - `AGENTPAY_ENDPOINT` — self-endpoint override
//! - `AGENTPAY_DEMO_FEED_URL` — feed endpoint
//! - `AGENTPAY_PAYMENT_METHOD` — `channel` | `app_session`
//! - `AGENTPAY_STATUS_FILE` — status document path
//! - `AGENTPAY_CLEARING_URL` — clearing websocket override
//! - `RPC_URL` — settlement-chain RPC
//! - `WORKER_PRIVATE_KEY`, `WORKER_ADDRESS` — counterparty in demos

use crate::error::{CliError, CliResult};
use agentpay_clearing::{ClearingConfig, Orchestrator, PaymentPath, SettlementConfig};
use agentpay_ens::NameResolver;
use agentpay_wallet::AgentWallet;
use alloy::primitives::Address;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Default feed endpoint for local demos
const DEFAULT_FEED_URL: &str = "http://127.0.0.1:8765";

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Everything a command needs, constructed once at startup
pub struct Runtime {
    /// The process identity
    pub wallet: AgentWallet,
    /// Self-endpoint override for provisioning/setup output
    pub endpoint: Option<String>,
    /// Feed endpoint for the autonomous commands
    pub feed_url: String,
    /// Which settlement path hires drive
    pub payment_path: PaymentPath,
    /// Status document path, when recording is enabled
    pub status_file: Option<PathBuf>,
    /// Clearing-network connection settings
    pub clearing: ClearingConfig,
    /// Settlement-chain settings
    pub settlement: SettlementConfig,
    /// Counterparty address for endpoint hires in demos
    pub worker_address: Option<Address>,
}

impl Runtime {
    /// Read the environment and load the identity
    pub fn from_env() -> CliResult<Self> {
        let mut wallet = AgentWallet::from_env()?;
        if let Some(name) = env_var("AGENTPAY_ENS_NAME") {
            wallet = wallet.with_name(name);
        }

        let payment_path = match env_var("AGENTPAY_PAYMENT_METHOD") {
            Some(raw) => PaymentPath::from_str(&raw).map_err(CliError::Config)?,
            None => PaymentPath::Channel,
        };

        let mut clearing = ClearingConfig::default();
        if let Some(url) = env_var("AGENTPAY_CLEARING_URL") {
            clearing.endpoint = url;
        }

        let settlement = match env_var("RPC_URL") {
            Some(url) => SettlementConfig::with_rpc(url),
            None => SettlementConfig::default(),
        };

        let worker_address = match env_var("WORKER_ADDRESS") {
            Some(raw) => Some(raw.parse().map_err(|_| {
                CliError::Config(format!("WORKER_ADDRESS {raw:?} is not an address"))
            })?),
            None => None,
        };

        Ok(Self {
            wallet,
            endpoint: env_var("AGENTPAY_ENDPOINT"),
            feed_url: env_var("AGENTPAY_DEMO_FEED_URL")
                .unwrap_or_else(|| DEFAULT_FEED_URL.to_string()),
            payment_path,
            status_file: env_var("AGENTPAY_STATUS_FILE").map(PathBuf::from),
            clearing,
            settlement,
            worker_address,
        })
    }

    /// The identity worker commands serve under.
    ///
    /// `WORKER_PRIVATE_KEY` lets a demo run both roles on one machine with
    /// distinct identities; without it the worker is the process identity.
    pub fn worker_identity(&self) -> CliResult<AgentWallet> {
        match env_var("WORKER_PRIVATE_KEY") {
            Some(key) => {
                let mut wallet = AgentWallet::from_key(&key)?;
                if let Some(name) = self.wallet.name() {
                    wallet = wallet.with_name(name);
                }
                Ok(wallet)
            }
            None => Ok(self.wallet.clone()),
        }
    }

    /// The registered self-name, required by the autonomous commands
    pub fn ens_name(&self) -> CliResult<String> {
        self.wallet
            .name()
            .map(str::to_string)
            .ok_or_else(|| CliError::Config("AGENTPAY_ENS_NAME is not set".to_string()))
    }

    /// Payment orchestrator for this identity
    pub fn orchestrator(&self) -> CliResult<Orchestrator> {
        Orchestrator::new(
            self.wallet.clone(),
            self.clearing.clone(),
            self.settlement.clone(),
        )
        .map_err(CliError::Payment)
    }

    /// Name resolver over the settlement-chain RPC
    pub fn resolver(&self) -> CliResult<Arc<NameResolver>> {
        NameResolver::new(&self.settlement.rpc_url)
            .map(Arc::new)
            .map_err(|e| CliError::Config(e.to_string()))
    }
}
