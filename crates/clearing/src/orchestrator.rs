//! Payment orchestrator
//!
//! Drives one bill to a verifiable proof over the chosen path. Each step
//! opens its own authenticated session (the clearing network keeps all
//! durable state server-side, so a step retried on a fresh connection picks
//! up exactly where the last one failed).

use crate::app_session::{AppSessionPath, SubmitOutcome};
use crate::channel::ChannelPath;
use crate::error::{ClearingError, Result};
use crate::session::{ClearingConfig, ClearingSession};
use crate::settlement::{SettlementClient, SettlementConfig};
use crate::types::Allocation;
use agentpay_protocol::{Bill, PaymentProof};
use agentpay_wallet::AgentWallet;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Backoff schedule for transient step failures
const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(4)];

/// How long to wait for a counterparty signature before giving up a
/// confirmation poll
const QUORUM_GRACE: Duration = Duration::from_secs(5);

/// Which settlement path to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentPath {
    /// On-chain channel create / off-chain transfer / on-chain close
    Channel,
    /// Bilateral app session with quorum signing
    AppSession,
}

impl FromStr for PaymentPath {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "channel" => Ok(PaymentPath::Channel),
            // "yellow" is the historical name for the session path.
            "app_session" | "yellow" => Ok(PaymentPath::AppSession),
            other => Err(format!(
                "unknown payment method {other:?}; use channel or app_session"
            )),
        }
    }
}

impl std::fmt::Display for PaymentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentPath::Channel => write!(f, "channel"),
            PaymentPath::AppSession => write!(f, "app_session"),
        }
    }
}

/// Drives bills to payment proofs
pub struct Orchestrator {
    wallet: AgentWallet,
    clearing: ClearingConfig,
    settlement: SettlementClient,
    quorum: u8,
    /// One in-flight transfer per identity; channels are shared resources.
    transfer_lock: Mutex<()>,
}

impl Orchestrator {
    /// Build an orchestrator for `wallet`
    pub fn new(
        wallet: AgentWallet,
        clearing: ClearingConfig,
        settlement: SettlementConfig,
    ) -> Result<Self> {
        let settlement = SettlementClient::new(settlement, wallet.clone())?;
        Ok(Self {
            wallet,
            clearing,
            settlement,
            quorum: 2,
            transfer_lock: Mutex::new(()),
        })
    }

    /// Override the app-session quorum (tests use 1)
    pub fn with_quorum(mut self, quorum: u8) -> Self {
        self.quorum = quorum;
        self
    }

    /// Settle `bill` over `path` and return the proof to hand the worker
    pub async fn pay(&self, bill: &Bill, path: PaymentPath) -> Result<PaymentProof> {
        info!(job_id = %bill.job_id, amount = bill.amount, %path, "paying bill");
        match path {
            PaymentPath::Channel => self.pay_channel(bill).await,
            PaymentPath::AppSession => self.pay_app_session(bill).await,
        }
    }

    async fn pay_channel(&self, bill: &Bill) -> Result<PaymentProof> {
        let channel_id = self
            .step("ensure channel", || async move {
                let session = self.connect().await?;
                let id = ChannelPath::new(&session, &self.settlement)
                    .ensure_channel()
                    .await?;
                session.close().await;
                Ok(id)
            })
            .await?;

        {
            let _serialized = self.transfer_lock.lock().await;
            self.step("transfer", || async move {
                let session = self.connect().await?;
                ChannelPath::new(&session, &self.settlement)
                    .transfer(bill.worker_address, &bill.asset, bill.amount)
                    .await?;
                session.close().await;
                Ok(())
            })
            .await?;
        }

        let channel_id = channel_id.as_str();
        let tx_hash = self
            .step("close channel", || async move {
                let session = self.connect().await?;
                let hash = ChannelPath::new(&session, &self.settlement)
                    .close(channel_id, self.wallet.address())
                    .await?;
                session.close().await;
                Ok(hash)
            })
            .await?;

        Ok(PaymentProof::channel_close(
            tx_hash,
            bill.amount,
            bill.worker_address,
        ))
    }

    async fn pay_app_session(&self, bill: &Bill) -> Result<PaymentProof> {
        let created = self
            .step("create app session", || async move {
                let session = self.connect().await?;
                let created = AppSessionPath::new(&session)
                    .create(bill.worker_address, self.quorum)
                    .await?;
                session.close().await;
                Ok(created)
            })
            .await?;

        let session_id = created.id.as_str();
        let pay_version = created.version + 1;
        let allocations = self.payment_allocations(bill);
        let allocations = allocations.as_slice();

        let outcome = self
            .step("submit payment state", || async move {
                let session = self.connect().await?;
                let outcome = AppSessionPath::new(&session)
                    .submit_state(session_id, pay_version, allocations)
                    .await?;
                session.close().await;
                Ok(outcome)
            })
            .await?;
        if outcome == SubmitOutcome::PartiallySigned {
            // Quorum-2: the worker co-signs the identical payload when it
            // verifies the proof; the session completes then.
            info!(session_id, version = pay_version,
                  "payment state awaiting counterparty signature");
        }

        let close_outcome = self
            .step("close app session", || async move {
                let session = self.connect().await?;
                let outcome = AppSessionPath::new(&session)
                    .close(session_id, allocations)
                    .await?;
                session.close().await;
                Ok(outcome)
            })
            .await?;
        if close_outcome == SubmitOutcome::PartiallySigned {
            info!(session_id, "close awaiting counterparty signature");
        }

        Ok(PaymentProof::app_session_state(
            session_id,
            pay_version,
            bill.amount,
            bill.worker_address,
        ))
    }

    /// Wait until the clearing network reports `version` accepted.
    ///
    /// Resolves a partially signed payment once the counterparty signs; used
    /// after handing over a quorum-2 proof.
    pub async fn confirm_app_state(&self, session_id: &str, version: u64) -> Result<()> {
        let session = self.connect().await?;
        let result = AppSessionPath::new(&session)
            .wait_for_state(session_id, version, QUORUM_GRACE)
            .await;
        session.close().await;
        result.map(|_| ())
    }

    /// Confirm a session has closed, polling past a missing acknowledgement
    pub async fn finalize_app_session(&self, session_id: &str, deadline: Duration) -> Result<()> {
        let session = self.connect().await?;
        let result = AppSessionPath::new(&session)
            .wait_until_closed(session_id, deadline)
            .await;
        session.close().await;
        result
    }

    fn payment_allocations(&self, bill: &Bill) -> Vec<Allocation> {
        vec![
            Allocation::new(self.wallet.address(), &bill.asset, 0),
            Allocation::new(bill.worker_address, &bill.asset, bill.amount),
        ]
    }

    async fn connect(&self) -> Result<ClearingSession> {
        ClearingSession::connect(self.clearing.clone(), &self.wallet).await
    }

    /// Run one step with the retry policy: transient failures back off 1 s
    /// then 4 s; an on-chain failure is retried once with fresh gas
    /// estimation; anything else surfaces immediately.
    async fn step<T, F, Fut>(&self, label: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut transient_delays = RETRY_DELAYS.iter();
        let mut on_chain_budget = 1u8;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => match transient_delays.next() {
                    Some(delay) => {
                        warn!(step = label, error = %e, ?delay, "transient failure, retrying");
                        tokio::time::sleep(*delay).await;
                    }
                    None => return Err(e),
                },
                Err(e @ ClearingError::OnChain(_)) if on_chain_budget > 0 => {
                    on_chain_budget -= 1;
                    warn!(step = label, error = %e, "on-chain failure, retrying with fresh gas");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_path_parsing() {
        assert_eq!(PaymentPath::from_str("channel").unwrap(), PaymentPath::Channel);
        assert_eq!(
            PaymentPath::from_str("app_session").unwrap(),
            PaymentPath::AppSession
        );
        assert_eq!(
            PaymentPath::from_str("yellow").unwrap(),
            PaymentPath::AppSession
        );
        assert_eq!(
            PaymentPath::from_str(" Channel ").unwrap(),
            PaymentPath::Channel
        );
        assert!(PaymentPath::from_str("cash").is_err());
    }

    #[test]
    fn test_payment_path_display_round_trip() {
        for path in [PaymentPath::Channel, PaymentPath::AppSession] {
            assert_eq!(PaymentPath::from_str(&path.to_string()).unwrap(), path);
        }
    }
}
