//! Payment proof verification
//!
//! The worker verifies without calling back to the client: a channel-close
//! proof is checked against the settlement chain's transaction receipt, an
//! app-session proof against the clearing network's view of the session. On
//! a quorum-2 session the worker's own submission of the identical payload
//! *is* the missing signature, so verification doubles as co-signing.

use crate::error::Result;
use agentpay_clearing::{
    Allocation, AppSessionPath, ClearingConfig, ClearingSession, SettlementClient, SubmitOutcome,
};
use agentpay_protocol::{parse_session_reference, looks_like_tx_hash, Bill, PaymentProof, ProofKind};
use agentpay_wallet::AgentWallet;
use alloy::primitives::Address;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Grace window for the counterparty's half of a quorum-2 state
const COSIGN_GRACE: Duration = Duration::from_secs(5);

/// Decides whether a proof settles a bill
#[async_trait]
pub trait ProofVerifier: Send + Sync {
    /// Whether `proof` credits the bill's worker with at least the bill
    /// amount. `requester` is the client address, needed to reconstruct the
    /// shared allocation payload on quorum-2 sessions.
    async fn verify(
        &self,
        proof: &PaymentProof,
        bill: &Bill,
        requester: Option<Address>,
    ) -> Result<bool>;
}

/// The production verifier: settlement chain for channel closes, clearing
/// network for app sessions
pub struct ClearingVerifier {
    wallet: AgentWallet,
    clearing: ClearingConfig,
    settlement: SettlementClient,
}

impl ClearingVerifier {
    /// Verifier for the worker identity `wallet`
    pub fn new(wallet: AgentWallet, clearing: ClearingConfig, settlement: SettlementClient) -> Self {
        Self {
            wallet,
            clearing,
            settlement,
        }
    }

    async fn verify_channel_close(&self, proof: &PaymentProof, bill: &Bill) -> Result<bool> {
        if !looks_like_tx_hash(&proof.reference) {
            debug!(reference = %proof.reference, "proof reference is not a tx hash");
            return Ok(false);
        }
        let ok = self
            .settlement
            .verify_asset_transfer(&proof.reference, bill.worker_address, bill.amount)
            .await?;
        Ok(ok)
    }

    async fn verify_app_session(
        &self,
        proof: &PaymentProof,
        bill: &Bill,
        requester: Option<Address>,
    ) -> Result<bool> {
        let Ok((session_id, version)) = parse_session_reference(&proof.reference) else {
            debug!(reference = %proof.reference, "proof reference is not a session reference");
            return Ok(false);
        };

        let session = ClearingSession::connect(self.clearing.clone(), &self.wallet).await?;
        let path = AppSessionPath::new(&session);

        // Already accepted (quorum 1, or the counterparty signed first)?
        let mut info = path.fetch(&session_id).await?;
        let accepted = info.as_ref().is_some_and(|i| i.version >= version);

        if !accepted {
            // Our submission of the identical payload completes the quorum.
            let Some(client) = requester else {
                warn!(%session_id, "cannot co-sign without the requester address");
                session.close().await;
                return Ok(false);
            };
            let allocations = vec![
                Allocation::new(client, &bill.asset, 0),
                Allocation::new(bill.worker_address, &bill.asset, bill.amount),
            ];
            match path.submit_state(&session_id, version, &allocations).await? {
                SubmitOutcome::Accepted { .. } => {
                    info!(%session_id, version, "payment state co-signed and accepted");
                }
                SubmitOutcome::PartiallySigned => {
                    // We signed first; wait briefly for the client's half.
                    if path
                        .wait_for_state(&session_id, version, COSIGN_GRACE)
                        .await
                        .is_err()
                    {
                        session.close().await;
                        return Ok(false);
                    }
                }
            }
            // Complete the close quorum as well, releasing the session.
            match path.close(&session_id, &allocations).await {
                Ok(_) => {}
                Err(e) => warn!(%session_id, error = %e, "close co-sign failed"),
            }
            info = path.fetch(&session_id).await?;
        }

        session.close().await;

        let Some(info) = info else {
            return Ok(false);
        };
        if info.version < version {
            return Ok(false);
        }
        // A version number alone proves nothing about money. Without an
        // allocation crediting the worker there is no payment to accept.
        if info.allocations.is_empty() {
            warn!(%session_id, version, "session listing carries no allocations; refusing proof");
            return Ok(false);
        }
        Ok(info.credited(bill.worker_address, &bill.asset) >= bill.amount)
    }
}

#[async_trait]
impl ProofVerifier for ClearingVerifier {
    async fn verify(
        &self,
        proof: &PaymentProof,
        bill: &Bill,
        requester: Option<Address>,
    ) -> Result<bool> {
        if proof.amount < bill.amount || proof.worker_address != bill.worker_address {
            debug!(job_id = %bill.job_id, "proof claims do not cover the bill");
            return Ok(false);
        }
        match proof.kind {
            ProofKind::ChannelClose => self.verify_channel_close(proof, bill).await,
            ProofKind::AppSessionState => self.verify_app_session(proof, bill, requester).await,
        }
    }
}
