//! Channel path: on-chain create, off-chain transfer, on-chain close
//!
//! A channel is a bilateral deposit adjudicated by the custody contract.
//! Funds move off-chain through the unified balance; the channel itself only
//! touches the chain at create and close. At most one channel is open per
//! identity, so an existing `open` entry in the server's snapshot is always
//! reused.

use crate::error::{ClearingError, Result};
use crate::session::ClearingSession;
use crate::settlement::SettlementClient;
use crate::types::CreateChannelReply;
use alloy::primitives::Address;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// How long to wait for the post-auth `channels` snapshot
const SNAPSHOT_WAIT: Duration = Duration::from_secs(5);

/// Channel operations over one authenticated session
pub struct ChannelPath<'a> {
    session: &'a ClearingSession,
    settlement: &'a SettlementClient,
}

impl<'a> ChannelPath<'a> {
    /// Operate on `session`, settling through `settlement`
    pub fn new(session: &'a ClearingSession, settlement: &'a SettlementClient) -> Self {
        Self {
            session,
            settlement,
        }
    }

    /// Return an open channel id, creating one on-chain if none exists.
    ///
    /// The server pushes a `channels` snapshot right after auth; an entry
    /// with status `open` is reused. Otherwise `create_channel` returns the
    /// channel definition and an unsigned initial state which the client
    /// countersigns and submits to the custody contract.
    pub async fn ensure_channel(&self) -> Result<String> {
        let snapshot = self.session.channels(SNAPSHOT_WAIT).await;
        if let Some(open) = snapshot.iter().find(|c| c.is_open()) {
            debug!(channel_id = %open.channel_id, "reusing open channel");
            return Ok(open.channel_id.clone());
        }

        let (_, payload) = self
            .session
            .call(
                "create_channel",
                json!({
                    "chain_id": self.settlement.chain_id(),
                    "token": self.settlement.asset_token(),
                }),
            )
            .await?;
        let reply: CreateChannelReply = serde_json::from_value(payload)
            .map_err(|e| ClearingError::Protocol(format!("create_channel payload: {e}")))?;

        self.settlement.submit_channel_create(&reply).await?;
        info!(channel_id = %reply.channel_id, "channel ready");
        Ok(reply.channel_id)
    }

    /// Move `amount` units of `asset` to `destination` off-chain.
    ///
    /// Precondition: the open channel carries zero on-chain balance — funds
    /// live in the unified balance. A non-zero balance fails with
    /// [`ClearingError::ChannelBalanceNotZero`] so the caller can fall back
    /// to the app-session path.
    pub async fn transfer(&self, destination: Address, asset: &str, amount: u64) -> Result<()> {
        let snapshot = self.session.channels(SNAPSHOT_WAIT).await;
        if let Some(open) = snapshot.iter().find(|c| c.is_open()) {
            if open.amount != 0 {
                return Err(ClearingError::ChannelBalanceNotZero {
                    channel_id: open.channel_id.clone(),
                    amount: open.amount,
                });
            }
        }

        self.session
            .call(
                "transfer",
                json!({
                    "destination": destination,
                    "allocations": [{ "asset": asset, "amount": amount }],
                }),
            )
            .await?;
        info!(%destination, asset, amount, "unified-balance transfer sent");
        Ok(())
    }

    /// Close `channel_id`, settling remaining funds to `destination`.
    ///
    /// The server replies with the final state and its signature; the client
    /// countersigns and submits it to the custody contract. Returns the
    /// close transaction hash — the channel-path payment proof.
    pub async fn close(&self, channel_id: &str, destination: Address) -> Result<String> {
        let (_, payload) = self
            .session
            .call(
                "close_channel",
                json!({
                    "channel_id": channel_id,
                    "funds_destination": destination,
                }),
            )
            .await?;

        let tx_hash = self
            .settlement
            .submit_channel_close(channel_id, &payload)
            .await?;
        Ok(format!("{tx_hash:#x}"))
    }
}
