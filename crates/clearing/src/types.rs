//! Payload types for the clearing-network RPC surface
//!
//! The server is loose about numeric encoding (amounts arrive as numbers or
//! decimal strings depending on the method), so amount fields deserialize
//! through [`flexible_units`].

use alloy::primitives::Address;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A per-participant, per-asset balance entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Who the funds belong to
    pub participant: Address,
    /// Asset symbol, e.g. `ytest.usd`
    pub asset: String,
    /// Amount in asset units
    #[serde(deserialize_with = "flexible_units")]
    pub amount: u64,
}

impl Allocation {
    /// Convenience constructor
    pub fn new(participant: Address, asset: impl Into<String>, amount: u64) -> Self {
        Self {
            participant,
            asset: asset.into(),
            amount,
        }
    }
}

/// One entry of the `channels` snapshot the server pushes after auth
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    /// Channel identifier on the clearing network
    #[serde(default)]
    pub channel_id: String,
    /// `open`, `closed`, or a transitional status
    #[serde(default)]
    pub status: String,
    /// Funding token address, when reported
    #[serde(default)]
    pub token: Option<String>,
    /// On-chain balance still held by the channel, in asset units
    #[serde(default, deserialize_with = "flexible_units_default")]
    pub amount: u64,
    /// Settlement chain id, when reported
    #[serde(default)]
    pub chain_id: Option<u64>,
}

impl ChannelSnapshot {
    /// Whether this channel can carry off-chain transfers
    pub fn is_open(&self) -> bool {
        self.status.eq_ignore_ascii_case("open")
    }
}

/// App session definition sent with `create_app_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefinition {
    /// Application tag the session is scoped to
    pub application: String,
    /// Protocol revision of the state format
    pub protocol_version: String,
    /// Ordered participants: `[client, worker]`
    pub participants: Vec<Address>,
    /// Signing weights, `[1, 1]` here
    pub weights: Vec<u8>,
    /// Signatures required to accept a state (1 or 2)
    pub quorum: u8,
    /// Challenge window in seconds for disputes
    pub challenge_duration: u64,
    /// Unix seconds; must be unique per session
    pub nonce: u64,
}

/// An app session as reported by `get_app_sessions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSessionInfo {
    /// Session identifier
    #[serde(default)]
    pub app_session_id: String,
    /// `open` or `closed`
    #[serde(default)]
    pub status: String,
    /// Latest accepted state version
    #[serde(default)]
    pub version: u64,
    /// Latest accepted allocations, when the server includes them
    #[serde(default)]
    pub allocations: Vec<Allocation>,
}

impl AppSessionInfo {
    /// Whether the session has been closed out
    pub fn is_closed(&self) -> bool {
        self.status.eq_ignore_ascii_case("closed")
    }

    /// Units the latest state credits to `participant` in `asset`
    pub fn credited(&self, participant: Address, asset: &str) -> u64 {
        self.allocations
            .iter()
            .filter(|a| a.participant == participant && a.asset == asset)
            .map(|a| a.amount)
            .sum()
    }
}

/// One unified-balance entry from `get_ledger_balances`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerBalance {
    /// Asset symbol
    pub asset: String,
    /// Amount in asset units
    #[serde(deserialize_with = "flexible_units")]
    pub amount: u64,
}

/// Server reply to `create_channel`: the channel definition plus the unsigned
/// initial state the client must countersign and submit on-chain
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChannelReply {
    /// Channel identifier
    pub channel_id: String,
    /// Channel definition for the custody contract
    pub channel: Value,
    /// Unsigned initial state
    pub state: Value,
    /// The clearing operator's signature over the initial state
    pub server_signature: String,
}

/// Accept an amount encoded as a JSON number or a decimal string
pub(crate) fn flexible_units<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    units_from_value(&value).ok_or_else(|| serde::de::Error::custom("amount is not an integer"))
}

/// [`flexible_units`], defaulting absent/null to zero
pub(crate) fn flexible_units_default<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(0);
    }
    units_from_value(&value).ok_or_else(|| serde::de::Error::custom("amount is not an integer"))
}

fn units_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
