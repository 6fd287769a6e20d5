//! Settlement-chain client
//!
//! Submits channel create/close states to the custody contract and reads
//! receipts back. The custody and adjudicator deployments are fixed
//! collaborators; only their addresses are configuration.

use crate::error::{ClearingError, Result};
use crate::types::CreateChannelReply;
use agentpay_wallet::AgentWallet;
use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use alloy::sol_types::{SolEvent, SolValue};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

sol! {
    #[sol(rpc)]
    contract Custody {
        struct ChannelDef {
            address[] participants;
            address adjudicator;
            uint64 challenge;
            uint64 nonce;
        }

        struct StateAllocation {
            address destination;
            address token;
            uint256 amount;
        }

        struct ChannelState {
            uint8 intent;
            uint256 version;
            bytes data;
            StateAllocation[] allocations;
            bytes[] sigs;
        }

        function create(ChannelDef channel, ChannelState initial) external returns (bytes32 channelId);
        function close(bytes32 channelId, ChannelState candidate) external;
        function getChannelVersion(bytes32 channelId) external view returns (uint256);
    }

    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Yellow sandbox adjudicator on Sepolia
pub const DEFAULT_ADJUDICATOR: &str = "0x7c7ccbc98469190849BCC6c926307794fDfB11F2";
/// Yellow sandbox custody on Sepolia
pub const DEFAULT_CUSTODY: &str = "0x019B65A265EB3363822f2752141b3dF16131b262";
/// Test stablecoin deployment on Sepolia (6 decimals)
pub const DEFAULT_ASSET_TOKEN: &str = "0x25762231808F040410586504fDF08Df259A2163c";
/// Sepolia chain id
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;

/// Receipt polling cadence and ceiling
const RECEIPT_POLL: Duration = Duration::from_secs(3);
const RECEIPT_WAIT: Duration = Duration::from_secs(90);

/// Settlement-chain configuration
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// JSON-RPC endpoint of the settlement chain
    pub rpc_url: String,
    /// Chain id transactions are bound to
    pub chain_id: u64,
    /// Custody contract deployment
    pub custody: Address,
    /// Adjudicator contract deployment
    pub adjudicator: Address,
    /// ERC-20 deployment of the bill asset
    pub asset_token: Address,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
            chain_id: DEFAULT_CHAIN_ID,
            custody: DEFAULT_CUSTODY.parse().expect("custody constant"),
            adjudicator: DEFAULT_ADJUDICATOR.parse().expect("adjudicator constant"),
            asset_token: DEFAULT_ASSET_TOKEN.parse().expect("asset token constant"),
        }
    }
}

impl SettlementConfig {
    /// Default deployments over a custom RPC endpoint
    pub fn with_rpc(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Default::default()
        }
    }
}

/// Wire shape of a channel definition as the clearing server sends it
#[derive(Debug, Deserialize)]
struct WireChannel {
    participants: Vec<Address>,
    adjudicator: Address,
    #[serde(default)]
    challenge: u64,
    #[serde(default)]
    nonce: u64,
}

/// Wire shape of a channel state as the clearing server sends it
#[derive(Debug, Deserialize)]
struct WireState {
    #[serde(default)]
    intent: u8,
    version: u64,
    #[serde(default, alias = "state_data")]
    data: String,
    #[serde(default)]
    allocations: Vec<WireAllocation>,
}

#[derive(Debug, Deserialize)]
struct WireAllocation {
    destination: Address,
    token: Address,
    amount: Value,
}

/// Smart-contract client for the custody/adjudicator deployments
pub struct SettlementClient {
    provider: DynProvider,
    wallet: AgentWallet,
    config: SettlementConfig,
}

impl SettlementClient {
    /// Connect to the settlement chain; `wallet` signs states and
    /// transactions
    pub fn new(config: SettlementConfig, wallet: AgentWallet) -> Result<Self> {
        let url: Url = config
            .rpc_url
            .parse()
            .map_err(|e| ClearingError::OnChain(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(wallet.ethereum_wallet())
            .connect_http(url)
            .erased();
        Ok(Self {
            provider,
            wallet,
            config,
        })
    }

    /// The configured asset token deployment
    pub fn asset_token(&self) -> Address {
        self.config.asset_token
    }

    /// Chain id transactions are bound to
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Countersign and submit a channel's initial state on-chain.
    ///
    /// Returns the create transaction hash once mined.
    pub async fn submit_channel_create(&self, reply: &CreateChannelReply) -> Result<B256> {
        let channel: WireChannel = serde_json::from_value(reply.channel.clone())
            .map_err(|e| ClearingError::Protocol(format!("create_channel channel: {e}")))?;
        let state: WireState = serde_json::from_value(reply.state.clone())
            .map_err(|e| ClearingError::Protocol(format!("create_channel state: {e}")))?;

        let channel_id = parse_channel_id(&reply.channel_id)?;
        let sol_state = self.countersigned_state(channel_id, &state, &reply.server_signature)?;
        let sol_channel = Custody::ChannelDef {
            participants: channel.participants,
            adjudicator: channel.adjudicator,
            challenge: channel.challenge,
            nonce: channel.nonce,
        };

        let custody = Custody::new(self.config.custody, self.provider.clone());
        let tx_hash = custody
            .create(sol_channel, sol_state)
            .send()
            .await
            .map_err(|e| ClearingError::OnChain(format!("create channel send: {e}")))?
            .watch()
            .await
            .map_err(|e| ClearingError::OnChain(format!("create channel receipt: {e}")))?;

        info!(channel_id = %reply.channel_id, tx = %tx_hash, "channel created on-chain");
        Ok(tx_hash)
    }

    /// Countersign and submit a channel's final state on-chain.
    ///
    /// The server's close payload carries the final state and its signature;
    /// the state version must be exactly one past the last valid on-chain
    /// state. Returns the close transaction hash once mined.
    pub async fn submit_channel_close(&self, channel_id: &str, payload: &Value) -> Result<B256> {
        let state_value = payload
            .get("state")
            .cloned()
            .ok_or_else(|| ClearingError::Protocol("close_channel without state".to_string()))?;
        let state: WireState = serde_json::from_value(state_value)
            .map_err(|e| ClearingError::Protocol(format!("close_channel state: {e}")))?;
        let server_signature = payload
            .get("server_signature")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClearingError::Protocol("close_channel without server_signature".to_string())
            })?;

        let id = parse_channel_id(channel_id)?;
        let custody = Custody::new(self.config.custody, self.provider.clone());

        let onchain_version = custody
            .getChannelVersion(id)
            .call()
            .await
            .map_err(|e| ClearingError::OnChain(format!("read channel version: {e}")))?;
        let expected = onchain_version + U256::from(1);
        if U256::from(state.version) != expected {
            return Err(ClearingError::Protocol(format!(
                "close state version {} does not follow on-chain version {}",
                state.version, onchain_version
            )));
        }

        let sol_state = self.countersigned_state(id, &state, server_signature)?;
        let tx_hash = custody
            .close(id, sol_state)
            .send()
            .await
            .map_err(|e| ClearingError::OnChain(format!("close channel send: {e}")))?
            .watch()
            .await
            .map_err(|e| ClearingError::OnChain(format!("close channel receipt: {e}")))?;

        info!(channel_id, tx = %tx_hash, "channel closed on-chain");
        Ok(tx_hash)
    }

    /// Confirm that `tx_hash` moved at least `min_amount` of the asset token
    /// to `recipient`.
    ///
    /// Polls for the receipt (freshly submitted transactions take a few
    /// blocks to index), then checks the ERC-20 transfer logs.
    pub async fn verify_asset_transfer(
        &self,
        tx_hash: &str,
        recipient: Address,
        min_amount: u64,
    ) -> Result<bool> {
        let hash: B256 = tx_hash
            .trim()
            .parse()
            .map_err(|_| ClearingError::OnChain(format!("malformed tx hash {tx_hash}")))?;

        let started = tokio::time::Instant::now();
        let receipt = loop {
            match self.provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => break receipt,
                Ok(None) => {}
                Err(e) => return Err(ClearingError::OnChain(format!("receipt lookup: {e}"))),
            }
            if started.elapsed() >= RECEIPT_WAIT {
                warn!(tx = %hash, "transaction not indexed in time");
                return Ok(false);
            }
            tokio::time::sleep(RECEIPT_POLL).await;
        };

        if !receipt.status() {
            debug!(tx = %hash, "transaction reverted");
            return Ok(false);
        }

        let wanted = U256::from(min_amount);
        for log in receipt.inner.logs() {
            let topics = log.topics();
            if topics.len() != 3 || topics[0] != Transfer::SIGNATURE_HASH {
                continue;
            }
            if log.address() != self.config.asset_token {
                continue;
            }
            let to = Address::from_word(topics[2]);
            let value = U256::from_be_slice(log.data().data.as_ref());
            if to == recipient && value >= wanted {
                debug!(tx = %hash, %to, %value, "asset transfer verified");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Countersign a server-signed state: `[server_signature, ours]`
    fn countersigned_state(
        &self,
        channel_id: B256,
        state: &WireState,
        server_signature: &str,
    ) -> Result<Custody::ChannelState> {
        let allocations = state
            .allocations
            .iter()
            .map(|a| {
                Ok(Custody::StateAllocation {
                    destination: a.destination,
                    token: a.token,
                    amount: parse_units(&a.amount)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let data = parse_hex_bytes(&state.data)?;
        let unsigned = Custody::ChannelState {
            intent: state.intent,
            version: U256::from(state.version),
            data: data.clone().into(),
            allocations: allocations.clone(),
            sigs: Vec::new(),
        };

        let digest = keccak256((channel_id, unsigned).abi_encode());
        let ours = self.wallet.sign_hash(digest)?;

        let server_sig = parse_hex_bytes(server_signature)?;
        Ok(Custody::ChannelState {
            intent: state.intent,
            version: U256::from(state.version),
            data: data.into(),
            allocations,
            sigs: vec![server_sig.into(), ours.as_bytes().to_vec().into()],
        })
    }
}

fn parse_channel_id(channel_id: &str) -> Result<B256> {
    channel_id
        .trim()
        .parse()
        .map_err(|_| ClearingError::Protocol(format!("malformed channel id {channel_id}")))
}

fn parse_hex_bytes(raw: &str) -> Result<Vec<u8>> {
    let raw = raw.trim().trim_start_matches("0x");
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    alloy::hex::decode(raw).map_err(|e| ClearingError::Protocol(format!("bad hex field: {e}")))
}

fn parse_units(value: &Value) -> Result<U256> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(U256::from)
            .ok_or_else(|| ClearingError::Protocol(format!("bad amount {value}"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ClearingError::Protocol(format!("bad amount {value}"))),
        _ => Err(ClearingError::Protocol(format!("bad amount {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units_number_and_string() {
        assert_eq!(
            parse_units(&Value::from(1_000_000u64)).unwrap(),
            U256::from(1_000_000u64)
        );
        assert_eq!(
            parse_units(&Value::from("1000000")).unwrap(),
            U256::from(1_000_000u64)
        );
        assert!(parse_units(&Value::Bool(true)).is_err());
    }

    #[test]
    fn test_parse_hex_bytes() {
        assert_eq!(parse_hex_bytes("0x0102").unwrap(), vec![1, 2]);
        assert_eq!(parse_hex_bytes("").unwrap(), Vec::<u8>::new());
        assert!(parse_hex_bytes("0xzz").is_err());
    }

    #[test]
    fn test_parse_channel_id_requires_32_bytes() {
        let ok = format!("0x{}", "11".repeat(32));
        assert!(parse_channel_id(&ok).is_ok());
        assert!(parse_channel_id("0x1234").is_err());
    }
}
