//! Registry/resolver lookups with a short-lived cache

use crate::error::{EnsError, Result};
use crate::namehash::namehash;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::sol;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

/// Text record carrying the worker's HTTP endpoint
pub const ENDPOINT_RECORD: &str = "agentpay.endpoint";
/// Text record carrying the comma-separated capability list
pub const CAPABILITIES_RECORD: &str = "agentpay.capabilities";
/// Text record carrying the `task:amount` price table
pub const PRICES_RECORD: &str = "agentpay.prices";

/// Canonical ENS registry deployment (same address on mainnet and testnets)
pub const REGISTRY_ADDRESS: &str = "0x00000000000C2E074eC69A0dFb2997BA6C7d2e1e";

sol! {
    #[sol(rpc)]
    contract EnsRegistry {
        function resolver(bytes32 node) external view returns (address);
    }

    #[sol(rpc)]
    contract EnsPublicResolver {
        function addr(bytes32 node) external view returns (address);
        function text(bytes32 node, string key) external view returns (string);
    }
}

/// Everything a hirer needs to know about a named agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    /// Base URL of the agent's job server
    pub endpoint: String,
    /// Task types the agent advertises
    pub capabilities: Vec<String>,
    /// Advertised price per task type, in asset units
    pub price_table: BTreeMap<String, u64>,
    /// Payment address
    pub address: Address,
}

impl AgentRecord {
    /// Advertised price for `task_type`, when the agent quotes one
    pub fn advertised_price(&self, task_type: &str) -> Option<u64> {
        self.price_table.get(task_type).copied()
    }
}

/// Name-service client with an in-memory TTL cache
pub struct NameResolver {
    provider: DynProvider,
    registry: Address,
    cache: RwLock<HashMap<String, (Instant, AgentRecord)>>,
    cache_ttl: Duration,
}

impl NameResolver {
    /// Connect to the name service through `rpc_url`
    pub fn new(rpc_url: &str) -> Result<Self> {
        let url: Url = rpc_url
            .parse()
            .map_err(|e| EnsError::Rpc(format!("invalid rpc url {rpc_url}: {e}")))?;
        let provider = ProviderBuilder::new().connect_http(url).erased();
        let registry = REGISTRY_ADDRESS
            .parse()
            .expect("registry address constant");
        Ok(Self {
            provider,
            registry,
            cache: RwLock::new(HashMap::new()),
            cache_ttl: Duration::from_secs(300),
        })
    }

    /// Override the cache TTL
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Override the registry deployment (test networks)
    pub fn with_registry(mut self, registry: Address) -> Self {
        self.registry = registry;
        self
    }

    /// Resolve `name` into an [`AgentRecord`].
    ///
    /// Returns a cached record when one is fresh enough; otherwise reads the
    /// resolver, address record, and the three `agentpay.*` text records.
    pub async fn resolve(&self, name: &str) -> Result<AgentRecord> {
        let key = name.trim().to_lowercase();
        if let Some(record) = self.cached(&key).await {
            debug!(name = %key, "resolved from cache");
            return Ok(record);
        }

        let record = self.lookup(&key).await?;
        self.cache
            .write()
            .await
            .insert(key, (Instant::now(), record.clone()));
        Ok(record)
    }

    async fn cached(&self, key: &str) -> Option<AgentRecord> {
        let cache = self.cache.read().await;
        let (stored_at, record) = cache.get(key)?;
        (stored_at.elapsed() < self.cache_ttl).then(|| record.clone())
    }

    async fn lookup(&self, name: &str) -> Result<AgentRecord> {
        let node = namehash(name);

        let registry = EnsRegistry::new(self.registry, self.provider.clone());
        let resolver_addr = registry
            .resolver(node)
            .call()
            .await
            .map_err(|e| EnsError::Rpc(e.to_string()))?;
        if resolver_addr == Address::ZERO {
            return Err(EnsError::NameNotFound(name.to_string()));
        }

        let resolver = EnsPublicResolver::new(resolver_addr, self.provider.clone());

        let address = resolver
            .addr(node)
            .call()
            .await
            .map_err(|e| EnsError::Rpc(e.to_string()))?;
        if address == Address::ZERO {
            return Err(EnsError::NameNotFound(name.to_string()));
        }

        let endpoint = resolver
            .text(node, ENDPOINT_RECORD.to_string())
            .call()
            .await
            .map_err(|e| EnsError::Rpc(e.to_string()))?;
        if endpoint.trim().is_empty() {
            return Err(EnsError::RecordMissing {
                name: name.to_string(),
                record: ENDPOINT_RECORD.to_string(),
            });
        }

        let capabilities_raw = resolver
            .text(node, CAPABILITIES_RECORD.to_string())
            .call()
            .await
            .unwrap_or_default();
        let prices_raw = resolver
            .text(node, PRICES_RECORD.to_string())
            .call()
            .await
            .unwrap_or_default();

        let price_table = match parse_price_table(&prices_raw) {
            Ok(table) => table,
            Err(reason) => {
                // A malformed price table should not make the agent
                // unhireable; the hirer just loses the price sanity check.
                warn!(name, %reason, "ignoring unparseable price table");
                BTreeMap::new()
            }
        };

        debug!(name, endpoint = %endpoint.trim(), %address, "resolved agent");
        Ok(AgentRecord {
            endpoint: endpoint.trim().to_string(),
            capabilities: parse_capabilities(&capabilities_raw),
            price_table,
            address,
        })
    }
}

fn parse_capabilities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_price_table(raw: &str) -> std::result::Result<BTreeMap<String, u64>, String> {
    let mut table = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (task, amount) = entry
            .split_once(':')
            .ok_or_else(|| format!("entry {entry:?} is not task:amount"))?;
        let amount: u64 = amount
            .trim()
            .parse()
            .map_err(|_| format!("amount in {entry:?} is not an integer"))?;
        table.insert(task.trim().to_string(), amount);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_capabilities() {
        assert_eq!(
            parse_capabilities("summarize, analyze-data ,translate"),
            vec!["summarize", "analyze-data", "translate"]
        );
        assert!(parse_capabilities("").is_empty());
        assert!(parse_capabilities(" , ,").is_empty());
    }

    #[test]
    fn test_parse_price_table() {
        let table = parse_price_table("summarize:1000000, translate:250000").unwrap();
        assert_eq!(table.get("summarize"), Some(&1_000_000));
        assert_eq!(table.get("translate"), Some(&250_000));
        assert!(parse_price_table("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_price_table_rejects_bad_entries() {
        assert!(parse_price_table("summarize").is_err());
        assert!(parse_price_table("summarize:lots").is_err());
    }

    #[test]
    fn test_advertised_price() {
        let record = AgentRecord {
            endpoint: "http://h:9000".to_string(),
            capabilities: vec!["summarize".to_string()],
            price_table: BTreeMap::from([("summarize".to_string(), 1_000_000)]),
            address: Address::ZERO,
        };
        assert_eq!(record.advertised_price("summarize"), Some(1_000_000));
        assert_eq!(record.advertised_price("translate"), None);
    }
}
