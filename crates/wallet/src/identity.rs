//! Long-lived identity wallet

use crate::error::{Result, WalletError};
use crate::session::SessionKey;
use alloy::network::EthereumWallet;
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol_types::{Eip712Domain, SolStruct};
use std::env;
use tracing::debug;

/// Environment variable the identity key is loaded from
pub const IDENTITY_KEY_ENV: &str = "CLIENT_PRIVATE_KEY";

/// The process identity: one keypair, optionally bound to an ENS name.
///
/// The signing key is loaded once at startup and no operation exposes it.
#[derive(Debug, Clone)]
pub struct AgentWallet {
    name: Option<String>,
    signer: PrivateKeySigner,
}

impl AgentWallet {
    /// Load the identity from `CLIENT_PRIVATE_KEY`.
    ///
    /// Fails with [`WalletError::IdentityUnavailable`] when the variable is
    /// missing or empty; key material never comes from files.
    pub fn from_env() -> Result<Self> {
        let raw = env::var(IDENTITY_KEY_ENV)
            .map_err(|_| WalletError::IdentityUnavailable(format!("{IDENTITY_KEY_ENV} not set")))?;
        if raw.trim().is_empty() {
            return Err(WalletError::IdentityUnavailable(format!(
                "{IDENTITY_KEY_ENV} is empty"
            )));
        }
        Self::from_key(raw.trim())
    }

    /// Build an identity from a raw hex private key (with or without `0x`)
    pub fn from_key(private_key: &str) -> Result<Self> {
        let normalized = private_key.trim().trim_start_matches("0x");
        let signer: PrivateKeySigner = normalized
            .parse()
            .map_err(|e| WalletError::InvalidKey(format!("{e}")))?;
        debug!(address = %signer.address(), "identity loaded");
        Ok(Self { name: None, signer })
    }

    /// Bind a human-readable name to this identity
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The registered name, when one is configured
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Payment address derived from the public key
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign arbitrary bytes as an EIP-191 personal message
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        self.signer
            .sign_message_sync(message)
            .map_err(|e| WalletError::Signing(e.to_string()))
    }

    /// Sign a prehashed 32-byte digest
    pub fn sign_hash(&self, hash: B256) -> Result<Signature> {
        self.signer
            .sign_hash_sync(&hash)
            .map_err(|e| WalletError::Signing(e.to_string()))
    }

    /// Sign an EIP-712 typed payload under the given domain
    pub fn eip712_sign<T: SolStruct>(&self, domain: &Eip712Domain, data: &T) -> Result<Signature> {
        let digest = data.eip712_signing_hash(domain);
        self.sign_hash(digest)
    }

    /// Mint a fresh ephemeral key for one clearing-network authentication
    pub fn ephemeral_keypair(&self) -> SessionKey {
        SessionKey::generate()
    }

    /// Transaction-signing wallet for the settlement chain.
    ///
    /// Hands alloy a signer handle without surfacing key bytes to callers.
    pub fn ethereum_wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}
