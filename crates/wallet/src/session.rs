//! Ephemeral session keys
//!
//! A session key authorizes exactly one clearing-network connection. It is
//! generated fresh, named in the auth request, blessed by an EIP-712
//! signature from the identity key, and signs every RPC frame until the
//! socket closes. It is never persisted.

use crate::error::{Result, WalletError};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

/// A single-authentication signing key
#[derive(Debug)]
pub struct SessionKey {
    signer: PrivateKeySigner,
}

impl SessionKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    /// Address the clearing network knows this session by
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign a prehashed 32-byte digest (RPC frame signing)
    pub fn sign_hash(&self, hash: B256) -> Result<Signature> {
        self.signer
            .sign_hash_sync(&hash)
            .map_err(|e| WalletError::Signing(e.to_string()))
    }
}
