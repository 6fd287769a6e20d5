//! Agent identity and signing
//!
//! Each process holds exactly one long-lived identity for its lifetime: a
//! secp256k1 keypair loaded from the environment, never from a key file and
//! never written back out. The identity signs bills, settlement states, and
//! the EIP-712 authentication challenge of the clearing network. Short-lived
//! [`SessionKey`]s are minted per clearing-network authentication and sign
//! the lightweight RPC frames that follow.

mod error;
mod identity;
mod session;

pub use error::{Result, WalletError};
pub use identity::AgentWallet;
pub use session::SessionKey;
