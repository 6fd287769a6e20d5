//! Payment proofs
//!
//! Evidence that a bill was settled: either a transaction hash from closing
//! a payment channel on the settlement chain, or a clearing-network app
//! session reference of the form `session:<id>:version:<n>`. The worker must
//! be able to verify either shape without calling back to the client.

use crate::error::{ProtocolError, Result};
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

/// How the payment was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    /// On-chain channel close; reference is the settlement transaction hash
    ChannelClose,
    /// Off-chain app session state; reference is `session:<id>:version:<n>`
    AppSessionState,
}

/// Proof that funds reached the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentProof {
    /// Settlement shape of the reference
    pub kind: ProofKind,
    /// Transaction hash or session reference, depending on `kind`
    pub reference: String,
    /// Amount the proof claims to have moved, in asset units
    pub amount: u64,
    /// Address the proof claims to credit
    pub worker_address: Address,
}

impl PaymentProof {
    /// Proof from an on-chain channel close transaction
    pub fn channel_close(tx_hash: impl Into<String>, amount: u64, worker_address: Address) -> Self {
        Self {
            kind: ProofKind::ChannelClose,
            reference: tx_hash.into(),
            amount,
            worker_address,
        }
    }

    /// Proof from an accepted app session state
    pub fn app_session_state(
        session_id: &str,
        version: u64,
        amount: u64,
        worker_address: Address,
    ) -> Self {
        Self {
            kind: ProofKind::AppSessionState,
            reference: session_reference(session_id, version),
            amount,
            worker_address,
        }
    }
}

/// Render an app session reference: `session:<id>:version:<n>`
pub fn session_reference(session_id: &str, version: u64) -> String {
    format!("session:{session_id}:version:{version}")
}

/// Parse an app session reference back into `(session_id, version)`.
///
/// Accepts the canonical `session:<id>:version:<n>` shape and the bare
/// `<id>:version:<n>` some proxies produce.
pub fn parse_session_reference(reference: &str) -> Result<(String, u64)> {
    let reference = reference.trim();
    let rest = reference.strip_prefix("session:").unwrap_or(reference);

    let (session_id, version_part) = rest
        .rsplit_once(":version:")
        .ok_or_else(|| ProtocolError::InvalidProofReference(reference.to_string()))?;

    if session_id.is_empty() {
        return Err(ProtocolError::InvalidProofReference(reference.to_string()));
    }

    let version: u64 = version_part
        .parse()
        .map_err(|_| ProtocolError::InvalidProofReference(reference.to_string()))?;

    Ok((session_id.to_string(), version))
}

/// Whether `reference` looks like a 32-byte transaction hash
pub fn looks_like_tx_hash(reference: &str) -> bool {
    let reference = reference.trim();
    reference.len() == 66
        && reference.starts_with("0x")
        && reference[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_reference_round_trip() {
        let reference = session_reference("0xabc123", 7);
        assert_eq!(reference, "session:0xabc123:version:7");
        let (sid, version) = parse_session_reference(&reference).unwrap();
        assert_eq!(sid, "0xabc123");
        assert_eq!(version, 7);
    }

    #[test]
    fn test_parse_reference_without_prefix() {
        let (sid, version) = parse_session_reference("0xdeadbeef:version:2").unwrap();
        assert_eq!(sid, "0xdeadbeef");
        assert_eq!(version, 2);
    }

    #[test]
    fn test_parse_reference_rejects_garbage() {
        assert!(parse_session_reference("session::version:1").is_err());
        assert!(parse_session_reference("session:0xabc:version:x").is_err());
        assert!(parse_session_reference("0xTX").is_err());
    }

    #[test]
    fn test_tx_hash_shape() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert!(looks_like_tx_hash(&hash));
        assert!(!looks_like_tx_hash("0x1234"));
        assert!(!looks_like_tx_hash(&format!("0x{}", "zz".repeat(32))));
    }

    #[test]
    fn test_proof_serialization_kind_tag() {
        let worker = "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap();
        let proof = PaymentProof::app_session_state("0xsid", 2, 1_000_000, worker);
        let json = serde_json::to_value(&proof).unwrap();
        assert_eq!(json["kind"], "app_session_state");
        assert_eq!(json["reference"], "session:0xsid:version:2");
    }
}
