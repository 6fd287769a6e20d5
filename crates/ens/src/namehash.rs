//! EIP-137 namehash

use alloy::primitives::{keccak256, B256};

/// Compute the EIP-137 node hash for a dot-separated name.
///
/// Labels are hashed right to left over an all-zero root; the empty name is
/// the root itself. Names are lowercased before hashing (sufficient
/// normalization for the ASCII names agents register here).
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namehash_root() {
        assert_eq!(namehash(""), B256::ZERO);
    }

    #[test]
    fn test_namehash_known_vectors() {
        // Reference vectors from EIP-137.
        assert_eq!(
            namehash("eth").to_string(),
            "0x93cdeb708b7545dc668eb9280176169d1c33cfd8ed6f04690a0bcc88a93fc4ae"
        );
        assert_eq!(
            namehash("foo.eth").to_string(),
            "0xde9b09fd7c5f901e23a3f19fecc54828e9c848539801e86591bd9801b019f84f"
        );
    }

    #[test]
    fn test_namehash_is_case_insensitive() {
        assert_eq!(namehash("Alice.ETH"), namehash("alice.eth"));
    }
}
