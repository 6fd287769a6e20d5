//! Worker-issued payment quotes

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Asset the sandbox clearing network denominates bills in (6 decimals)
pub const DEFAULT_ASSET: &str = "ytest.usd";

/// A worker's quote for one job. Immutable once emitted.
///
/// Amounts are integer units of the bill asset; `1_000_000` is one whole
/// `ytest.usd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bill {
    /// Job this bill pays for
    pub job_id: String,
    /// Address the payment must credit
    pub worker_address: Address,
    /// Price in asset units
    pub amount: u64,
    /// Asset symbol on the clearing network
    pub asset: String,
    /// Unix seconds after which the bill is no longer payable
    pub expires_at: u64,
    /// Optional operator-facing note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Bill {
    /// Quote `amount` units for `job_id`, payable for `ttl_secs` from now.
    pub fn new(job_id: impl Into<String>, worker_address: Address, amount: u64, ttl_secs: u64) -> Self {
        Self {
            job_id: job_id.into(),
            worker_address,
            amount,
            asset: DEFAULT_ASSET.to_string(),
            expires_at: unix_now() + ttl_secs,
            notes: None,
        }
    }

    /// Override the asset symbol
    pub fn with_asset(mut self, asset: impl Into<String>) -> Self {
        self.asset = asset.into();
        self
    }

    /// Attach an operator-facing note
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Whether the bill can still be paid at `now` (unix seconds)
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Whether the bill can still be paid right now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now())
    }
}

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Address {
        "0x00000000000000000000000000000000000000aa"
            .parse()
            .unwrap()
    }

    #[test]
    fn test_bill_expiry_boundary() {
        let bill = Bill::new("job-1", worker(), 1_000_000, 60);
        assert!(!bill.is_expired());
        assert!(bill.is_expired_at(bill.expires_at));
        assert!(bill.is_expired_at(bill.expires_at + 1));
        assert!(!bill.is_expired_at(bill.expires_at - 1));
    }

    #[test]
    fn test_bill_serialization_round_trip() {
        let bill = Bill::new("job-2", worker(), 250_000, 120).with_notes("summarize");
        let json = serde_json::to_string(&bill).unwrap();
        let back: Bill = serde_json::from_str(&json).unwrap();
        assert_eq!(bill, back);
        assert_eq!(back.asset, DEFAULT_ASSET);
    }

    #[test]
    fn test_bill_omits_empty_notes() {
        let bill = Bill::new("job-3", worker(), 1, 60);
        let json = serde_json::to_string(&bill).unwrap();
        assert!(!json.contains("notes"));
    }
}
