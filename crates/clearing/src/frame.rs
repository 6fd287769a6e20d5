//! Signed-message framing
//!
//! Outbound requests are `{"req": [id, method, params, ts], "sig": ["0x…"]}`
//! where the signature is ECDSA over the keccak digest of the serialized
//! `req` array. Inbound frames come in three shapes the parser folds into
//! two: `{"res": [id, method, payload, …]}`, `{"res": [id, "error", {…}]}`,
//! and `{"error": {"message": …}}` — the last two are treated uniformly.

use crate::error::{ClearingError, Result};
use alloy::primitives::{keccak256, Signature, B256};
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// An outbound RPC request before signing
#[derive(Debug, Clone)]
pub struct RequestFrame {
    /// Request id echoed by the response
    pub id: u64,
    /// RPC method name
    pub method: String,
    /// Method parameters
    pub params: Value,
    /// Milliseconds since the epoch
    pub ts: u64,
}

impl RequestFrame {
    /// Build a request stamped with the current time
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            id,
            method: method.into(),
            params,
            ts,
        }
    }

    /// The array the signature commits to
    pub fn signing_payload(&self) -> Value {
        json!([self.id, self.method, self.params, self.ts])
    }

    /// Keccak digest of the serialized signing payload
    pub fn digest(&self) -> Result<B256> {
        let bytes = serde_json::to_vec(&self.signing_payload())?;
        Ok(keccak256(bytes))
    }

    /// Assemble the wire text with a signature already produced for
    /// [`Self::digest`]
    pub fn into_wire(self, signature: &str) -> Result<String> {
        let wire = json!({
            "req": self.signing_payload(),
            "sig": [signature],
        });
        Ok(serde_json::to_string(&wire)?)
    }
}

/// Hex-encode a signature for the wire
pub fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(signature.as_bytes()))
}

/// A parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// A response or unsolicited notification
    Reply {
        /// Request id when the frame answers one
        id: Option<u64>,
        /// Method tag identifying the payload shape
        method: String,
        /// Method-specific payload
        payload: Value,
    },
    /// Either error shape, folded into one
    Error {
        /// Request id when the server echoed one
        id: Option<u64>,
        /// Server-reported message
        message: String,
    },
}

impl ServerFrame {
    /// Parse one inbound text frame.
    ///
    /// Unknown shapes are a protocol error; unknown *methods* are not — they
    /// parse fine and the session layer drops them.
    pub fn parse(text: &str) -> Result<ServerFrame> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ClearingError::Protocol(format!("unparseable frame: {e}")))?;

        if let Some(err) = value.get("error") {
            return Ok(ServerFrame::Error {
                id: None,
                message: error_message(err),
            });
        }

        let res = value
            .get("res")
            .and_then(Value::as_array)
            .ok_or_else(|| ClearingError::Protocol(format!("frame without res/error: {text}")))?;
        if res.len() < 2 {
            return Err(ClearingError::Protocol(format!("short res frame: {text}")));
        }

        let id = res[0].as_u64();
        let method = res[1].as_str().unwrap_or_default().to_string();
        let payload = res.get(2).cloned().unwrap_or(Value::Null);

        if method == "error" {
            return Ok(ServerFrame::Error {
                id,
                message: error_message(&payload),
            });
        }

        if method.is_empty() {
            return Err(ClearingError::Protocol(format!(
                "res frame without method: {text}"
            )));
        }

        Ok(ServerFrame::Reply {
            id,
            method,
            payload,
        })
    }
}

/// Servers spell the message field two ways; accept both
fn error_message(err: &Value) -> String {
    err.get("message")
        .or_else(|| err.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| err.to_string())
}

/// Whether a server error means "your signature was accepted; waiting for the
/// counterparty" on a quorum-2 session
pub fn is_quorum_pending(message: &str) -> bool {
    message.to_lowercase().contains("quorum not reached")
}
