//! App-session path: bilateral signed state updates
//!
//! An app session is a two-participant ledger whose evolution is a sequence
//! of numbered states. With `quorum = 1` the client drives alone; with
//! `quorum = 2` both participants submit the identical payload on their own
//! authenticated sessions, and whichever submission lands first is answered
//! with `quorum not reached` — which is progress, not failure.

use crate::error::{ClearingError, Result};
use crate::frame::is_quorum_pending;
use crate::session::{unix_now, ClearingSession};
use crate::types::{Allocation, AppSessionInfo, SessionDefinition};
use alloy::primitives::Address;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// State format revision sent in session definitions
const PROTOCOL_VERSION: &str = "NitroRPC/0.2";

/// Dispute challenge window for sessions, in seconds
const CHALLENGE_DURATION_SECS: u64 = 3600;

/// Poll cadence while waiting on the counterparty
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A created app session handle
#[derive(Debug, Clone)]
pub struct AppSession {
    /// Session identifier on the clearing network
    pub id: String,
    /// Latest version this side knows to be accepted
    pub version: u64,
}

/// Result of submitting a state (or a close) on a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The state is accepted by the clearing network
    Accepted {
        /// Version the acceptance applies to
        version: u64,
    },
    /// This side's signature was recorded; the counterparty has not signed
    /// the identical payload yet (`quorum = 2` only)
    PartiallySigned,
}

impl SubmitOutcome {
    /// Whether the submission made progress (either outcome does)
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted { .. })
    }
}

/// App-session operations over one authenticated session
pub struct AppSessionPath<'a> {
    session: &'a ClearingSession,
}

impl<'a> AppSessionPath<'a> {
    /// Operate on `session`
    pub fn new(session: &'a ClearingSession) -> Self {
        Self { session }
    }

    /// Create a session with `counterparty` and the given quorum.
    ///
    /// Participants are ordered `[self, counterparty]`, weights `[1, 1]`,
    /// allocations empty; the nonce is the current unix time, unique per
    /// session.
    pub async fn create(&self, counterparty: Address, quorum: u8) -> Result<AppSession> {
        let definition = SessionDefinition {
            application: self.session.application().to_string(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            participants: vec![self.session.identity(), counterparty],
            weights: vec![1, 1],
            quorum,
            challenge_duration: CHALLENGE_DURATION_SECS,
            nonce: unix_now(),
        };
        let params = json!({
            "definition": definition,
            "allocations": [],
        });

        let (_, payload) = self.session.call("create_app_session", params).await?;
        let id = payload
            .get("app_session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClearingError::Protocol("create_app_session without app_session_id".to_string())
            })?
            .to_string();
        let version = payload.get("version").and_then(Value::as_u64).unwrap_or(1);

        info!(session_id = %id, quorum, "app session created");
        Ok(AppSession {
            id,
            version,
        })
    }

    /// Submit the state `version` with the given allocations.
    ///
    /// Both participants of a `quorum = 2` session call this with payloads
    /// computed from the same shared inputs; the payloads must be identical.
    pub async fn submit_state(
        &self,
        session_id: &str,
        version: u64,
        allocations: &[Allocation],
    ) -> Result<SubmitOutcome> {
        let params = json!({
            "app_session_id": session_id,
            "intent": "operate",
            "version": version,
            "allocations": allocations,
        });

        match self
            .session
            .call_expecting("submit_app_state", params, &["submit_app_state", "asu"])
            .await
        {
            Ok((_, payload)) => {
                let accepted = payload
                    .get("version")
                    .and_then(Value::as_u64)
                    .unwrap_or(version);
                debug!(session_id, version = accepted, "state accepted");
                Ok(SubmitOutcome::Accepted { version: accepted })
            }
            Err(ClearingError::Server(message)) if is_quorum_pending(&message) => {
                debug!(session_id, version, "state partially signed");
                Ok(SubmitOutcome::PartiallySigned)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the session, allocating all funds back to participants.
    ///
    /// Closing is itself a state transition subject to quorum: on a
    /// `quorum = 2` session both sides send the identical payload and
    /// `quorum not reached` means "my signature accepted; waiting".
    pub async fn close(
        &self,
        session_id: &str,
        final_allocations: &[Allocation],
    ) -> Result<SubmitOutcome> {
        let params = json!({
            "app_session_id": session_id,
            "allocations": final_allocations,
        });

        match self
            .session
            .call_expecting("close_app_session", params, &["close_app_session", "asu"])
            .await
        {
            Ok((_, payload)) => {
                let version = payload.get("version").and_then(Value::as_u64).unwrap_or(0);
                info!(session_id, "app session closed");
                Ok(SubmitOutcome::Accepted { version })
            }
            Err(ClearingError::Server(message)) if is_quorum_pending(&message) => {
                debug!(session_id, "close partially signed");
                Ok(SubmitOutcome::PartiallySigned)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch the server's view of one session, if it knows it
    pub async fn fetch(&self, session_id: &str) -> Result<Option<AppSessionInfo>> {
        let (_, payload) = self
            .session
            .call(
                "get_app_sessions",
                json!({ "participant": self.session.identity() }),
            )
            .await?;
        let list = payload
            .as_array()
            .cloned()
            .or_else(|| {
                payload
                    .get("app_sessions")
                    .and_then(Value::as_array)
                    .cloned()
            })
            .unwrap_or_default();
        Ok(list
            .into_iter()
            .filter_map(|v| serde_json::from_value::<AppSessionInfo>(v).ok())
            .find(|s| s.app_session_id.eq_ignore_ascii_case(session_id)))
    }

    /// Poll until the session reports `version >= version`, or time out.
    ///
    /// Resolves a [`SubmitOutcome::PartiallySigned`] once the counterparty
    /// has signed the identical payload.
    pub async fn wait_for_state(
        &self,
        session_id: &str,
        version: u64,
        deadline: Duration,
    ) -> Result<AppSessionInfo> {
        let started = tokio::time::Instant::now();
        loop {
            if let Some(info) = self.fetch(session_id).await? {
                if info.version >= version {
                    return Ok(info);
                }
            }
            if started.elapsed() >= deadline {
                return Err(ClearingError::Timeout(format!(
                    "app session {session_id} did not reach version {version}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Poll until the session reports `closed`, or time out.
    ///
    /// The clearing server sometimes omits the acknowledgement after a
    /// two-party close; polling is the documented fallback.
    pub async fn wait_until_closed(&self, session_id: &str, deadline: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            match self.fetch(session_id).await? {
                Some(info) if info.is_closed() => return Ok(()),
                // A session the server no longer lists has been settled out.
                None => return Ok(()),
                Some(_) => {}
            }
            if started.elapsed() >= deadline {
                return Err(ClearingError::Timeout(format!(
                    "app session {session_id} did not close"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
