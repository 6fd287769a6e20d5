//! Authenticated clearing-network session
//!
//! One websocket connection, one ephemeral key, one reader loop. The session
//! is a small actor: callers issue one logical request at a time, a
//! correlation table matches inbound frames to the pending call, and
//! everything unsolicited (`channels` snapshots, `asu`/`bu` notifications,
//! `assets` dumps) is absorbed here so callers never see raw frames.

use crate::error::{ClearingError, Result};
use crate::frame::{signature_hex, RequestFrame, ServerFrame};
use crate::types::ChannelSnapshot;
use agentpay_wallet::{AgentWallet, SessionKey};
use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::Eip712Domain;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<Mutex<SplitSink<WsStream, Message>>>;

sol! {
    /// Spending allowance granted to the session key
    struct Allowance {
        string asset;
        string amount;
    }

    /// The payload the identity key signs to bless a session key
    struct Policy {
        string challenge;
        string scope;
        address wallet;
        string application;
        address participant;
        uint256 expire;
        Allowance[] allowances;
    }
}

/// Scope string granted to session keys
const SESSION_SCOPE: &str = "console";

/// Session-key authorization lifetime in seconds
const SESSION_EXPIRY_SECS: u64 = 3600;

/// Connection settings for the clearing network
#[derive(Debug, Clone)]
pub struct ClearingConfig {
    /// Websocket endpoint, e.g. a sandbox `wss://…/ws`
    pub endpoint: String,
    /// Application name presented at auth and used as the EIP-712 domain
    pub application: String,
    /// Deadline for the TCP/TLS/websocket handshake
    pub connect_timeout: Duration,
    /// When set, overrides the per-kind call deadline (tests)
    pub call_deadline_override: Option<Duration>,
}

impl Default for ClearingConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://clearnet-sandbox.yellow.com/ws".to_string(),
            application: "agentpay".to_string(),
            connect_timeout: Duration::from_secs(10),
            call_deadline_override: None,
        }
    }
}

impl ClearingConfig {
    /// Config for a given endpoint, defaults elsewhere
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }
}

/// Deadline for one logical call, by method kind.
///
/// On-chain-adjacent methods get the long end of the 20–60 s window; auth and
/// simple queries the short end.
fn call_deadline(method: &str) -> Duration {
    match method {
        "auth_request" | "auth_verify" => Duration::from_secs(20),
        "create_channel" | "close_channel" | "transfer" => Duration::from_secs(60),
        "get_app_sessions" | "get_ledger_balances" => Duration::from_secs(20),
        _ => Duration::from_secs(30),
    }
}

/// Reply routed to a pending caller
#[derive(Debug)]
pub(crate) enum ServerReply {
    Result { method: String, payload: Value },
    Error { message: String },
}

struct Waiter {
    id: u64,
    expect: Vec<String>,
    tx: oneshot::Sender<ServerReply>,
}

/// An authenticated connection to the clearing network
pub struct ClearingSession {
    config: ClearingConfig,
    identity: Address,
    session_key: SessionKey,
    writer: WsWriter,
    pending: Arc<StdMutex<Vec<Waiter>>>,
    channels: Arc<StdRwLock<Vec<ChannelSnapshot>>>,
    channels_seen: Arc<Notify>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl ClearingSession {
    /// Connect and run the auth handshake.
    ///
    /// Generates a fresh session key, sends `auth_request`, answers the
    /// `auth_challenge` with an EIP-712 signature from the identity key, and
    /// fails with [`ClearingError::AuthRejected`] if the server declines.
    pub async fn connect(config: ClearingConfig, wallet: &AgentWallet) -> Result<Self> {
        let ws = match timeout(config.connect_timeout, connect_async(&config.endpoint)).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => return Err(ClearingError::Transport(e.to_string())),
            Err(_) => {
                return Err(ClearingError::Timeout(format!(
                    "connect to {}",
                    config.endpoint
                )))
            }
        };
        debug!(endpoint = %config.endpoint, "clearing socket connected");

        let (sink, stream) = ws.split();
        let writer: WsWriter = Arc::new(Mutex::new(sink));
        let pending: Arc<StdMutex<Vec<Waiter>>> = Arc::new(StdMutex::new(Vec::new()));
        let channels = Arc::new(StdRwLock::new(Vec::new()));
        let channels_seen = Arc::new(Notify::new());

        let reader = spawn_reader(
            stream,
            writer.clone(),
            pending.clone(),
            channels.clone(),
            channels_seen.clone(),
        );

        let session = Self {
            config,
            identity: wallet.address(),
            session_key: wallet.ephemeral_keypair(),
            writer,
            pending,
            channels,
            channels_seen,
            next_id: AtomicU64::new(1),
            reader,
        };

        session.authenticate(wallet).await?;
        Ok(session)
    }

    /// The identity address this session authenticated as
    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Address of the ephemeral key signing this session's frames
    pub fn session_address(&self) -> Address {
        self.session_key.address()
    }

    /// Application name presented at auth
    pub fn application(&self) -> &str {
        &self.config.application
    }

    async fn authenticate(&self, wallet: &AgentWallet) -> Result<()> {
        let expire = unix_now() + SESSION_EXPIRY_SECS;
        let params = json!({
            "address": self.identity,
            "application": self.config.application,
            "session_key": self.session_key.address(),
            "allowances": [],
            "expires_at": expire,
            "scope": SESSION_SCOPE,
        });

        let (_, payload) = self
            .call_expecting("auth_request", params, &["auth_challenge"])
            .await
            .map_err(|e| match e {
                ClearingError::Server(message) => ClearingError::AuthRejected(message),
                other => other,
            })?;

        let challenge = payload
            .get("challenge_message")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ClearingError::Protocol("auth_challenge without challenge_message".to_string())
            })?;

        let policy = Policy {
            challenge: challenge.to_string(),
            scope: SESSION_SCOPE.to_string(),
            wallet: self.identity,
            application: self.config.application.clone(),
            participant: self.session_key.address(),
            expire: U256::from(expire),
            allowances: Vec::new(),
        };
        let domain = Eip712Domain {
            name: Some(Cow::Owned(self.config.application.clone())),
            ..Default::default()
        };
        let signature = wallet.eip712_sign(&domain, &policy)?;

        let verify = self
            .call_signed(
                "auth_verify",
                json!({ "challenge": challenge }),
                Some(signature_hex(&signature)),
                &["auth_verify"],
            )
            .await;

        match verify {
            Ok((_, payload)) => {
                if payload.get("success").and_then(Value::as_bool) == Some(false) {
                    return Err(ClearingError::AuthRejected(payload.to_string()));
                }
                debug!(identity = %self.identity, session = %self.session_key.address(),
                       "clearing auth verified");
                Ok(())
            }
            Err(ClearingError::Server(message)) => Err(ClearingError::AuthRejected(message)),
            Err(other) => Err(other),
        }
    }

    /// Issue one signed request and await its named response.
    ///
    /// The response matches by request id or by one of the method names in
    /// `expect` (servers answer some requests under a different method tag,
    /// e.g. `asu` for an accepted state update). On deadline the socket is
    /// closed with code 1000 and the call fails with
    /// [`ClearingError::Timeout`]; the caller retries at a higher level.
    pub async fn call_expecting(
        &self,
        method: &str,
        params: Value,
        expect: &[&str],
    ) -> Result<(String, Value)> {
        self.call_signed(method, params, None, expect).await
    }

    /// [`Self::call_expecting`] expecting the echo of the request method
    pub async fn call(&self, method: &str, params: Value) -> Result<(String, Value)> {
        self.call_signed(method, params, None, &[method]).await
    }

    async fn call_signed(
        &self,
        method: &str,
        params: Value,
        sig_override: Option<String>,
        expect: &[&str],
    ) -> Result<(String, Value)> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = RequestFrame::new(id, method, params);
        let signature = match sig_override {
            Some(sig) => sig,
            None => signature_hex(&self.session_key.sign_hash(frame.digest()?)?),
        };
        let wire = frame.into_wire(&signature)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").push(Waiter {
            id,
            expect: expect.iter().map(|s| s.to_string()).collect(),
            tx,
        });

        debug!(%id, method, "clearing request");
        if let Err(e) = self.writer.lock().await.send(Message::text(wire)).await {
            self.forget_waiter(id);
            return Err(ClearingError::Transport(e.to_string()));
        }

        let deadline = self
            .config
            .call_deadline_override
            .unwrap_or_else(|| call_deadline(method));
        match timeout(deadline, rx).await {
            Ok(Ok(ServerReply::Result { method, payload })) => Ok((method, payload)),
            Ok(Ok(ServerReply::Error { message })) => Err(ClearingError::Server(message)),
            Ok(Err(_)) => Err(ClearingError::Cancelled),
            Err(_) => {
                self.forget_waiter(id);
                self.close().await;
                Err(ClearingError::Timeout(method.to_string()))
            }
        }
    }

    fn forget_waiter(&self, id: u64) {
        self.pending
            .lock()
            .expect("pending lock")
            .retain(|w| w.id != id);
    }

    /// Unified-balance entries for this identity
    pub async fn ledger_balances(&self) -> Result<Vec<crate::types::LedgerBalance>> {
        let (_, payload) = self
            .call("get_ledger_balances", json!({ "participant": self.identity }))
            .await?;
        let list = payload
            .as_array()
            .cloned()
            .or_else(|| {
                payload
                    .get("ledger_balances")
                    .and_then(Value::as_array)
                    .cloned()
            })
            .unwrap_or_default();
        Ok(list
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect())
    }

    /// The latest `channels` snapshot, waiting up to `wait` for the server's
    /// post-auth push if none has arrived yet
    pub async fn channels(&self, wait: Duration) -> Vec<ChannelSnapshot> {
        {
            let current = self.channels.read().expect("channels lock");
            if !current.is_empty() {
                return current.clone();
            }
        }
        let _ = timeout(wait, self.channels_seen.notified()).await;
        self.channels.read().expect("channels lock").clone()
    }

    /// Close the socket cleanly with code 1000
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer
            .send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })))
            .await;
    }
}

impl Drop for ClearingSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn spawn_reader(
    mut stream: SplitStream<WsStream>,
    writer: WsWriter,
    pending: Arc<StdMutex<Vec<Waiter>>>,
    channels: Arc<StdRwLock<Vec<ChannelSnapshot>>>,
    channels_seen: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    dispatch_frame(text.as_str(), &pending, &channels, &channels_seen);
                }
                Ok(Message::Ping(data)) => {
                    let _ = writer.lock().await.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) => {
                    debug!("clearing server closed connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "clearing socket read failed");
                    break;
                }
            }
        }
        // Dropping the senders fails every pending call with Cancelled.
        pending.lock().expect("pending lock").clear();
    })
}

fn dispatch_frame(
    text: &str,
    pending: &StdMutex<Vec<Waiter>>,
    channels: &StdRwLock<Vec<ChannelSnapshot>>,
    channels_seen: &Notify,
) {
    let frame = match ServerFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping unparseable clearing frame");
            return;
        }
    };

    let mut waiters = pending.lock().expect("pending lock");
    let matched = match &frame {
        ServerFrame::Reply { id, method, .. } => waiters
            .iter()
            .position(|w| *id == Some(w.id) || w.expect.iter().any(|m| m == method)),
        // Error frames do not always echo the request id; with one request
        // in flight per session the oldest waiter owns an id-less error.
        ServerFrame::Error { id, .. } => match id {
            Some(id) => waiters.iter().position(|w| w.id == *id),
            None => (!waiters.is_empty()).then_some(0),
        },
    };

    if let Some(index) = matched {
        let waiter = waiters.remove(index);
        let reply = match frame {
            ServerFrame::Reply {
                method, payload, ..
            } => ServerReply::Result { method, payload },
            ServerFrame::Error { message, .. } => ServerReply::Error { message },
        };
        let _ = waiter.tx.send(reply);
        return;
    }
    drop(waiters);

    match frame {
        ServerFrame::Reply {
            method, payload, ..
        } => match method.as_str() {
            "channels" => {
                let snapshot = parse_channels(&payload);
                debug!(count = snapshot.len(), "channels snapshot");
                *channels.write().expect("channels lock") = snapshot;
                channels_seen.notify_waiters();
            }
            "asu" | "bu" => {
                debug!(method, "clearing notification");
            }
            "assets" => {
                // Catalogue dump; only interesting when explicitly requested.
            }
            other => {
                debug!(method = other, "ignoring unknown clearing method");
            }
        },
        ServerFrame::Error { message, .. } => {
            warn!(%message, "unmatched clearing error frame");
        }
    }
}

fn parse_channels(payload: &Value) -> Vec<ChannelSnapshot> {
    let list = payload
        .as_array()
        .cloned()
        .or_else(|| payload.get("channels").and_then(Value::as_array).cloned())
        .unwrap_or_default();
    list.into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

/// Current unix time in seconds
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
