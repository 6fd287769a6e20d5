//! Integration tests against an in-process mock clearing server
//!
//! The mock speaks the real framing (`{"req": …}` / `{"res": …}` /
//! `{"error": …}`), runs the auth handshake, pushes a `channels` snapshot
//! after `auth_verify`, and enforces quorum rules on app sessions — including
//! the sandbox quirk of answering a completed two-party close with
//! `quorum not reached`, which forces clients onto the polling fallback.

use agentpay_clearing::{
    AppSessionPath, Allocation, ChannelPath, ClearingConfig, ClearingError, ClearingSession,
    SettlementClient, SettlementConfig, SubmitOutcome,
};
use agentpay_wallet::AgentWallet;
use alloy::primitives::Address;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const CLIENT_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const WORKER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

#[derive(Default)]
struct MockSessionState {
    quorum: u8,
    version: u64,
    status: String,
    /// Allocations of the latest accepted state, as submitted
    allocations: Value,
    pending_state: Option<(u64, Value, Address)>,
    pending_close: Option<(Value, Address)>,
}

#[derive(Default)]
struct MockClearing {
    /// Channels snapshot pushed after auth
    channels: Vec<Value>,
    /// Unified balances returned by `get_ledger_balances`
    balances: Vec<Value>,
    /// Methods to swallow without answering
    blackhole: HashSet<String>,
    /// App sessions by id
    sessions: Mutex<HashMap<String, MockSessionState>>,
    /// Close codes observed from clients
    close_codes: Mutex<Vec<u16>>,
}

impl MockClearing {
    fn with_channels(mut self, channels: Vec<Value>) -> Self {
        self.channels = channels;
        self
    }

    fn with_balances(mut self, balances: Vec<Value>) -> Self {
        self.balances = balances;
        self
    }

    fn swallowing(mut self, method: &str) -> Self {
        self.blackhole.insert(method.to_string());
        self
    }
}

async fn spawn_mock(state: MockClearing) -> (String, Arc<MockClearing>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    let state = Arc::new(state);
    let accept_state = state.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let conn_state = accept_state.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    serve_connection(ws, conn_state).await;
                }
            });
        }
    });
    (format!("ws://{addr}"), state)
}

async fn serve_connection(mut ws: WebSocketStream<TcpStream>, state: Arc<MockClearing>) {
    // Set by auth_request; quorum attribution needs to know who is talking.
    let mut identity = Address::ZERO;

    while let Some(Ok(message)) = ws.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    state
                        .close_codes
                        .lock()
                        .unwrap()
                        .push(frame.code.into());
                }
                break;
            }
            _ => continue,
        };

        let envelope: Value = serde_json::from_str(text.as_str()).expect("mock: json frame");
        let req = envelope.get("req").and_then(Value::as_array).expect("req");
        let id = req[0].as_u64().expect("req id");
        let method = req[1].as_str().expect("req method").to_string();
        let params = req.get(2).cloned().unwrap_or(Value::Null);
        assert!(
            envelope["sig"][0].as_str().unwrap_or("").starts_with("0x"),
            "mock: frame must be signed"
        );

        if state.blackhole.contains(&method) {
            continue;
        }

        let replies = handle_request(&state, &mut identity, id, &method, &params);
        for reply in replies {
            if ws.send(Message::text(reply.to_string())).await.is_err() {
                return;
            }
        }
    }
}

fn handle_request(
    state: &MockClearing,
    identity: &mut Address,
    id: u64,
    method: &str,
    params: &Value,
) -> Vec<Value> {
    match method {
        "auth_request" => {
            *identity = params["address"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or(Address::ZERO);
            vec![json!({"res": [id, "auth_challenge", {"challenge_message": "mock-challenge"}]})]
        }
        "auth_verify" => {
            let mut out = vec![json!({"res": [id, "auth_verify", {"success": true}]})];
            out.push(json!({"res": [0, "channels", state.channels]}));
            out.push(json!({"res": [0, "assets", [{"symbol": "ytest.usd", "decimals": 6}]]}));
            out
        }
        "get_ledger_balances" => {
            vec![json!({"res": [id, "get_ledger_balances", state.balances]})]
        }
        "create_app_session" => {
            let quorum = params["definition"]["quorum"].as_u64().unwrap_or(1) as u8;
            let session_id = format!("0xs{:064}", state.sessions.lock().unwrap().len() + 1);
            state.sessions.lock().unwrap().insert(
                session_id.clone(),
                MockSessionState {
                    quorum,
                    version: 1,
                    status: "open".to_string(),
                    allocations: Value::Array(Vec::new()),
                    ..Default::default()
                },
            );
            vec![json!({"res": [id, "create_app_session",
                {"app_session_id": session_id, "version": 1, "status": "open"}]})]
        }
        "submit_app_state" => {
            let session_id = params["app_session_id"].as_str().unwrap_or_default();
            let version = params["version"].as_u64().unwrap_or(0);
            let allocations = params["allocations"].clone();
            let mut sessions = state.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(session_id) else {
                return vec![json!({"res": [id, "error", {"message": "unknown session"}]})];
            };
            if version != session.version + 1 {
                return vec![json!({"res": [id, "error",
                    {"message": format!("version {version} does not follow {}", session.version)}]})];
            }
            if session.quorum <= 1 {
                session.version = version;
                session.allocations = allocations;
                return vec![
                    json!({"res": [id, "submit_app_state", {"app_session_id": session_id, "version": version}]}),
                ];
            }
            match session.pending_state.take() {
                None => {
                    session.pending_state = Some((version, allocations, *identity));
                    vec![json!({"error": {"message": "quorum not reached (1 of 2)"}})]
                }
                Some((pv, pa, signer)) if signer == *identity => {
                    session.pending_state = Some((pv, pa, signer));
                    vec![json!({"res": [id, "error", {"message": "duplicate signature"}]})]
                }
                Some((pv, pa, _)) if pv == version && pa == allocations => {
                    session.version = version;
                    session.allocations = allocations;
                    vec![
                        json!({"res": [id, "submit_app_state", {"app_session_id": session_id, "version": version}]}),
                    ]
                }
                Some(_) => {
                    vec![json!({"res": [id, "error", {"message": "state payload mismatch"}]})]
                }
            }
        }
        "close_app_session" => {
            let session_id = params["app_session_id"].as_str().unwrap_or_default();
            let allocations = params["allocations"].clone();
            let mut sessions = state.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(session_id) else {
                return vec![json!({"res": [id, "error", {"message": "unknown session"}]})];
            };
            if session.quorum <= 1 {
                session.status = "closed".to_string();
                session.version += 1;
                session.allocations = allocations;
                return vec![
                    json!({"res": [id, "close_app_session", {"app_session_id": session_id, "version": session.version}]}),
                ];
            }
            match session.pending_close.take() {
                None => {
                    session.pending_close = Some((allocations, *identity));
                    vec![json!({"error": {"message": "quorum not reached (1 of 2)"}})]
                }
                Some((pa, signer)) if signer != *identity && pa == allocations => {
                    // Close completes, but the sandbox omits the success
                    // acknowledgement; clients must poll session status.
                    session.status = "closed".to_string();
                    session.version += 1;
                    session.allocations = pa;
                    vec![json!({"error": {"message": "quorum not reached (2 of 2)"}})]
                }
                Some(pending) => {
                    session.pending_close = Some(pending);
                    vec![json!({"error": {"message": "quorum not reached (1 of 2)"}})]
                }
            }
        }
        "get_app_sessions" => {
            let sessions = state.sessions.lock().unwrap();
            let list: Vec<Value> = sessions
                .iter()
                .map(|(sid, s)| {
                    json!({
                        "app_session_id": sid,
                        "status": s.status,
                        "version": s.version,
                        "allocations": s.allocations,
                    })
                })
                .collect();
            vec![json!({"res": [id, "get_app_sessions", {"app_sessions": list}]})]
        }
        "transfer" => {
            vec![json!({"res": [id, "transfer", {"status": "completed"}]})]
        }
        other => {
            vec![json!({"res": [id, "error", {"message": format!("unknown method {other}")}]})]
        }
    }
}

fn config_for(endpoint: &str) -> ClearingConfig {
    ClearingConfig::new(endpoint)
}

fn client_wallet() -> AgentWallet {
    AgentWallet::from_key(CLIENT_KEY).unwrap()
}

fn worker_wallet() -> AgentWallet {
    AgentWallet::from_key(WORKER_KEY).unwrap()
}

fn pay_allocations(client: Address, worker: Address, amount: u64) -> Vec<Allocation> {
    vec![
        Allocation::new(client, "ytest.usd", 0),
        Allocation::new(worker, "ytest.usd", amount),
    ]
}

fn local_settlement(wallet: &AgentWallet) -> SettlementClient {
    // Never actually reached by these tests; transfer is pure clearing RPC.
    SettlementClient::new(
        SettlementConfig::with_rpc("http://127.0.0.1:1"),
        wallet.clone(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_auth_handshake_and_ledger_balances() {
    let (endpoint, _state) = spawn_mock(MockClearing::default().with_balances(vec![
        json!({"asset": "ytest.usd", "amount": "5000000"}),
    ]))
    .await;

    let session = ClearingSession::connect(config_for(&endpoint), &client_wallet())
        .await
        .expect("auth should succeed");
    assert_eq!(session.identity(), client_wallet().address());
    assert_ne!(session.session_address(), session.identity());

    let balances = session.ledger_balances().await.unwrap();
    assert_eq!(balances.len(), 1);
    assert_eq!(balances[0].asset, "ytest.usd");
    assert_eq!(balances[0].amount, 5_000_000);
}

#[tokio::test]
async fn test_channels_snapshot_arrives_after_auth() {
    let (endpoint, _state) = spawn_mock(MockClearing::default().with_channels(vec![
        json!({"channel_id": "0xchan", "status": "open", "amount": 0}),
    ]))
    .await;

    let session = ClearingSession::connect(config_for(&endpoint), &client_wallet())
        .await
        .unwrap();
    let channels = session.channels(Duration::from_secs(2)).await;
    assert_eq!(channels.len(), 1);
    assert!(channels[0].is_open());
    assert_eq!(channels[0].amount, 0);
}

#[tokio::test]
async fn test_single_party_session_lifecycle() {
    let (endpoint, _state) = spawn_mock(MockClearing::default()).await;
    let wallet = client_wallet();
    let session = ClearingSession::connect(config_for(&endpoint), &wallet)
        .await
        .unwrap();
    let path = AppSessionPath::new(&session);

    let created = path.create(worker_wallet().address(), 1).await.unwrap();
    assert_eq!(created.version, 1);

    let allocations = pay_allocations(wallet.address(), worker_wallet().address(), 1_000_000);
    let outcome = path
        .submit_state(&created.id, 2, &allocations)
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Accepted { version: 2 });

    let outcome = path.close(&created.id, &allocations).await.unwrap();
    assert!(outcome.is_accepted());

    let info = path.fetch(&created.id).await.unwrap().unwrap();
    assert!(info.is_closed());
}

#[tokio::test]
async fn test_version_gap_is_rejected() {
    let (endpoint, _state) = spawn_mock(MockClearing::default()).await;
    let wallet = client_wallet();
    let session = ClearingSession::connect(config_for(&endpoint), &wallet)
        .await
        .unwrap();
    let path = AppSessionPath::new(&session);

    let created = path.create(worker_wallet().address(), 1).await.unwrap();
    let allocations = pay_allocations(wallet.address(), worker_wallet().address(), 1);

    let err = path
        .submit_state(&created.id, 3, &allocations)
        .await
        .unwrap_err();
    match err {
        ClearingError::Server(message) => assert!(message.contains("version")),
        other => panic!("expected server rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_two_party_quorum_race_resolves() {
    let (endpoint, _state) = spawn_mock(MockClearing::default()).await;
    let client = client_wallet();
    let worker = worker_wallet();

    let client_session = ClearingSession::connect(config_for(&endpoint), &client)
        .await
        .unwrap();
    let worker_session = ClearingSession::connect(config_for(&endpoint), &worker)
        .await
        .unwrap();
    let client_path = AppSessionPath::new(&client_session);
    let worker_path = AppSessionPath::new(&worker_session);

    let created = client_path.create(worker.address(), 2).await.unwrap();
    let allocations = pay_allocations(client.address(), worker.address(), 1_000_000);

    // Client lands first: signature recorded, quorum pending.
    let first = client_path
        .submit_state(&created.id, 2, &allocations)
        .await
        .unwrap();
    assert_eq!(first, SubmitOutcome::PartiallySigned);

    // Worker submits the identical payload computed from shared inputs.
    let second = worker_path
        .submit_state(&created.id, 2, &allocations)
        .await
        .unwrap();
    assert_eq!(second, SubmitOutcome::Accepted { version: 2 });

    // The pending side observes acceptance within the grace window.
    let info = client_path
        .wait_for_state(&created.id, 2, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(info.version, 2);
}

#[tokio::test]
async fn test_two_party_close_falls_back_to_polling() {
    let (endpoint, _state) = spawn_mock(MockClearing::default()).await;
    let client = client_wallet();
    let worker = worker_wallet();

    let client_session = ClearingSession::connect(config_for(&endpoint), &client)
        .await
        .unwrap();
    let worker_session = ClearingSession::connect(config_for(&endpoint), &worker)
        .await
        .unwrap();
    let client_path = AppSessionPath::new(&client_session);
    let worker_path = AppSessionPath::new(&worker_session);

    let created = client_path.create(worker.address(), 2).await.unwrap();
    let allocations = pay_allocations(client.address(), worker.address(), 1_000_000);

    client_path
        .submit_state(&created.id, 2, &allocations)
        .await
        .unwrap();
    worker_path
        .submit_state(&created.id, 2, &allocations)
        .await
        .unwrap();

    // The sandbox acknowledges neither close; both sides see quorum pending
    // and must poll for the closed status.
    let first = client_path.close(&created.id, &allocations).await.unwrap();
    assert_eq!(first, SubmitOutcome::PartiallySigned);
    let second = worker_path.close(&created.id, &allocations).await.unwrap();
    assert_eq!(second, SubmitOutcome::PartiallySigned);

    client_path
        .wait_until_closed(&created.id, Duration::from_secs(5))
        .await
        .expect("polling should observe the close");
}

#[tokio::test]
async fn test_zero_unit_transfer_succeeds() {
    let (endpoint, _state) = spawn_mock(MockClearing::default().with_channels(vec![
        json!({"channel_id": "0xchan", "status": "open", "amount": 0}),
    ]))
    .await;
    let wallet = client_wallet();
    let settlement = local_settlement(&wallet);
    let session = ClearingSession::connect(config_for(&endpoint), &wallet)
        .await
        .unwrap();

    ChannelPath::new(&session, &settlement)
        .transfer(worker_wallet().address(), "ytest.usd", 0)
        .await
        .expect("zero transfer is a no-op, not an error");
}

#[tokio::test]
async fn test_transfer_requires_zero_onchain_balance() {
    let (endpoint, _state) = spawn_mock(MockClearing::default().with_channels(vec![
        json!({"channel_id": "0xchan", "status": "open", "amount": 250000}),
    ]))
    .await;
    let wallet = client_wallet();
    let settlement = local_settlement(&wallet);
    let session = ClearingSession::connect(config_for(&endpoint), &wallet)
        .await
        .unwrap();

    let err = ChannelPath::new(&session, &settlement)
        .transfer(worker_wallet().address(), "ytest.usd", 1_000_000)
        .await
        .unwrap_err();
    match err {
        ClearingError::ChannelBalanceNotZero { amount, .. } => assert_eq!(amount, 250_000),
        other => panic!("expected balance guard, got {other:?}"),
    }
}

#[tokio::test]
async fn test_call_timeout_closes_socket_cleanly() {
    let (endpoint, state) =
        spawn_mock(MockClearing::default().swallowing("get_ledger_balances")).await;
    let mut config = config_for(&endpoint);
    config.call_deadline_override = Some(Duration::from_millis(300));

    let session = ClearingSession::connect(config, &client_wallet())
        .await
        .unwrap();
    let err = session.ledger_balances().await.unwrap_err();
    assert!(matches!(err, ClearingError::Timeout(_)));

    // The session closed the socket with code 1000 (normal closure).
    tokio::time::sleep(Duration::from_millis(200)).await;
    let codes = state.close_codes.lock().unwrap().clone();
    assert_eq!(codes, vec![1000]);
}
