//! Worker server integration tests: the 402 handshake end to end
//!
//! A stub verifier stands in for the clearing network so every branch of the
//! handshake — quote, bad proof, expiry, idempotent replay, overload — can
//! be driven with plain HTTP.

use agentpay_broker::{
    worker_router, EchoCollaborator, ProofVerifier, StatusRecorder, WorkerConfig, WorkerState,
};
use agentpay_protocol::{Bill, BillQuote, HealthReport, JobResult, JobSubmission, PaymentProof};
use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn worker_address() -> Address {
    Address::repeat_byte(0xaa)
}

/// Verifier that always answers the same way
struct StubVerifier {
    accept: bool,
}

#[async_trait]
impl ProofVerifier for StubVerifier {
    async fn verify(
        &self,
        _proof: &PaymentProof,
        _bill: &Bill,
        _requester: Option<Address>,
    ) -> agentpay_broker::Result<bool> {
        Ok(self.accept)
    }
}

struct Harness {
    base: String,
    collaborator: Arc<EchoCollaborator>,
    client: reqwest::Client,
}

async fn spawn_worker(config: WorkerConfig, accept: bool, status: StatusRecorder) -> Harness {
    let collaborator = Arc::new(EchoCollaborator::new());
    let state = Arc::new(
        WorkerState::new(
            config,
            Arc::new(StubVerifier { accept }),
            collaborator.clone(),
        )
        .with_status(status),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, worker_router(state)).await.unwrap();
    });
    Harness {
        base: format!("http://{addr}"),
        collaborator,
        client: reqwest::Client::new(),
    }
}

fn good_proof(bill: &Bill) -> PaymentProof {
    PaymentProof::channel_close(
        format!("0x{}", "ab".repeat(32)),
        bill.amount,
        bill.worker_address,
    )
}

async fn submit_new(harness: &Harness, task: &str) -> (u16, BillQuote) {
    let response = harness
        .client
        .post(format!("{}/job", harness.base))
        .json(&JobSubmission::new(task, json!({"doc": "hello"})))
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn resubmit(
    harness: &Harness,
    task: &str,
    job_id: &str,
    proof: PaymentProof,
) -> reqwest::Response {
    harness
        .client
        .post(format!("{}/job", harness.base))
        .json(&JobSubmission::new(task, json!({"doc": "hello"})).with_proof(job_id, proof))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_first_submission_gets_402_with_bill() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        true,
        StatusRecorder::default(),
    )
    .await;

    let (status, quote) = submit_new(&harness, "summarize").await;
    assert_eq!(status, 402);
    assert_eq!(quote.reason, "payment_required");
    assert!(quote.job_id.starts_with("summarize-"));
    assert_eq!(quote.bill.amount, 1_000_000);
    assert_eq!(quote.bill.worker_address, worker_address());
    assert!(!quote.bill.is_expired());
    assert_eq!(harness.collaborator.calls(), 0);
}

#[tokio::test]
async fn test_paid_resubmission_runs_work_and_replays_idempotently() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        true,
        StatusRecorder::default(),
    )
    .await;

    let (_, quote) = submit_new(&harness, "summarize").await;
    let proof = good_proof(&quote.bill);

    let response = resubmit(&harness, "summarize", &quote.job_id, proof.clone()).await;
    assert_eq!(response.status().as_u16(), 200);
    let result: JobResult = response.json().await.unwrap();
    let first_body = serde_json::to_value(&result).unwrap();
    assert_eq!(first_body["status"], "completed");
    assert_eq!(first_body["result"]["echo"]["doc"], "hello");
    assert_eq!(harness.collaborator.calls(), 1);

    // Same job, same proof: identical cached result, no second run.
    let replay = resubmit(&harness, "summarize", &quote.job_id, proof).await;
    assert_eq!(replay.status().as_u16(), 200);
    let replay_body: Value = replay.json().await.unwrap();
    assert_eq!(replay_body, first_body);
    assert_eq!(harness.collaborator.calls(), 1);

    // Same job, different proof: rejected after the first was accepted.
    let other = PaymentProof::channel_close(
        format!("0x{}", "cd".repeat(32)),
        quote.bill.amount,
        quote.bill.worker_address,
    );
    let conflict = resubmit(&harness, "summarize", &quote.job_id, other).await;
    assert_eq!(conflict.status().as_u16(), 409);
    let body: Value = conflict.json().await.unwrap();
    assert_eq!(body["reason"], "proof_mismatch");
}

#[tokio::test]
async fn test_bad_proof_gets_same_bill_and_no_work() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        false,
        StatusRecorder::default(),
    )
    .await;

    let (_, quote) = submit_new(&harness, "summarize").await;
    let response = resubmit(&harness, "summarize", &quote.job_id, good_proof(&quote.bill)).await;
    assert_eq!(response.status().as_u16(), 402);
    let requote: BillQuote = response.json().await.unwrap();
    assert_eq!(requote.reason, "verification_failed");
    assert_eq!(requote.job_id, quote.job_id);
    assert_eq!(requote.bill, quote.bill);
    assert_eq!(harness.collaborator.calls(), 0);
}

#[tokio::test]
async fn test_expired_bill_is_reissued() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()).with_bill_ttl(1),
        true,
        StatusRecorder::default(),
    )
    .await;

    let (_, quote) = submit_new(&harness, "summarize").await;
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let response = resubmit(&harness, "summarize", &quote.job_id, good_proof(&quote.bill)).await;
    assert_eq!(response.status().as_u16(), 402);
    let requote: BillQuote = response.json().await.unwrap();
    assert_eq!(requote.reason, "bill_expired");
    assert_eq!(requote.job_id, quote.job_id);
    assert!(requote.bill.expires_at >= quote.bill.expires_at);
    assert_eq!(harness.collaborator.calls(), 0);

    // The fresh quote is payable immediately.
    let paid = resubmit(&harness, "summarize", &quote.job_id, good_proof(&requote.bill)).await;
    assert_eq!(paid.status().as_u16(), 200);
    assert_eq!(harness.collaborator.calls(), 1);
}

#[tokio::test]
async fn test_overload_refuses_new_jobs() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()).with_max_open_jobs(1),
        true,
        StatusRecorder::default(),
    )
    .await;

    let (status, _) = submit_new(&harness, "summarize").await;
    assert_eq!(status, 402);

    let response = harness
        .client
        .post(format!("{}/job", harness.base))
        .json(&JobSubmission::new("translate", json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "overloaded");
}

#[tokio::test]
async fn test_unknown_job_and_bad_body() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        true,
        StatusRecorder::default(),
    )
    .await;

    let bill = Bill::new("ghost", worker_address(), 1, 60);
    let response = resubmit(&harness, "summarize", "ghost", good_proof(&bill)).await;
    assert_eq!(response.status().as_u16(), 404);

    let response = harness
        .client
        .post(format!("{}/job", harness.base))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn test_health_reports_open_jobs() {
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        true,
        StatusRecorder::default(),
    )
    .await;

    let health: HealthReport = harness
        .client
        .get(format!("{}/health", harness.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.address, worker_address());
    assert_eq!(health.open_jobs, 0);

    submit_new(&harness, "summarize").await;
    let health: HealthReport = harness
        .client
        .get(format!("{}/health", harness.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health.open_jobs, 1);
}

#[tokio::test]
async fn test_status_record_follows_transitions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let harness = spawn_worker(
        WorkerConfig::new(worker_address()),
        true,
        StatusRecorder::new(Some(path.clone())),
    )
    .await;

    let (_, quote) = submit_new(&harness, "summarize").await;
    let offered: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(offered["status"], "offered");

    resubmit(&harness, "summarize", &quote.job_id, good_proof(&quote.bill)).await;
    let completed: Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(completed["status"], "completed");
    assert_eq!(completed["task_type"], "summarize");
}
