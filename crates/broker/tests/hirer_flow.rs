//! Hirer flow tests against a mocked worker
//!
//! `wiremock` plays the worker so the full client sequence — submit, 402,
//! pay, resubmit, result — runs without a clearing network; a stub payment
//! driver records what was paid.

use agentpay_broker::{Hirer, PaymentDriver};
use agentpay_clearing::PaymentPath;
use agentpay_protocol::{Bill, BillQuote, JobResult, JobSubmission, PaymentProof};
use alloy::primitives::Address;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_address() -> Address {
    Address::repeat_byte(0xcc)
}

fn worker_address() -> Address {
    Address::repeat_byte(0xaa)
}

/// Payment driver that mints channel-close proofs without a network
#[derive(Default)]
struct StubPayer {
    calls: AtomicUsize,
    finalized: AtomicUsize,
}

#[async_trait]
impl PaymentDriver for StubPayer {
    async fn pay(
        &self,
        bill: &Bill,
        _path: PaymentPath,
    ) -> agentpay_broker::Result<PaymentProof> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(PaymentProof::channel_close(
            format!("0x{}", "ab".repeat(32)),
            bill.amount,
            bill.worker_address,
        ))
    }

    async fn after_result(&self, _proof: &PaymentProof) {
        self.finalized.fetch_add(1, Ordering::Relaxed);
    }
}

fn quote(job_id: &str, ttl: u64) -> BillQuote {
    BillQuote {
        job_id: job_id.to_string(),
        bill: Bill::new(job_id, worker_address(), 1_000_000, ttl),
        reason: "payment_required".to_string(),
    }
}

fn expired_quote(job_id: &str) -> BillQuote {
    let mut quote = quote(job_id, 300);
    quote.reason = "bill_expired".to_string();
    quote
}

#[tokio::test]
async fn test_happy_hire_pays_and_returns_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(402).set_body_json(quote("summarize-1", 300)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(JobResult::completed("summarize-1", json!({"summary": "done"}))),
        )
        .mount(&server)
        .await;

    let payer = Arc::new(StubPayer::default());
    let hirer = Hirer::new(client_address(), payer.clone());
    let result = hirer
        .hire_endpoint(
            &server.uri(),
            worker_address(),
            "summarize",
            json!({"doc": "hello"}),
            PaymentPath::Channel,
        )
        .await
        .unwrap();

    assert!(matches!(result.status, agentpay_protocol::JobStatus::Completed));
    assert_eq!(result.result.unwrap()["summary"], "done");
    assert_eq!(payer.calls.load(Ordering::Relaxed), 1);
    assert_eq!(payer.finalized.load(Ordering::Relaxed), 1);

    // The second request carried the job id and the proof.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let paid: JobSubmission = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(paid.job_id.as_deref(), Some("summarize-1"));
    assert!(paid.payment_proof.is_some());
    assert_eq!(paid.requester, Some(client_address()));
}

#[tokio::test]
async fn test_bill_for_wrong_recipient_is_rejected_before_payment() {
    let server = MockServer::start().await;
    let mut bad = quote("summarize-1", 300);
    bad.bill.worker_address = Address::repeat_byte(0xee);
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(402).set_body_json(bad))
        .mount(&server)
        .await;

    let payer = Arc::new(StubPayer::default());
    let hirer = Hirer::new(client_address(), payer.clone());
    let err = hirer
        .hire_endpoint(
            &server.uri(),
            worker_address(),
            "summarize",
            json!({}),
            PaymentPath::Channel,
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("bill pays"));
    assert_eq!(payer.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_expired_bill_buys_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(402).set_body_json(quote("job-1", 300)))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(402).set_body_json(expired_quote("job-1")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(JobResult::completed("job-1", json!({"summary": "late"}))),
        )
        .mount(&server)
        .await;

    let payer = Arc::new(StubPayer::default());
    let hirer = Hirer::new(client_address(), payer.clone());
    let result = hirer
        .hire_endpoint(
            &server.uri(),
            worker_address(),
            "summarize",
            json!({}),
            PaymentPath::Channel,
        )
        .await
        .unwrap();

    assert!(matches!(result.status, agentpay_protocol::JobStatus::Completed));
    // Paid the original bill, then the reissued one.
    assert_eq!(payer.calls.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn test_worker_failure_statuses_surface() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({"reason": "overloaded"})))
        .mount(&server)
        .await;

    let payer = Arc::new(StubPayer::default());
    let hirer = Hirer::new(client_address(), payer.clone());
    let err = hirer
        .hire_endpoint(
            &server.uri(),
            worker_address(),
            "summarize",
            json!({}),
            PaymentPath::Channel,
        )
        .await
        .unwrap_err();

    match err {
        agentpay_broker::BrokerError::WorkerFailure { status, reason } => {
            assert_eq!(status, 503);
            assert_eq!(reason, "overloaded");
        }
        other => panic!("expected worker failure, got {other}"),
    }
    assert_eq!(payer.calls.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn test_worker_without_billing_returns_directly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/job"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(JobResult::completed("job-1", json!({"summary": "free"}))),
        )
        .mount(&server)
        .await;

    let payer = Arc::new(StubPayer::default());
    let hirer = Hirer::new(client_address(), payer.clone());
    let result = hirer
        .hire_endpoint(
            &server.uri(),
            worker_address(),
            "summarize",
            json!({}),
            PaymentPath::Channel,
        )
        .await
        .unwrap();

    assert_eq!(result.result.unwrap()["summary"], "free");
    assert_eq!(payer.calls.load(Ordering::Relaxed), 0);
}
