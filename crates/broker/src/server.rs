//! Worker HTTP server: the 402 handshake
//!
//! `POST /job` without a proof mints a bill and parks the job; with a valid
//! proof it runs the work collaborator and returns the result. Completed
//! jobs replay idempotently for their original proof and reject every other
//! proof. The job table lives in memory behind a mutex; entries expire, and
//! new jobs are refused with 503 past the outstanding cap.

use crate::status::StatusRecorder;
use crate::verify::ProofVerifier;
use crate::work::WorkCollaborator;
use agentpay_protocol::{Bill, BillQuote, HealthReport, Job, JobResult, JobSubmission, PaymentProof};
use alloy::primitives::Address;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reports the worker's unified balance at interesting moments
#[async_trait]
pub trait BalanceReporter: Send + Sync {
    /// Log the balance; `moment` names the occasion
    async fn report(&self, moment: &str);
}

/// Worker server settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Payment address bills credit
    pub address: Address,
    /// Flat price quoted per job, in asset units
    pub price: u64,
    /// Asset bills are denominated in
    pub asset: String,
    /// How long a bill stays payable, in seconds
    pub bill_ttl_secs: u64,
    /// How long a job entry is retained, in seconds
    pub job_ttl_secs: u64,
    /// Outstanding-job cap; new jobs beyond it get 503
    pub max_open_jobs: usize,
}

impl WorkerConfig {
    /// Defaults for `address`: 1 unit flat price, 5 minute bills
    pub fn new(address: Address) -> Self {
        Self {
            address,
            price: 1_000_000,
            asset: agentpay_protocol::DEFAULT_ASSET.to_string(),
            bill_ttl_secs: 300,
            job_ttl_secs: 900,
            max_open_jobs: 32,
        }
    }

    /// Override the flat price
    pub fn with_price(mut self, price: u64) -> Self {
        self.price = price;
        self
    }

    /// Override the bill lifetime
    pub fn with_bill_ttl(mut self, secs: u64) -> Self {
        self.bill_ttl_secs = secs;
        self
    }

    /// Override the outstanding-job cap
    pub fn with_max_open_jobs(mut self, cap: usize) -> Self {
        self.max_open_jobs = cap;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobPhase {
    AwaitingPayment,
    Working,
    Completed,
}

struct JobEntry {
    job: Job,
    bill: Bill,
    phase: JobPhase,
    accepted_proof: Option<PaymentProof>,
    result: Option<JobResult>,
    created_at: Instant,
}

/// Shared state behind the worker router
pub struct WorkerState {
    config: WorkerConfig,
    jobs: Mutex<HashMap<String, JobEntry>>,
    verifier: Arc<dyn ProofVerifier>,
    collaborator: Arc<dyn WorkCollaborator>,
    status: StatusRecorder,
    balance: Option<Arc<dyn BalanceReporter>>,
}

impl WorkerState {
    /// Assemble the server state
    pub fn new(
        config: WorkerConfig,
        verifier: Arc<dyn ProofVerifier>,
        collaborator: Arc<dyn WorkCollaborator>,
    ) -> Self {
        Self {
            config,
            jobs: Mutex::new(HashMap::new()),
            verifier,
            collaborator,
            status: StatusRecorder::default(),
            balance: None,
        }
    }

    /// Attach a status recorder
    pub fn with_status(mut self, status: StatusRecorder) -> Self {
        self.status = status;
        self
    }

    /// Attach a balance reporter, logged after each completed job
    pub fn with_balance_reporter(mut self, reporter: Arc<dyn BalanceReporter>) -> Self {
        self.balance = Some(reporter);
        self
    }

    fn open_jobs(&self) -> usize {
        self.jobs
            .lock()
            .expect("jobs lock")
            .values()
            .filter(|e| e.phase != JobPhase::Completed)
            .count()
    }

    fn prune_expired(&self) {
        let ttl = std::time::Duration::from_secs(self.config.job_ttl_secs);
        self.jobs
            .lock()
            .expect("jobs lock")
            .retain(|_, e| e.phase == JobPhase::Working || e.created_at.elapsed() < ttl);
    }
}

/// Build the worker router over shared state
pub fn worker_router(state: Arc<WorkerState>) -> Router {
    Router::new()
        .route("/job", post(submit_job))
        .route("/health", get(health))
        .with_state(state)
}

async fn health(State(state): State<Arc<WorkerState>>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok".to_string(),
        address: state.config.address,
        open_jobs: state.open_jobs(),
    })
}

async fn submit_job(State(state): State<Arc<WorkerState>>, body: Bytes) -> Response {
    let submission: JobSubmission = match serde_json::from_slice(&body) {
        Ok(submission) => submission,
        Err(e) => {
            return reason_response(StatusCode::BAD_REQUEST, &format!("invalid body: {e}"));
        }
    };

    match (submission.job_id.clone(), submission.payment_proof.clone()) {
        (None, _) => quote_new_job(&state, submission),
        (Some(job_id), None) => requote_existing(&state, &job_id),
        (Some(job_id), Some(proof)) => {
            accept_payment(&state, &job_id, proof, submission.requester).await
        }
    }
}

/// First contact: park the job and answer 402 with a fresh bill
fn quote_new_job(state: &Arc<WorkerState>, submission: JobSubmission) -> Response {
    state.prune_expired();
    if state.open_jobs() >= state.config.max_open_jobs {
        return reason_response(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
    }

    let short = Uuid::new_v4().simple().to_string();
    let job_id = format!("{}-{}", submission.task_type, &short[..8]);
    let bill = Bill::new(
        &job_id,
        state.config.address,
        state.config.price,
        state.config.bill_ttl_secs,
    )
    .with_asset(&state.config.asset)
    .with_notes(format!(
        "pay {} {} for {}",
        state.config.price, state.config.asset, submission.task_type
    ));

    let job = Job {
        job_id: job_id.clone(),
        task_type: submission.task_type,
        input_data: submission.input_data,
        requester: submission.requester,
    };
    info!(%job_id, task_type = %job.task_type, "job received, quoting bill");
    state.status.record("offered", Some(&job.task_type), None);

    let quote = BillQuote {
        job_id: job_id.clone(),
        bill: bill.clone(),
        reason: "payment_required".to_string(),
    };
    state.jobs.lock().expect("jobs lock").insert(
        job_id,
        JobEntry {
            job,
            bill,
            phase: JobPhase::AwaitingPayment,
            accepted_proof: None,
            result: None,
            created_at: Instant::now(),
        },
    );

    (StatusCode::PAYMENT_REQUIRED, Json(quote)).into_response()
}

/// Known job, still no proof: answer with the same bill
fn requote_existing(state: &Arc<WorkerState>, job_id: &str) -> Response {
    let jobs = state.jobs.lock().expect("jobs lock");
    let Some(entry) = jobs.get(job_id) else {
        return reason_response(StatusCode::NOT_FOUND, "unknown_job");
    };
    let quote = BillQuote {
        job_id: job_id.to_string(),
        bill: entry.bill.clone(),
        reason: "payment_required".to_string(),
    };
    (StatusCode::PAYMENT_REQUIRED, Json(quote)).into_response()
}

/// Proof delivered: verify, run the work, return the result
async fn accept_payment(
    state: &Arc<WorkerState>,
    job_id: &str,
    proof: PaymentProof,
    requester: Option<Address>,
) -> Response {
    // Snapshot what verification needs, then release the table.
    let (bill, job, job_requester) = {
        let mut jobs = state.jobs.lock().expect("jobs lock");
        let Some(entry) = jobs.get_mut(job_id) else {
            return reason_response(StatusCode::NOT_FOUND, "unknown_job");
        };

        match entry.phase {
            JobPhase::Completed => {
                return replay_completed(job_id, entry, &proof);
            }
            JobPhase::Working => {
                return reason_response(StatusCode::CONFLICT, "in_progress");
            }
            JobPhase::AwaitingPayment => {}
        }

        if entry.bill.is_expired() {
            // The quote lapsed before payment landed; reissue and keep the
            // job parked. The client may pay the fresh bill.
            entry.bill = Bill::new(
                job_id,
                state.config.address,
                state.config.price,
                state.config.bill_ttl_secs,
            )
            .with_asset(&state.config.asset);
            let quote = BillQuote {
                job_id: job_id.to_string(),
                bill: entry.bill.clone(),
                reason: "bill_expired".to_string(),
            };
            debug!(%job_id, "bill expired; reissued");
            return (StatusCode::PAYMENT_REQUIRED, Json(quote)).into_response();
        }

        (
            entry.bill.clone(),
            entry.job.clone(),
            entry.job.requester,
        )
    };

    info!(%job_id, kind = ?proof.kind, "payment proof received, verifying");
    let verified = state
        .verifier
        .verify(&proof, &bill, requester.or(job_requester))
        .await;

    match verified {
        Err(e) => {
            warn!(%job_id, error = %e, "proof verification unavailable");
            reason_response(StatusCode::SERVICE_UNAVAILABLE, "verification_unavailable")
        }
        Ok(false) => {
            let quote = BillQuote {
                job_id: job_id.to_string(),
                bill,
                reason: "verification_failed".to_string(),
            };
            (StatusCode::PAYMENT_REQUIRED, Json(quote)).into_response()
        }
        Ok(true) => run_paid_job(state, job_id, &job, proof).await,
    }
}

async fn run_paid_job(
    state: &Arc<WorkerState>,
    job_id: &str,
    job: &Job,
    proof: PaymentProof,
) -> Response {
    // Verification dropped the lock; another submission may have won.
    {
        let mut jobs = state.jobs.lock().expect("jobs lock");
        let Some(entry) = jobs.get_mut(job_id) else {
            return reason_response(StatusCode::NOT_FOUND, "unknown_job");
        };
        match entry.phase {
            JobPhase::Completed => return replay_completed(job_id, entry, &proof),
            JobPhase::Working => return reason_response(StatusCode::CONFLICT, "in_progress"),
            JobPhase::AwaitingPayment => {
                entry.phase = JobPhase::Working;
                entry.accepted_proof = Some(proof.clone());
            }
        }
    }

    info!(%job_id, "payment verified, running work");
    state.status.record("working", Some(&job.task_type), None);

    match state
        .collaborator
        .perform(&job.task_type, &job.input_data)
        .await
    {
        Ok(result_value) => {
            let result = JobResult::completed(job_id, result_value);
            let mut jobs = state.jobs.lock().expect("jobs lock");
            if let Some(entry) = jobs.get_mut(job_id) {
                entry.phase = JobPhase::Completed;
                entry.result = Some(result.clone());
            }
            drop(jobs);
            state.status.record("completed", Some(&job.task_type), None);
            if let Some(reporter) = &state.balance {
                let reporter = reporter.clone();
                tokio::spawn(async move { reporter.report("after job").await });
            }
            info!(%job_id, "job completed");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(reason) => {
            // The collaborator never ran the task; release the payment slot
            // so the client can resubmit its proof.
            let mut jobs = state.jobs.lock().expect("jobs lock");
            if let Some(entry) = jobs.get_mut(job_id) {
                entry.phase = JobPhase::AwaitingPayment;
                entry.accepted_proof = None;
            }
            drop(jobs);
            state.status.record("idle", Some(&job.task_type), Some(&reason));
            warn!(%job_id, %reason, "work collaborator failed");
            reason_response(StatusCode::SERVICE_UNAVAILABLE, &reason)
        }
    }
}

fn replay_completed(job_id: &str, entry: &mut JobEntry, proof: &PaymentProof) -> Response {
    if entry.accepted_proof.as_ref() == Some(proof) {
        let result = entry.result.clone().unwrap_or_else(|| {
            JobResult::failed(job_id, "result missing")
        });
        debug!(%job_id, "idempotent replay of completed job");
        return (StatusCode::OK, Json(result)).into_response();
    }
    reason_response(StatusCode::CONFLICT, "proof_mismatch")
}

fn reason_response(status: StatusCode, reason: &str) -> Response {
    (status, Json(json!({ "reason": reason }))).into_response()
}
