//! Job submission and result bodies for the worker HTTP API

use crate::bill::Bill;
use crate::proof::PaymentProof;
use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A job as the worker tracks it after submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier, minted by the worker at first submission
    pub job_id: String,
    /// Capability/category, e.g. `summarize`, `analyze-data`
    pub task_type: String,
    /// Task input, opaque to the broker
    pub input_data: Value,
    /// Requester address, when the client identified itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Address>,
}

/// Body of `POST /job`
///
/// The first submission carries only `task_type` and `input_data`; the paid
/// resubmission adds the `job_id` from the 402 reply and a `payment_proof`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    /// Capability/category
    pub task_type: String,
    /// Task input, opaque to the broker
    #[serde(default)]
    pub input_data: Value,
    /// Job this payment belongs to (resubmission only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Settlement evidence (resubmission only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_proof: Option<PaymentProof>,
    /// Requester address, optional self-identification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Address>,
}

impl JobSubmission {
    /// Initial, unpaid submission
    pub fn new(task_type: impl Into<String>, input_data: Value) -> Self {
        Self {
            task_type: task_type.into(),
            input_data,
            job_id: None,
            payment_proof: None,
            requester: None,
        }
    }

    /// Paid resubmission for a previously quoted job
    pub fn with_proof(mut self, job_id: impl Into<String>, proof: PaymentProof) -> Self {
        self.job_id = Some(job_id.into());
        self.payment_proof = Some(proof);
        self
    }

    /// Identify the requester
    pub fn from_requester(mut self, requester: Address) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// Terminal status of a hire as reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Work ran and the result body is authoritative
    Completed,
    /// The hire did not complete; `reason` explains why
    Failed,
}

/// Body of a `200` reply to a paid submission, and the hirer's return value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Job the result belongs to
    pub job_id: String,
    /// `completed` or `failed`
    pub status: JobStatus,
    /// The work collaborator's answer, relayed verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure reason when `status` is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobResult {
    /// A completed result
    pub fn completed(job_id: impl Into<String>, result: Value) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Completed,
            result: Some(result),
            reason: None,
        }
    }

    /// A failed hire
    pub fn failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Failed,
            result: None,
            reason: Some(reason.into()),
        }
    }
}

/// Body of a `402` reply: the bill to pay before work begins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillQuote {
    /// Job the bill pays for
    pub job_id: String,
    /// The quote
    pub bill: Bill,
    /// Why payment is (still) required, e.g. `payment_required`,
    /// `bill_expired`, `verification_failed`
    pub reason: String,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Always `ok` when the server answers
    pub status: String,
    /// Worker payment address
    pub address: Address,
    /// Jobs currently awaiting payment or running
    pub open_jobs: usize,
}
