//! Client hirer: resolve, submit, pay, resubmit
//!
//! One hire is stateless beyond the in-flight exchange: the bill arrives
//! with the 402, is owned until its proof is delivered, and an expired bill
//! buys exactly one retry against the fresh quote the worker reissues.

use crate::error::{BrokerError, Result};
use agentpay_clearing::{Orchestrator, PaymentPath};
use agentpay_ens::NameResolver;
use agentpay_protocol::{
    parse_session_reference, Bill, BillQuote, JobResult, JobSubmission, PaymentProof, ProofKind,
};
use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Deadline for the initial, unpaid submission
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for the paid submission; covers work execution
const RESULT_TIMEOUT: Duration = Duration::from_secs(120);
/// How long to chase a session close after the result arrived
const FINALIZE_DEADLINE: Duration = Duration::from_secs(10);

/// Turns a bill into a payment proof
#[async_trait]
pub trait PaymentDriver: Send + Sync {
    /// Settle the bill over the preferred path
    async fn pay(&self, bill: &Bill, path: PaymentPath) -> Result<PaymentProof>;

    /// Best-effort settlement follow-up once the result is in hand
    async fn after_result(&self, _proof: &PaymentProof) {}
}

#[async_trait]
impl PaymentDriver for Orchestrator {
    async fn pay(&self, bill: &Bill, path: PaymentPath) -> Result<PaymentProof> {
        Orchestrator::pay(self, bill, path).await.map_err(Into::into)
    }

    async fn after_result(&self, proof: &PaymentProof) {
        if proof.kind != ProofKind::AppSessionState {
            return;
        }
        let Ok((session_id, _)) = parse_session_reference(&proof.reference) else {
            return;
        };
        if let Err(e) = self.finalize_app_session(&session_id, FINALIZE_DEADLINE).await {
            // The session will close out on the worker side or by challenge
            // expiry; losing the confirmation is not a payment failure.
            warn!(session_id, error = %e, "session close not confirmed");
        }
    }
}

/// Drives the client side of the 402 handshake
pub struct Hirer {
    identity: Address,
    payment: Arc<dyn PaymentDriver>,
    resolver: Option<Arc<NameResolver>>,
    http: reqwest::Client,
}

impl Hirer {
    /// Hirer for the identity at `identity`, paying through `payment`
    pub fn new(identity: Address, payment: Arc<dyn PaymentDriver>) -> Self {
        Self {
            identity,
            payment,
            resolver: None,
            http: reqwest::Client::new(),
        }
    }

    /// Attach a name resolver for [`Self::hire`]
    pub fn with_resolver(mut self, resolver: Arc<NameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Hire a named worker: resolve, then run the 402 flow.
    ///
    /// A bill above the worker's advertised price for the task is paid
    /// anyway but logged loudly; flat quotes are the protocol, the price
    /// table is advisory.
    pub async fn hire(
        &self,
        worker_name: &str,
        task_type: &str,
        input_data: Value,
        path: PaymentPath,
    ) -> Result<JobResult> {
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            BrokerError::BillRejected("hire by name needs a name resolver".to_string())
        })?;
        let record = resolver.resolve(worker_name).await?;
        info!(worker = worker_name, endpoint = %record.endpoint, "worker resolved");
        self.hire_via(
            &record.endpoint,
            record.address,
            record.advertised_price(task_type),
            task_type,
            input_data,
            path,
        )
        .await
    }

    /// Hire a worker at a known endpoint and address, skipping discovery
    pub async fn hire_endpoint(
        &self,
        endpoint: &str,
        worker_address: Address,
        task_type: &str,
        input_data: Value,
        path: PaymentPath,
    ) -> Result<JobResult> {
        self.hire_via(endpoint, worker_address, None, task_type, input_data, path)
            .await
    }

    async fn hire_via(
        &self,
        endpoint: &str,
        worker_address: Address,
        advertised: Option<u64>,
        task_type: &str,
        input_data: Value,
        path: PaymentPath,
    ) -> Result<JobResult> {
        let url = job_url(endpoint);
        let submission = JobSubmission::new(task_type, input_data).from_requester(self.identity);

        let response = self
            .http
            .post(&url)
            .timeout(SUBMIT_TIMEOUT)
            .json(&submission)
            .send()
            .await?;

        let mut quote = match response.status() {
            // A worker without billing just runs the job.
            StatusCode::OK => return Ok(response.json().await?),
            StatusCode::PAYMENT_REQUIRED => response.json::<BillQuote>().await?,
            status => return Err(worker_failure(status, response).await),
        };

        // The reissued bill after an expiry buys exactly one more attempt.
        for attempt in 0..2 {
            self.check_bill(&quote, worker_address, advertised)?;

            let proof = self.payment.pay(&quote.bill, path).await?;
            debug!(job_id = %quote.job_id, reference = %proof.reference, "proof obtained");

            let paid = submission
                .clone()
                .with_proof(quote.job_id.clone(), proof.clone());
            let response = self
                .http
                .post(&url)
                .timeout(RESULT_TIMEOUT)
                .json(&paid)
                .send()
                .await?;

            match response.status() {
                StatusCode::OK => {
                    let result: JobResult = response.json().await?;
                    self.payment.after_result(&proof).await;
                    return Ok(result);
                }
                StatusCode::PAYMENT_REQUIRED => {
                    let requote: BillQuote = response.json().await?;
                    if requote.reason == "bill_expired" && attempt == 0 {
                        info!(job_id = %requote.job_id, "bill expired in flight; paying fresh quote");
                        quote = requote;
                        continue;
                    }
                    return Err(BrokerError::WorkerFailure {
                        status: 402,
                        reason: requote.reason,
                    });
                }
                status => return Err(worker_failure(status, response).await),
            }
        }

        Err(BrokerError::WorkerFailure {
            status: 402,
            reason: "bill_expired".to_string(),
        })
    }

    fn check_bill(
        &self,
        quote: &BillQuote,
        worker_address: Address,
        advertised: Option<u64>,
    ) -> Result<()> {
        if quote.bill.worker_address != worker_address {
            return Err(BrokerError::BillRejected(format!(
                "bill pays {}, expected {}",
                quote.bill.worker_address, worker_address
            )));
        }
        if quote.bill.is_expired() {
            return Err(BrokerError::BillRejected("bill expired on arrival".to_string()));
        }
        if let Some(advertised) = advertised {
            if quote.bill.amount > advertised {
                warn!(
                    amount = quote.bill.amount,
                    advertised, "bill exceeds the advertised price"
                );
            }
        }
        Ok(())
    }
}

async fn worker_failure(status: StatusCode, response: reqwest::Response) -> BrokerError {
    let reason = response
        .json::<Value>()
        .await
        .ok()
        .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.to_string());
    BrokerError::WorkerFailure {
        status: status.as_u16(),
        reason,
    }
}

/// Normalize a worker endpoint into its job URL
fn job_url(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    if with_scheme.ends_with("/job") {
        with_scheme
    } else {
        format!("{with_scheme}/job")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_url_normalization() {
        assert_eq!(job_url("http://h:9000"), "http://h:9000/job");
        assert_eq!(job_url("http://h:9000/"), "http://h:9000/job");
        assert_eq!(job_url("http://h:9000/job"), "http://h:9000/job");
        assert_eq!(job_url("h:9000"), "http://h:9000/job");
        assert_eq!(job_url("https://worker.example"), "https://worker.example/job");
    }
}
