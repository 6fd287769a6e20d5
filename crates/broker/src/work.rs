//! Work collaborator seam
//!
//! The broker never performs the purchased task itself; it hands the job
//! payload to a collaborator and relays the answer. The echo collaborator
//! stands in for a real one in demos and tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Performs the purchased task
#[async_trait]
pub trait WorkCollaborator: Send + Sync {
    /// Run `task_type` over `input_data` and return the result payload.
    ///
    /// An `Err` means the collaborator could not run at all; the worker
    /// reports it without consuming the payment.
    async fn perform(&self, task_type: &str, input_data: &Value) -> std::result::Result<Value, String>;
}

/// Collaborator that answers with a canned echo of the job
///
/// Counts invocations so tests can assert work did or did not run.
#[derive(Default)]
pub struct EchoCollaborator {
    calls: AtomicUsize,
}

impl EchoCollaborator {
    /// New collaborator with a zero call count
    pub fn new() -> Self {
        Self::default()
    }

    /// How many jobs have been performed
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl WorkCollaborator for EchoCollaborator {
    async fn perform(&self, task_type: &str, input_data: &Value) -> std::result::Result<Value, String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(json!({
            "task_type": task_type,
            "echo": input_data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echo_collaborator_counts_calls() {
        let collaborator = EchoCollaborator::new();
        assert_eq!(collaborator.calls(), 0);
        let result = collaborator
            .perform("summarize", &json!({"doc": "hello"}))
            .await
            .unwrap();
        assert_eq!(result["task_type"], "summarize");
        assert_eq!(result["echo"]["doc"], "hello");
        assert_eq!(collaborator.calls(), 1);
    }
}
