//! The 402 job broker: worker server and client hirer
//!
//! The worker side answers `POST /job` with a bill until it sees a valid
//! payment proof, then runs the work collaborator and returns the result.
//! The client side resolves a worker by name, collects the bill, drives the
//! payment orchestrator, and resubmits with the proof.
//!
//! Neither side keeps state beyond the in-flight hire: the worker's job
//! table is in-memory with an expiry, and the hirer owns a bill only until
//! its proof is delivered.

mod error;
mod hirer;
mod server;
mod status;
mod verify;
mod work;

pub use error::{BrokerError, Result};
pub use hirer::{Hirer, PaymentDriver};
pub use server::{worker_router, BalanceReporter, WorkerConfig, WorkerState};
pub use status::StatusRecorder;
pub use verify::{ClearingVerifier, ProofVerifier};
pub use work::{EchoCollaborator, WorkCollaborator};
