//! Wire schema for the agent payment broker
//!
//! Everything two agents exchange lives here: the job submission bodies for
//! the 402 handshake, the bill a worker quotes, the payment proof a client
//! brings back, and the parsers that extract hiring intents from free-form
//! feed posts.
//!
//! # Protocol Flow
//!
//! ```text
//! Client                     Worker
//!    |                          |
//!    |---- POST /job ---------->|
//!    |<--- 402 + Bill ----------|
//!    |                          |
//!    |   (pay via clearing      |
//!    |    network or channel)   |
//!    |                          |
//!    |---- POST /job + proof -->|
//!    |<--- 200 + result --------|
//! ```

mod bill;
mod error;
mod intent;
mod job;
mod proof;

pub use bill::{Bill, DEFAULT_ASSET};
pub use error::{ProtocolError, Result};
pub use intent::{parse_accept, parse_offer, render_accept, render_offer, Accept, Offer};
pub use job::{
    BillQuote, HealthReport, Job, JobResult, JobStatus, JobSubmission,
};
pub use proof::{
    looks_like_tx_hash, parse_session_reference, session_reference, PaymentProof, ProofKind,
};
