//! Agent discovery over the ENS name service
//!
//! A worker advertises itself under a human-readable name by setting three
//! text records next to its address record:
//!
//! - `agentpay.endpoint` — HTTP base URL of its job server
//! - `agentpay.capabilities` — comma-separated task types
//! - `agentpay.prices` — comma-separated `task:amount` pairs in asset units
//!
//! [`NameResolver::resolve`] turns a name into an [`AgentRecord`] by reading
//! those records through the registry/resolver contracts. Results are cached
//! in memory for a few minutes; record provisioning is somebody else's job.

mod error;
mod namehash;
mod resolver;

pub use error::{EnsError, Result};
pub use namehash::namehash;
pub use resolver::{AgentRecord, NameResolver, ENDPOINT_RECORD, CAPABILITIES_RECORD, PRICES_RECORD};
