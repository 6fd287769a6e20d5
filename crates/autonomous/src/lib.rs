//! Autonomous hiring loop over a shared feed
//!
//! Agents advertise and pick up work on a public timeline of text posts.
//! The loop polls a [`Feed`], deduplicates items, parses hiring intents, and
//! dispatches them to a handler — the worker side answers offers with
//! accepts, the client side answers accepts by hiring. A small in-memory
//! demo feed server ships in-tree for end-to-end runs.

mod demo;
mod error;
mod feed;
mod watcher;

pub use demo::{demo_feed_router, DemoFeed};
pub use error::{FeedError, Result};
pub use feed::{Feed, FeedItem, HttpFeed};
pub use watcher::{AutonomousLoop, IntentHandler, LoopConfig, LoopState, LoopStateMachine};
