//! agentpay CLI commands

pub mod autonomous;
pub mod client;
pub mod demo_feed;
pub mod install_skill;
pub mod setup;
pub mod worker;
