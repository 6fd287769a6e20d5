//! The polling loop
//!
//! Every interval: fetch, deduplicate by item id through a bounded LRU,
//! parse offers then accepts (first match wins), dispatch to the handler.
//! Cancellation is honoured between polls, never mid-item.

use crate::error::Result;
use crate::feed::{Feed, FeedItem};
use agentpay_protocol::{parse_accept, parse_offer, Accept, Offer};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Loop settings
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Minimum gap between feed polls
    pub poll_interval: Duration,
    /// How many recently seen item ids to remember
    pub seen_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            seen_capacity: 256,
        }
    }
}

/// Receives parsed hiring intents
#[async_trait]
pub trait IntentHandler: Send + Sync {
    /// A poster wants to pay for work
    async fn on_offer(&self, offer: Offer, item: &FeedItem);

    /// A worker agreed to an offer
    async fn on_accept(&self, accept: Accept, item: &FeedItem);
}

/// Worker-side progress through one autonomous hire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopState {
    /// Watching the feed
    #[default]
    Idle,
    /// An offer was parsed and handed to the handler
    OfferSeen,
    /// The accept reply is on the feed
    AcceptSent,
    /// The job arrived over HTTP
    JobReceived,
    /// Payment verified, collaborator running
    Working,
    /// Result returned; the next offer starts a fresh cycle
    Completed,
}

impl LoopState {
    /// Whether `next` is a legal successor
    pub fn can_transition_to(self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (Idle, OfferSeen)
                | (OfferSeen, AcceptSent)
                | (AcceptSent, JobReceived)
                | (JobReceived, Working)
                | (Working, Completed)
                | (Completed, Idle)
        )
    }
}

/// Shared worker-side state machine
///
/// The loop and the worker server both touch it: feed events drive the first
/// half of the cycle, inbound HTTP the second.
#[derive(Default)]
pub struct LoopStateMachine {
    state: Mutex<LoopState>,
}

impl LoopStateMachine {
    /// Fresh machine in `Idle`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> LoopState {
        *self.state.lock().expect("state lock")
    }

    /// Advance; illegal transitions are logged and ignored
    pub fn transition(&self, next: LoopState) {
        let mut state = self.state.lock().expect("state lock");
        if state.can_transition_to(next) {
            debug!(from = ?*state, to = ?next, "loop state transition");
            *state = next;
        } else {
            warn!(from = ?*state, to = ?next, "ignoring illegal loop transition");
        }
    }

    /// Abandon the current cycle and go back to watching
    pub fn reset(&self) {
        *self.state.lock().expect("state lock") = LoopState::Idle;
    }
}

/// Bounded LRU of item ids
struct SeenCache {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl SeenCache {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            members: HashSet::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`; returns false when it was already known
    fn insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.members.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        true
    }
}

/// Polls a feed and dispatches parsed intents
pub struct AutonomousLoop {
    feed: Arc<dyn Feed>,
    handler: Arc<dyn IntentHandler>,
    config: LoopConfig,
    seen: Mutex<SeenCache>,
    machine: Arc<LoopStateMachine>,
}

impl AutonomousLoop {
    /// Watch `feed`, dispatching to `handler`
    pub fn new(feed: Arc<dyn Feed>, handler: Arc<dyn IntentHandler>, config: LoopConfig) -> Self {
        let seen = Mutex::new(SeenCache::new(config.seen_capacity));
        Self {
            feed,
            handler,
            config,
            seen,
            machine: Arc::new(LoopStateMachine::new()),
        }
    }

    /// Share an externally owned state machine (the worker server advances
    /// it on inbound HTTP)
    pub fn with_state_machine(mut self, machine: Arc<LoopStateMachine>) -> Self {
        self.machine = machine;
        self
    }

    /// Current worker-side state
    pub fn state(&self) -> LoopState {
        self.machine.state()
    }

    /// Advance the state machine; illegal transitions are logged and ignored
    pub fn transition(&self, next: LoopState) {
        self.machine.transition(next);
    }

    /// Run until `shutdown` fires; cancellation lands between polls
    pub async fn run(&self, mut shutdown: oneshot::Receiver<()>) {
        info!(interval = ?self.config.poll_interval, "autonomous loop started");
        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "feed poll failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = &mut shutdown => {
                    info!("autonomous loop cancelled");
                    return;
                }
            }
        }
    }

    /// One poll: fetch, deduplicate, parse, dispatch
    pub async fn tick(&self) -> Result<()> {
        let items = self.feed.recent().await?;
        for item in items {
            let fresh = self.seen.lock().expect("seen lock").insert(&item.id);
            if !fresh {
                continue;
            }
            // Offers take precedence; the first parser that matches wins.
            if let Some(offer) = parse_offer(&item.text) {
                debug!(item = %item.id, task = %offer.task_type, "offer parsed");
                self.handler.on_offer(offer, &item).await;
            } else if let Some(accept) = parse_accept(&item.text) {
                debug!(item = %item.id, worker = %accept.worker_ens, "accept parsed");
                self.handler.on_accept(accept, &item).await;
            }
        }
        Ok(())
    }
}
