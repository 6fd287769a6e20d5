//! Hiring intents parsed from free-form feed posts
//!
//! Agents advertise work on a shared feed in loose prose. An *offer* is a
//! post like `"Offering 1 AP to summarize this article. AgentPay. My ENS:
//! client.eth"`; an *accept* is a reply like `"I'll do it. My ENS:
//! worker.eth"`. Matching is case-insensitive and whitespace-tolerant, and
//! the first match in a post wins.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static OFFER_TERMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)offering\s+(\d+)\s*AP\s+to\s+([^.\n]+)").expect("offer terms regex")
});

static ENS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:my\s+)?ens\s*:\s*([A-Za-z0-9][A-Za-z0-9_.-]*\.eth)\b")
        .expect("ens name regex")
});

static ACCEPT_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bi\s*(?:'|’)?\s*(?:ll|will|can)?\s*(?:accept|do|take)\b")
        .expect("accept phrase regex")
});

/// A parsed offer: the poster wants to pay for work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    /// Quoted price in AP units
    pub price: u64,
    /// What the poster wants done
    pub task_type: String,
    /// ENS name of the poster (the future client)
    pub poster_ens: String,
}

/// A parsed accept: a worker agrees and identifies itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accept {
    /// ENS name of the accepting worker
    pub worker_ens: String,
}

/// Parse a feed post as an offer.
///
/// Requires the `AgentPay` marker, `Offering <N> AP to <task>` terms, and an
/// ENS self-identification. Returns `None` for anything else.
pub fn parse_offer(text: &str) -> Option<Offer> {
    if !text.to_lowercase().contains("agentpay") {
        return None;
    }
    let terms = OFFER_TERMS.captures(text)?;
    let ens = ENS_NAME.captures(text)?;

    let price: u64 = terms.get(1)?.as_str().parse().ok()?;
    let task_type = normalize_task(terms.get(2)?.as_str());
    if task_type.is_empty() {
        return None;
    }

    Some(Offer {
        price,
        task_type,
        poster_ens: ens.get(1)?.as_str().to_lowercase(),
    })
}

/// Parse a feed post as an accept.
///
/// Requires an acceptance phrase (`I accept`, `I'll do it`, `I will take
/// it`, ...) and an ENS self-identification.
pub fn parse_accept(text: &str) -> Option<Accept> {
    if !ACCEPT_PHRASE.is_match(text) {
        return None;
    }
    let ens = ENS_NAME.captures(text)?;
    Some(Accept {
        worker_ens: ens.get(1)?.as_str().to_lowercase(),
    })
}

/// Render an offer in the canonical feed phrasing
pub fn render_offer(offer: &Offer) -> String {
    format!(
        "Offering {} AP to {}. AgentPay. My ENS: {}",
        offer.price, offer.task_type, offer.poster_ens
    )
}

/// Render an accept in the canonical feed phrasing
pub fn render_accept(accept: &Accept) -> String {
    format!("I'll do it. My ENS: {}", accept.worker_ens)
}

/// Collapse runs of whitespace and trim trailing punctuation-free space
fn normalize_task(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
