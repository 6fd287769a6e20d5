//! Feed abstraction
//!
//! A feed is any ordered source of timeline items — the in-tree demo server
//! or an external service speaking the same two endpoints: `GET /feed`
//! returning `{"posts": [...]}` and `POST /feed` creating a post.

use crate::error::{FeedError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One timeline item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedItem {
    /// Stable item id used for deduplication
    pub id: String,
    /// Thread the item belongs to; replies share their parent's thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Post text
    #[serde(default)]
    pub text: String,
    /// Unix seconds, when the feed reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

/// Pluggable source of timeline items
#[async_trait]
pub trait Feed: Send + Sync {
    /// Recent items, oldest first
    async fn recent(&self) -> Result<Vec<FeedItem>>;

    /// Publish a post; `thread_id` makes it a reply
    async fn post(&self, text: &str, thread_id: Option<&str>) -> Result<FeedItem>;
}

/// HTTP feed client for the demo server or a compatible external feed
pub struct HttpFeed {
    base: String,
    http: reqwest::Client,
}

impl HttpFeed {
    /// Client for the feed at `base`, e.g. `http://127.0.0.1:8765`
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into().trim_end_matches('/').to_string();
        Self {
            base,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
        }
    }
}

#[async_trait]
impl Feed for HttpFeed {
    async fn recent(&self) -> Result<Vec<FeedItem>> {
        let body: Value = self
            .http
            .get(format!("{}/feed", self.base))
            .send()
            .await?
            .json()
            .await?;
        let posts = body
            .get("posts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let items = posts
            .into_iter()
            .filter_map(|post| normalize_item(&post))
            .collect::<Vec<_>>();
        debug!(count = items.len(), "feed fetched");
        Ok(items)
    }

    async fn post(&self, text: &str, thread_id: Option<&str>) -> Result<FeedItem> {
        let mut payload = serde_json::json!({ "text": text });
        if let Some(thread_id) = thread_id {
            payload["thread_id"] = Value::String(thread_id.to_string());
        }
        let body: Value = self
            .http
            .post(format!("{}/feed", self.base))
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;
        normalize_item(&body)
            .ok_or_else(|| FeedError::InvalidBody(format!("created post missing id: {body}")))
    }
}

/// Fold the feed's loose post shape (`text` or `body`, optional ids) into a
/// [`FeedItem`]; posts without an id can't be deduplicated and are dropped
fn normalize_item(post: &Value) -> Option<FeedItem> {
    let id = post.get("id")?;
    let id = match id {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let text = post
        .get("text")
        .or_else(|| post.get("body"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let thread_id = post.get("thread_id").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    Some(FeedItem {
        thread_id: thread_id.or_else(|| Some(id.clone())),
        id,
        text,
        created_at: post.get("created_at").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_accepts_text_or_body() {
        let a = normalize_item(&json!({"id": "1", "text": "hello"})).unwrap();
        assert_eq!(a.text, "hello");
        let b = normalize_item(&json!({"id": 2, "body": "there"})).unwrap();
        assert_eq!(b.id, "2");
        assert_eq!(b.text, "there");
    }

    #[test]
    fn test_normalize_defaults_thread_to_own_id() {
        let item = normalize_item(&json!({"id": "5", "text": "x"})).unwrap();
        assert_eq!(item.thread_id.as_deref(), Some("5"));
        let reply =
            normalize_item(&json!({"id": "6", "thread_id": "5", "text": "y"})).unwrap();
        assert_eq!(reply.thread_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_normalize_drops_idless_posts() {
        assert!(normalize_item(&json!({"text": "no id"})).is_none());
    }
}
