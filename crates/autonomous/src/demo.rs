//! In-memory demo feed server
//!
//! Two endpoints, no persistence: `GET /feed` lists posts oldest first,
//! `POST /feed` appends one. Offers may carry a `full_text` payload (the
//! document to work on); it is stored alongside the post so a demo worker
//! can fetch it by thread.

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

/// Shared state of the demo feed
#[derive(Default)]
pub struct DemoFeed {
    posts: Mutex<Vec<Value>>,
    next_id: AtomicU64,
}

impl DemoFeed {
    /// Empty feed
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of posts currently held
    pub fn len(&self) -> usize {
        self.posts.lock().expect("posts lock").len()
    }

    /// Whether the feed is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build the demo feed router
pub fn demo_feed_router(state: Arc<DemoFeed>) -> Router {
    Router::new()
        .route("/feed", get(list_posts).post(create_post))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "agentpay-demo-feed" }))
}

async fn list_posts(State(state): State<Arc<DemoFeed>>) -> Json<Value> {
    let posts = state.posts.lock().expect("posts lock").clone();
    Json(json!({ "posts": posts }))
}

async fn create_post(State(state): State<Arc<DemoFeed>>, Json(body): Json<Value>) -> Json<Value> {
    let id = format!("post-{}", state.next_id.fetch_add(1, Ordering::Relaxed) + 1);
    let text = body.get("text").and_then(Value::as_str).unwrap_or_default();
    let thread_id = body
        .get("thread_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());
    let created_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    let mut post = json!({
        "id": id,
        "thread_id": thread_id,
        "text": text,
        "created_at": created_at,
    });
    if let Some(full_text) = body.get("full_text").and_then(Value::as_str) {
        post["full_text"] = Value::String(full_text.to_string());
    }

    info!(%id, preview = &text[..text.len().min(60)], "demo feed post");
    state.posts.lock().expect("posts lock").push(post.clone());
    Json(post)
}
