//! In-memory relay transport
//!
//! Records every POST instead of sending it. Used by tests and by the
//! binary's `--dry-run` mode.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{RelayError, RelayTransport};

/// A POST captured by [`MemoryTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedPost {
    pub url: String,
    pub body: serde_json::Value,
}

#[derive(Default)]
pub struct MemoryTransport {
    posts: Mutex<Vec<RecordedPost>>,
    attempts: AtomicUsize,
    failing: AtomicBool,
    latency: Mutex<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following post fail with a network error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay applied to each post before it is recorded.
    /// Uses tokio time, so paused clocks advance instantly in tests.
    pub fn set_latency(&self, latency: Duration) {
        if let Ok(mut guard) = self.latency.lock() {
            *guard = latency;
        }
    }

    /// Successful posts, in completion order.
    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    /// Successful posts to a URL ending in `endpoint`.
    pub fn posts_to(&self, endpoint: &str) -> Vec<RecordedPost> {
        self.posts()
            .into_iter()
            .filter(|post| post.url.ends_with(endpoint))
            .collect()
    }

    /// Every post attempt, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayTransport for MemoryTransport {
    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<(), RelayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency.lock().map(|l| *l).unwrap_or_default();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RelayError::Network(format!("simulated failure posting to {}", url)));
        }
        log::info!("POST {} {}", url, body);
        if let Ok(mut posts) = self.posts.lock() {
            posts.push(RecordedPost {
                url: url.to_string(),
                body,
            });
        }
        Ok(())
    }
}
