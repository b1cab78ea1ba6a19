use std::{
    collections::{HashMap, VecDeque},
    time::{Duration, Instant},
};

use std::sync::Arc;
use tokio::sync::Mutex;

/// Sliding-window request limiter keyed by caller identity.
///
/// The purge-check-append sequence runs as one critical section, so
/// concurrent calls for the same key cannot over-admit. Idle keys are
/// never evicted; per-key storage grows with the number of distinct
/// identities seen.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    limit: usize,
    inner: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn new_per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub async fn is_allowed(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut map = self.inner.lock().await;
        let deque = map.entry(key.to_string()).or_default();
        // purge timestamps that fell out of the window
        while let Some(&front) = deque.front() {
            if now.duration_since(front) > self.window {
                deque.pop_front();
            } else {
                break;
            }
        }
        if deque.len() < self.limit {
            deque.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_limit_reached_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.is_allowed("k").await);
        assert!(limiter.is_allowed("k").await);
        assert!(limiter.is_allowed("k").await);
        assert!(!limiter.is_allowed("k").await);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.is_allowed("a").await);
        assert!(!limiter.is_allowed("a").await);
        assert!(limiter.is_allowed("b").await);
    }

    #[tokio::test]
    async fn test_window_expiry_readmits() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.is_allowed("k").await);
        assert!(!limiter.is_allowed("k").await);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.is_allowed("k").await);
    }

    #[tokio::test]
    async fn test_rejected_calls_are_not_recorded() {
        let limiter = RateLimiter::new(2, Duration::from_millis(100));
        assert!(limiter.is_allowed("k").await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.is_allowed("k").await);
        // third call rejected, must not extend the window
        assert!(!limiter.is_allowed("k").await);
        // first timestamp expires, freeing one slot
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.is_allowed("k").await);
    }
}
