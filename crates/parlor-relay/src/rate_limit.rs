//! Generic sliding-window rate limiting
//!
//! One limiter shape, parameterized over the key type, reused for per-user
//! file-transfer limiting (5/60s) and per-source-username UDP packet
//! throttling (100 pps/1s). Each key keeps a log of the timestamps of its
//! recent events; a check prunes everything older than `window` off the
//! front of the log before testing the count, so the limit holds over any
//! rolling `window`-length span rather than resetting wholesale at a fixed
//! boundary. Mirrors `original_source/server/file_transfer.py`'s
//! `_check_rate_limit`, which does the same prune-then-compare against a
//! `history` list of timestamps.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A sliding-window rate limiter keyed by `K`.
#[derive(Debug)]
pub struct RateLimiter<K> {
    limit: u32,
    window: Duration,
    state: HashMap<K, VecDeque<Instant>>,
}

impl<K: Eq + Hash + Clone> RateLimiter<K> {
    /// Create a limiter allowing up to `limit` events per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: HashMap::new(),
        }
    }

    /// Record one event for `key` and report whether it's within the limit.
    ///
    /// Prunes timestamps older than `window` before counting, so the limit
    /// is enforced over any rolling `window`-length span, including one
    /// that straddles an earlier check.
    pub fn check(&mut self, key: K) -> bool {
        let now = Instant::now();
        let window = self.window;
        let limit = self.limit;
        let history = self.state.entry(key).or_default();

        while let Some(&oldest) = history.front() {
            if now.duration_since(oldest) >= window {
                history.pop_front();
            } else {
                break;
            }
        }

        if history.len() < limit as usize {
            history.push_back(now);
            true
        } else {
            false
        }
    }

    /// Drop entries whose entire history has aged out, bounding memory for
    /// keys that stop sending entirely (disconnected users, stale IPs).
    pub fn prune(&mut self) {
        let now = Instant::now();
        let window = self.window;
        self.state.retain(|_, history| {
            while let Some(&oldest) = history.front() {
                if now.duration_since(oldest) >= window {
                    history.pop_front();
                } else {
                    break;
                }
            }
            !history.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::thread::sleep;

    #[test]
    fn test_allows_up_to_limit() {
        let mut limiter = RateLimiter::new(3, Duration::from_secs(60));
        let ip = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(limiter.check(ip));
        assert!(!limiter.check(ip));
    }

    #[test]
    fn test_distinct_keys_independent() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("alice"));
        assert!(limiter.check("bob"));
        assert!(!limiter.check("alice"));
    }

    #[test]
    fn test_window_slides_rather_than_resets() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(30));
        assert!(limiter.check("alice"));
        sleep(Duration::from_millis(20));
        assert!(limiter.check("alice"));
        // Both events are still within the last 30ms: limit is full.
        assert!(!limiter.check("alice"));
        // Wait for only the first event to age out of the window.
        sleep(Duration::from_millis(15));
        assert!(limiter.check("alice"));
        // The two still-recent events (from 20ms ago and just now) fill the
        // limit again immediately, unlike a fixed-window reset which would
        // allow a fresh burst of `limit` events right here.
        assert!(!limiter.check("alice"));
    }

    #[test]
    fn test_prune_removes_stale_entries() {
        let mut limiter = RateLimiter::new(1, Duration::from_millis(10));
        limiter.check("alice");
        sleep(Duration::from_millis(30));
        limiter.prune();
        assert!(limiter.state.is_empty());
    }
}
