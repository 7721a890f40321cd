//! Outbound send pacing.
//!
//! Chat platforms drop or shadow-limit accounts that send too quickly, so
//! every line to a channel waits on that channel's limiter first. Each
//! channel gets its own governor bucket with a burst of one, which turns the
//! quota period into a minimum spacing between sends.

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Per-channel minimum spacing between sends.
#[derive(Debug)]
pub struct SendPacer {
    quota: Quota,
    limiters: DashMap<String, Arc<DirectRateLimiter>>,
}

impl SendPacer {
    pub fn new(spacing: Duration) -> Self {
        // A zero period means unpaced.
        let quota = Quota::with_period(spacing)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX))
            .allow_burst(NonZeroU32::MIN);
        Self {
            quota,
            limiters: DashMap::new(),
        }
    }

    /// Wait until `channel` may be sent to again.
    pub async fn wait(&self, channel: &str) {
        // Clone out of the map so no shard lock is held across the await.
        let limiter = self
            .limiters
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone();
        limiter.until_ready().await;
    }

    /// Drop the limiter of a channel the agent left.
    pub fn forget(&self, channel: &str) {
        self.limiters.remove(channel);
    }

    pub fn tracked_channels(&self) -> usize {
        self.limiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_spacing_between_sends() {
        let pacer = SendPacer::new(Duration::from_millis(60));
        let start = Instant::now();
        pacer.wait("alice").await;
        pacer.wait("alice").await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_channels_are_independent() {
        let pacer = SendPacer::new(Duration::from_secs(30));
        let start = Instant::now();
        pacer.wait("alice").await;
        pacer.wait("bob").await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pacer.tracked_channels(), 2);

        pacer.forget("alice");
        assert_eq!(pacer.tracked_channels(), 1);
    }

    #[tokio::test]
    async fn test_zero_spacing_is_unpaced() {
        let pacer = SendPacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..10 {
            pacer.wait("alice").await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
