//! Per-(plugin, capability) sliding-window call counters.
//!
//! Counters are in-memory only and never persisted; a stale counter is
//! harmless, so the periodic sweep is a memory bound, not a correctness
//! requirement.

use crate::capability::Capability;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use widgetry_types::PluginId;

/// Window length for rate limiting.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(1000);

/// Maximum calls per (plugin, capability) pair within one window.
pub const RATE_LIMIT_MAX_CALLS: u32 = 10;

#[derive(Debug)]
struct Counter {
    count: u32,
    window_reset_at: Instant,
}

/// Sliding-window call counter, tracked independently per plugin and per
/// capability.
#[derive(Debug, Default)]
pub struct RateLimiter {
    counters: HashMap<(PluginId, Capability), Counter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one call and returns whether it is within the limit.
    ///
    /// The first call in a window (or the first after expiry) resets the
    /// counter to 1 and allows; calls up to the maximum allow; anything
    /// beyond denies without extending the window.
    pub fn check(&mut self, plugin_id: &PluginId, capability: Capability) -> bool {
        self.check_at(plugin_id, capability, Instant::now())
    }

    fn check_at(&mut self, plugin_id: &PluginId, capability: Capability, now: Instant) -> bool {
        let counter = self
            .counters
            .entry((plugin_id.clone(), capability))
            .or_insert_with(|| Counter {
                count: 0,
                window_reset_at: now + RATE_LIMIT_WINDOW,
            });

        if now >= counter.window_reset_at {
            counter.count = 1;
            counter.window_reset_at = now + RATE_LIMIT_WINDOW;
            return true;
        }

        if counter.count >= RATE_LIMIT_MAX_CALLS {
            return false;
        }
        counter.count += 1;
        true
    }

    /// Drops counters whose window has elapsed.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        self.counters.retain(|_, c| now < c.window_reset_at);
    }

    /// Number of live counters (for tests and metrics).
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(id: &str) -> PluginId {
        PluginId::new(id).unwrap()
    }

    #[test]
    fn allows_up_to_max_then_denies() {
        let mut limiter = RateLimiter::new();
        let p = plugin("clock");
        let now = Instant::now();

        for i in 1..=RATE_LIMIT_MAX_CALLS {
            assert!(
                limiter.check_at(&p, Capability::Network, now),
                "call {i} should be allowed"
            );
        }
        assert!(!limiter.check_at(&p, Capability::Network, now));
        assert!(!limiter.check_at(&p, Capability::Network, now));
    }

    #[test]
    fn window_expiry_resets_counter() {
        let mut limiter = RateLimiter::new();
        let p = plugin("clock");
        let start = Instant::now();

        for _ in 0..RATE_LIMIT_MAX_CALLS {
            assert!(limiter.check_at(&p, Capability::Network, start));
        }
        assert!(!limiter.check_at(&p, Capability::Network, start));

        let later = start + RATE_LIMIT_WINDOW + Duration::from_millis(1);
        assert!(limiter.check_at(&p, Capability::Network, later));
    }

    #[test]
    fn plugins_are_independent() {
        let mut limiter = RateLimiter::new();
        let p1 = plugin("clock");
        let p2 = plugin("weather");
        let now = Instant::now();

        for _ in 0..RATE_LIMIT_MAX_CALLS {
            assert!(limiter.check_at(&p1, Capability::Network, now));
        }
        assert!(!limiter.check_at(&p1, Capability::Network, now));

        // Exhausting p1 never affects p2.
        assert!(limiter.check_at(&p2, Capability::Network, now));
    }

    #[test]
    fn capabilities_are_independent() {
        let mut limiter = RateLimiter::new();
        let p = plugin("clock");
        let now = Instant::now();

        for _ in 0..RATE_LIMIT_MAX_CALLS {
            assert!(limiter.check_at(&p, Capability::Network, now));
        }
        assert!(!limiter.check_at(&p, Capability::Network, now));
        assert!(limiter.check_at(&p, Capability::SystemInfoCpu, now));
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut limiter = RateLimiter::new();
        let now = Instant::now();
        limiter.check_at(&plugin("old"), Capability::Network, now - RATE_LIMIT_WINDOW * 2);
        limiter.check_at(&plugin("fresh"), Capability::Network, now);

        assert_eq!(limiter.counter_count(), 2);
        limiter.purge_expired();
        assert_eq!(limiter.counter_count(), 1);
    }
}
