// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use ahash::AHashMap;
use parking_lot::Mutex;
use std::time::Duration;

/// Per-key exponential back-off. The delay for a key is `base * 2^n`, where
/// `n` counts the failures recorded since the key was last forgotten, and
/// never exceeds `max_delay`.
pub struct ItemExponentialFailureRateLimiter {
    base: Duration,
    max_delay: Duration,
    failures: Mutex<AHashMap<String, u32>>,
}

impl Default for ItemExponentialFailureRateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(5), Duration::from_secs(1000))
    }
}

impl ItemExponentialFailureRateLimiter {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self {
            base,
            max_delay,
            failures: Mutex::new(AHashMap::new()),
        }
    }

    /// Records one more failure of `key` and returns how long to wait.
    pub fn when(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.to_string()).or_insert(0);
        let exp = *count;
        *count = count.saturating_add(1);

        // 2^exp overflows u32 well before exp reaches 32.
        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        match self.base.checked_mul(factor) {
            Some(delay) if delay <= self.max_delay => delay,
            _ => self.max_delay,
        }
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    pub fn forget(&self, key: &str) {
        self.failures.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_failure() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        assert_eq!(limiter.when("a"), Duration::from_millis(5));
        assert_eq!(limiter.when("a"), Duration::from_millis(10));
        assert_eq!(limiter.when("a"), Duration::from_millis(20));
        assert_eq!(limiter.num_requeues("a"), 3);
        assert_eq!(limiter.when("b"), Duration::from_millis(5));
    }

    #[test]
    fn saturates_at_maximum_delay() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        let mut last = Duration::ZERO;
        for _ in 0..64 {
            last = limiter.when("a");
        }
        assert_eq!(last, Duration::from_secs(1000));
    }

    #[test]
    fn forget_resets_the_counter() {
        let limiter = ItemExponentialFailureRateLimiter::default();
        limiter.when("a");
        limiter.when("a");
        limiter.forget("a");
        assert_eq!(limiter.num_requeues("a"), 0);
        assert_eq!(limiter.when("a"), Duration::from_millis(5));
    }
}
