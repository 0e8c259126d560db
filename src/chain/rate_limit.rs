use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};

/// Per-tier RPS limiter plus a daily call quota that resets at UTC
/// midnight. RPS smoothing is `governor`'s job; the daily budget is a
/// plain counter since it only needs to reset once a day, not burst-smooth.
pub struct TierRateLimiter {
    rps: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    daily_budget: u64,
    calls_today: AtomicU64,
    day_epoch: AtomicU64,
}

fn day_index(now: std::time::SystemTime) -> u64 {
    now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() / 86_400
}

impl TierRateLimiter {
    pub fn new(rps: u32, daily_budget: u64) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap());
        Self {
            rps: GovernorLimiter::direct(quota),
            daily_budget,
            calls_today: AtomicU64::new(0),
            day_epoch: AtomicU64::new(day_index(std::time::SystemTime::now())),
        }
    }

    /// True if a call may proceed right now without exceeding the RPS rate
    /// or the daily quota. Does not block; callers treat a `false` as a
    /// `Skip` outcome for this attempt.
    pub fn try_acquire(&self) -> bool {
        let today = day_index(std::time::SystemTime::now());
        if self.day_epoch.swap(today, Ordering::AcqRel) != today {
            self.calls_today.store(0, Ordering::Release);
        }

        if self.daily_budget > 0 && self.calls_today.load(Ordering::Acquire) >= self.daily_budget {
            return false;
        }
        if self.rps.check().is_err() {
            return false;
        }
        self.calls_today.fetch_add(1, Ordering::AcqRel);
        true
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_daily_budget_means_unlimited() {
        let limiter = TierRateLimiter::new(1000, 0);
        for _ in 0..5 {
            assert!(limiter.try_acquire());
        }
    }

    #[test]
    fn daily_budget_caps_calls() {
        let limiter = TierRateLimiter::new(1000, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }
}
