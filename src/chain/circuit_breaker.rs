use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Opens after `threshold` consecutive permanent failures; allows one
/// half-open probe every `half_open_after` once open. A successful probe
/// closes the breaker; a failed probe keeps it open for another interval.
///
/// Plain atomics rather than a mutex: the only cross-thread coordination
/// needed is "did we already pass the half-open gate this interval",
/// which a compare-exchange on a packed timestamp handles without
/// blocking concurrent requests on each other.
pub struct CircuitBreaker {
    threshold: u32,
    half_open_after: Duration,
    consecutive_failures: AtomicU32,
    opened_at_millis: AtomicU64,
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, half_open_after: Duration) -> Self {
        Self {
            threshold,
            half_open_after,
            consecutive_failures: AtomicU32::new(0),
            opened_at_millis: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Whether an attempt should be allowed right now. `Skip` outcomes do
    /// not call this at all — only a tier that's actually open consults it.
    pub fn allow_attempt(&self) -> bool {
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        if opened_at == 0 {
            return true; // never opened
        }
        let elapsed = self.now_millis().saturating_sub(opened_at);
        elapsed >= self.half_open_after.as_millis() as u64
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
    }

    /// Records a permanent failure; opens the breaker once `threshold`
    /// consecutive permanent failures have been observed.
    pub fn record_permanent_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.threshold {
            // A half-open probe that fails re-opens the window from now,
            // rather than leaving the stale timestamp in place.
            self.opened_at_millis.store(self.now_millis().max(1), Ordering::Release);
        }
    }

    pub fn is_open(&self) -> bool {
        self.opened_at_millis.load(Ordering::Acquire) != 0 && !self.allow_attempt()
    }
}
