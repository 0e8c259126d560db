pub mod api_tier;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod s3_tier;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::error::ElevationError;

use circuit_breaker::CircuitBreaker;
use rate_limit::TierRateLimiter;

/// Result of one attempt against a single tier.
///
/// `Miss` means the tier was reachable and definitively has no data for
/// this point (selector found no coverage, or the raster's pixel is
/// nodata) — distinct from an error, and the chain moves on without
/// penalizing the tier's circuit breaker. `Skip` means the tier wasn't
/// even tried (rate-limited, circuit open, insufficient remaining
/// budget) and also doesn't count as a failure. `Cancelled` means the
/// request's deadline expired or the caller disconnected mid-attempt
/// (spec §4.6); the chain stops walking tiers entirely rather than
/// falling through, since a cancelled request has no use for any result.
pub enum Outcome {
    Hit { elevation_m: f64, source_id: String, datum: Option<String> },
    Miss,
    Skip(&'static str),
    Cancelled,
    RetriableErr(ElevationError),
    PermanentErr(ElevationError),
}

#[async_trait]
pub trait Tier: Send + Sync {
    fn name(&self) -> &str;

    /// A single attempt, bounded by `per_attempt_timeout`. Retry/backoff
    /// across attempts is the chain loop's job, not the tier's. `cancel`
    /// is observed between any internal sub-steps (e.g. per-candidate
    /// raster opens) so a tier can stop early instead of relying solely
    /// on the chain's own outer cancellation race.
    async fn attempt(&self, lat: f64, lon: f64, per_attempt_timeout: Duration, cancel: &CancellationToken) -> Outcome;
}

/// Static per-tier knobs (spec §6.5): timeout, retry count, backoff base,
/// and the nominal cost used for budget accounting.
#[derive(Debug, Clone)]
pub struct TierConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: u32,
    pub cost_per_call_ms: u64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1_500,
            max_attempts: 2,
            backoff_base_ms: 50,
            backoff_factor: 2,
            cost_per_call_ms: 50,
        }
    }
}

/// A tier plus its runtime state: rate limiter and circuit breaker.
pub struct ConfiguredTier {
    tier: Box<dyn Tier>,
    config: TierConfig,
    limiter: TierRateLimiter,
    breaker: CircuitBreaker,
}

impl ConfiguredTier {
    pub fn new(tier: Box<dyn Tier>, config: TierConfig, rps: u32, daily_budget: u64) -> Self {
        Self {
            tier,
            limiter: TierRateLimiter::new(rps, daily_budget),
            breaker: CircuitBreaker::new(5, Duration::from_secs(30)),
            config,
        }
    }
}

/// Default whole-request deadline, spec §5 ("default 3 s").
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_millis(3_000);

/// Ordered tier chain: S3 first, then external APIs, with retry, backoff,
/// per-tier rate limiting and circuit breaking, all bounded by a single
/// request-level deadline (spec §4.5).
pub struct Chain {
    tiers: Vec<ConfiguredTier>,
}

/// Terminal result of running the whole chain for one point.
pub struct ChainResult {
    pub elevation_m: Option<f64>,
    pub source_id: String,
    pub message: Option<String>,
}

impl Chain {
    pub fn new(tiers: Vec<ConfiguredTier>) -> Self {
        Self { tiers }
    }

    /// Walks the tier chain under one request deadline and an optional
    /// external cancellation signal (spec §4.6: deadline expiry or client
    /// disconnect cancels all downstream operations). A cancelled request
    /// returns promptly with `source_id = "cancelled"` rather than
    /// whatever partial result the in-flight tier would have produced.
    pub async fn run(&self, lat: f64, lon: f64, deadline: Duration, cancel: &CancellationToken) -> ChainResult {
        let start = Instant::now();

        for tier in &self.tiers {
            if cancel.is_cancelled() {
                return cancelled_result();
            }
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                tracing::debug!(tier = tier.tier.name(), "deadline exhausted before this tier was tried");
                break;
            }
            let remaining = deadline - elapsed;
            if remaining.as_millis() < tier.config.cost_per_call_ms as u128 {
                tracing::debug!(tier = tier.tier.name(), "skipped: insufficient remaining budget");
                continue;
            }

            if tier.breaker.is_open() {
                tracing::debug!(tier = tier.tier.name(), "skipped: circuit open");
                continue;
            }

            match self.run_tier(tier, lat, lon, remaining, cancel).await {
                Outcome::Hit { elevation_m, source_id, datum: _ } => {
                    return ChainResult { elevation_m: Some(elevation_m), source_id, message: None };
                }
                Outcome::Miss => {
                    tier.breaker.record_success();
                    continue;
                }
                Outcome::Cancelled => return cancelled_result(),
                Outcome::Skip(_) => continue,
                Outcome::RetriableErr(_) | Outcome::PermanentErr(_) => continue,
            }
        }

        ChainResult {
            elevation_m: None,
            source_id: "none".to_string(),
            message: Some("no tier produced an elevation for this point".to_string()),
        }
    }

    /// Runs one tier to its own conclusion: rate limiting, retries with
    /// exponential backoff, and circuit-breaker bookkeeping. Every attempt
    /// races the tier's own future against `cancel`; dropping the losing
    /// branch of the `select!` cancels any nested I/O the tier started, so
    /// no zombie reads survive past cancellation (spec §5).
    async fn run_tier(&self, tier: &ConfiguredTier, lat: f64, lon: f64, budget: Duration, cancel: &CancellationToken) -> Outcome {
        if !tier.limiter.try_acquire() {
            return Outcome::Skip("rate limited or daily quota exhausted");
        }

        let per_attempt = Duration::from_millis(tier.config.timeout_ms);
        let mut backoff = Duration::from_millis(tier.config.backoff_base_ms);
        let deadline = Instant::now() + budget;

        let mut last = Outcome::Miss;
        for attempt in 0..tier.config.max_attempts {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            if Instant::now() >= deadline {
                break;
            }
            let this_timeout = per_attempt.min(deadline.saturating_duration_since(Instant::now()));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Outcome::Cancelled,
                res = tokio::time::timeout(this_timeout, tier.tier.attempt(lat, lon, this_timeout, cancel)) => {
                    res.unwrap_or(Outcome::RetriableErr(ElevationError::Timeout { elapsed_ms: this_timeout.as_millis() as u64 }))
                }
            };

            match &outcome {
                Outcome::Hit { .. } | Outcome::Miss => {
                    tier.breaker.record_success();
                    return outcome;
                }
                Outcome::Skip(_) | Outcome::Cancelled => return outcome,
                Outcome::PermanentErr(e) => {
                    tracing::warn!(tier = tier.tier.name(), error = %e, "permanent tier failure");
                    tier.breaker.record_permanent_failure();
                    return outcome;
                }
                Outcome::RetriableErr(e) => {
                    tracing::debug!(tier = tier.tier.name(), attempt, error = %e, "retriable tier failure");
                    last = outcome;
                    if attempt + 1 < tier.config.max_attempts {
                        tokio::select! {
                            _ = cancel.cancelled() => return Outcome::Cancelled,
                            _ = tokio::time::sleep(jittered(backoff)) => {}
                        }
                        backoff *= tier.config.backoff_factor;
                    }
                }
            }
        }
        last
    }
}

fn cancelled_result() -> ChainResult {
    ChainResult {
        elevation_m: None,
        source_id: "cancelled".to_string(),
        message: Some("request was cancelled before a tier produced a result".to_string()),
    }
}

/// Adds up to 20% random jitter to a backoff duration, so concurrent
/// requests retrying the same tier don't all wake up in lockstep.
fn jittered(base: Duration) -> Duration {
    let factor = rand::rng().random_range(1.0..1.2);
    Duration::from_secs_f64(base.as_secs_f64() * factor)
}
