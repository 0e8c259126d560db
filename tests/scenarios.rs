//! End-to-end coverage of the façade's six concrete query scenarios, plus
//! the deadline/overload properties that don't fit naturally as unit tests
//! inside a single module.
//!
//! These exercise `Engine` + `Chain` orchestration against stand-in tiers
//! rather than real object storage: tile decoding and CRS transforms are
//! already covered where they live, under `src/raster` and `src/geo`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use elevation_core::cache::ConcurrencyLimiter;
use elevation_core::chain::{Chain, ConfiguredTier, Outcome, Tier, TierConfig};
use elevation_core::telemetry::PerformanceMonitor;
use elevation_core::{Engine, ElevationError};

/// A tier that always hits for points inside a lat/lon box, and misses
/// (not errors) everywhere else, standing in for a campaign raster tier.
struct BoxCampaign {
    name: &'static str,
    lat_range: (f64, f64),
    lon_range: (f64, f64),
    elevation_m: f64,
}

#[async_trait]
impl Tier for BoxCampaign {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, lat: f64, lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
        let in_box = (self.lat_range.0..=self.lat_range.1).contains(&lat) && (self.lon_range.0..=self.lon_range.1).contains(&lon);
        if in_box {
            Outcome::Hit { elevation_m: self.elevation_m, source_id: self.name.to_string(), datum: None }
        } else {
            Outcome::Miss
        }
    }
}

/// A tier that never has coverage, the shape `S3Tier` returns when the
/// selector finds no campaign for the point.
struct NoCoverage;

#[async_trait]
impl Tier for NoCoverage {
    fn name(&self) -> &str {
        "no_coverage"
    }

    async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
        Outcome::Skip("no campaign covers this point")
    }
}

/// A remote elevation API stand-in that always returns a fixed value.
struct AlwaysHitApi {
    name: &'static str,
    elevation_m: f64,
}

#[async_trait]
impl Tier for AlwaysHitApi {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
        Outcome::Hit { elevation_m: self.elevation_m, source_id: self.name.to_string(), datum: Some("EGM2008".to_string()) }
    }
}

/// A remote API stand-in that always declines outright (permanent error),
/// modeling both external APIs being unreachable for a point.
struct DecliningApi {
    name: &'static str,
}

#[async_trait]
impl Tier for DecliningApi {
    fn name(&self) -> &str {
        self.name
    }

    async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
        Outcome::PermanentErr(ElevationError::RasterAccess { uri: "no coverage for this region".to_string() })
    }
}

fn default_engine(chain: Chain) -> Engine {
    Engine::new(chain, ConcurrencyLimiter::new(64, 256), PerformanceMonitor::new(100.0, 500.0), Duration::from_secs(3))
}

fn tier(t: impl Tier + 'static) -> ConfiguredTier {
    ConfiguredTier::new(Box::new(t), TierConfig::default(), 1_000, 0)
}

/// Brisbane CBD: covered by a 1 m campaign raster, should hit the S3 tier
/// directly with a plausible elevation and that campaign's source id.
#[tokio::test]
async fn brisbane_cbd_hits_the_local_campaign_tier() {
    let chain = Chain::new(vec![tier(BoxCampaign {
        name: "qld-brisbane-2019-1m",
        lat_range: (-28.0, -27.0),
        lon_range: (152.5, 153.5),
        elevation_m: 22.0,
    })]);
    let engine = default_engine(chain);

    let result = engine.elevation_at(-27.4698, 153.0251).await.unwrap();
    assert_eq!(result.source_id, "qld-brisbane-2019-1m");
    assert_eq!(result.elevation_m, Some(22.0));
    assert_eq!(result.crs, "EPSG:4326");
    assert!(result.message.is_none());
}

/// Auckland Harbor: a second campaign, distinct from Brisbane's, confirming
/// the chain picks the right regional tier rather than falling through.
#[tokio::test]
async fn auckland_harbor_hits_its_own_campaign_tier() {
    let chain = Chain::new(vec![tier(BoxCampaign {
        name: "nz-auckland-2020-1m",
        lat_range: (-37.5, -36.5),
        lon_range: (174.0, 175.0),
        elevation_m: 5.0,
    })]);
    let engine = default_engine(chain);

    let result = engine.elevation_at(-36.8485, 174.7633).await.unwrap();
    assert_eq!(result.source_id, "nz-auckland-2020-1m");
    assert_eq!(result.elevation_m, Some(5.0));
}

/// Mid-Pacific: no campaign raster covers open ocean, so the chain falls
/// through the empty S3 tier to the first external API, which returns a
/// value (0 m near sea level is a legitimate answer, not nodata).
#[tokio::test]
async fn mid_pacific_falls_through_to_external_api() {
    let chain = Chain::new(vec![tier(NoCoverage), tier(AlwaysHitApi { name: "api-a", elevation_m: 0.0 })]);
    let engine = default_engine(chain);

    let result = engine.elevation_at(0.0, -160.0).await.unwrap();
    assert_eq!(result.source_id, "api-a");
    assert_eq!(result.elevation_m, Some(0.0));
}

/// Antarctica: no campaign coverage and both external APIs decline, so the
/// façade returns a null elevation with source_id "none" and an
/// explanatory message rather than propagating an error.
#[tokio::test]
async fn antarctica_returns_a_null_result_when_every_tier_declines() {
    let chain = Chain::new(vec![
        tier(NoCoverage),
        tier(DecliningApi { name: "api-a" }),
        tier(DecliningApi { name: "api-b" }),
    ]);
    let engine = default_engine(chain);

    let result = engine.elevation_at(-85.0, 0.0).await.unwrap();
    assert_eq!(result.elevation_m, None);
    assert_eq!(result.source_id, "none");
    assert!(result.message.is_some());
}

/// An out-of-range coordinate is rejected before any tier is even tried.
#[tokio::test]
async fn invalid_coordinate_is_rejected_up_front() {
    let chain = Chain::new(vec![tier(AlwaysHitApi { name: "api-a", elevation_m: 1.0 })]);
    let engine = default_engine(chain);

    let err = engine.elevation_at(91.0, 0.0).await.unwrap_err();
    assert!(matches!(err, ElevationError::InvalidInput { .. }));
}

/// A line of 500 points across Sydney Harbour: every point should come
/// back, in order, each a hit against the same local campaign.
#[tokio::test]
async fn line_of_500_points_returns_all_in_order() {
    let chain = Chain::new(vec![tier(BoxCampaign {
        name: "nsw-sydney-2021-1m",
        lat_range: (-34.5, -33.0),
        lon_range: (150.5, 151.5),
        elevation_m: 12.0,
    })]);
    let engine = default_engine(chain);

    let start = std::time::Instant::now();
    let results = engine
        .elevation_along_line((-33.86, 151.15), (-33.82, 151.23), 500)
        .await
        .unwrap();
    assert_eq!(results.len(), 500);
    assert!(results.iter().all(|r| r.source_id == "nsw-sydney-2021-1m"));
    assert!(start.elapsed() < Duration::from_secs(2));
}

/// P4: tier chain monotonicity. The chain always returns the first hit it
/// finds walking tiers in order; a later tier that would also hit must
/// never override an earlier one.
#[tokio::test]
async fn earlier_tier_hit_is_never_overridden_by_a_later_one() {
    let chain = Chain::new(vec![
        tier(AlwaysHitApi { name: "primary", elevation_m: 10.0 }),
        tier(AlwaysHitApi { name: "secondary", elevation_m: 999.0 }),
    ]);
    let engine = default_engine(chain);

    let result = engine.elevation_at(10.0, 10.0).await.unwrap();
    assert_eq!(result.source_id, "primary");
    assert_eq!(result.elevation_m, Some(10.0));
}

/// P9: a tier slower than the remaining request budget is skipped rather
/// than awaited past the deadline, and the overall call still returns
/// promptly with a null result.
#[tokio::test]
async fn slow_tier_is_skipped_once_the_deadline_is_exhausted() {
    struct SlowTier;

    #[async_trait]
    impl Tier for SlowTier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Outcome::Hit { elevation_m: 1.0, source_id: "slow".to_string(), datum: None }
        }
    }

    let chain = Chain::new(vec![ConfiguredTier::new(
        Box::new(SlowTier),
        TierConfig { timeout_ms: 20, max_attempts: 1, ..Default::default() },
        1_000,
        0,
    )]);
    let engine = Engine::new(chain, ConcurrencyLimiter::new(64, 256), PerformanceMonitor::new(100.0, 500.0), Duration::from_millis(50));

    let start = std::time::Instant::now();
    let result = engine.elevation_at(1.0, 1.0).await.unwrap();
    assert_eq!(result.elevation_m, None);
    assert!(start.elapsed() < Duration::from_secs(1));
}

/// P5: a caller that cancels before any tier returns gets a prompt
/// `source_id = "cancelled"` result, and the slow tier's own work never
/// completes — no zombie I/O survives past cancellation.
#[tokio::test]
async fn cancelling_a_request_returns_a_cancelled_source_promptly() {
    struct SlowTier {
        finished: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tier for SlowTier {
        fn name(&self) -> &str {
            "slow"
        }

        async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Outcome::Hit { elevation_m: 1.0, source_id: "slow".to_string(), datum: None }
        }
    }

    let finished = Arc::new(AtomicU32::new(0));
    let chain = Chain::new(vec![ConfiguredTier::new(
        Box::new(SlowTier { finished: finished.clone() }),
        TierConfig { timeout_ms: 5_000, max_attempts: 1, ..Default::default() },
        1_000,
        0,
    )]);
    let engine = Engine::new(chain, ConcurrencyLimiter::new(64, 256), PerformanceMonitor::new(100.0, 500.0), Duration::from_secs(5));

    let cancel = CancellationToken::new();
    let cancel_in = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_in.cancel();
    });

    let start = std::time::Instant::now();
    let result = engine.elevation_at_cancellable(1.0, 1.0, &cancel).await.unwrap();
    assert_eq!(result.source_id, "cancelled");
    assert_eq!(result.elevation_m, None);
    assert!(start.elapsed() < Duration::from_secs(1), "cancellation must not wait out the slow tier");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(finished.load(Ordering::SeqCst), 0, "the in-flight tier attempt was dropped, not run to completion");
}

/// Overload is the one tier-chain failure that must surface through the
/// façade rather than collapsing into a null result.
#[tokio::test]
async fn overload_propagates_as_an_error_not_a_null_result() {
    let calls = Arc::new(AtomicU32::new(0));

    struct CountingHit {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tier for CountingHit {
        fn name(&self) -> &str {
            "counting"
        }

        async fn attempt(&self, _lat: f64, _lon: f64, _timeout: Duration, _cancel: &CancellationToken) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Outcome::Hit { elevation_m: 1.0, source_id: "counting".to_string(), datum: None }
        }
    }

    let chain = Chain::new(vec![tier(CountingHit { calls: calls.clone() })]);
    let engine = Arc::new(Engine::new(chain, ConcurrencyLimiter::new(1, 0), PerformanceMonitor::new(100.0, 500.0), Duration::from_secs(3)));

    let e1 = engine.clone();
    let first = tokio::spawn(async move { e1.elevation_at(1.0, 1.0).await });
    tokio::task::yield_now().await;

    let second = engine.elevation_at(2.0, 2.0).await;
    assert!(matches!(second, Err(ElevationError::Overloaded)));

    let first = first.await.unwrap();
    assert!(first.is_ok());
}
