use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::cache::ConcurrencyLimiter;
use crate::chain::Chain;
use crate::error::ElevationError;
use crate::geo::Point;
use crate::telemetry::{PerformanceMonitor, Sample};

/// Maximum points accepted by a single path query (spec §4.8).
pub const MAX_PATH_POINTS: usize = 10_000;
/// Chunk size for bounded parallel fan-in over path queries.
pub const PATH_CHUNK_SIZE: usize = 128;
/// Default number of chunks sampled concurrently.
pub const DEFAULT_CHUNK_CONCURRENCY: usize = 8;

const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// One point's worth of elevation, the shape returned for every façade
/// operation (spec §3: `{elevation_m, source_id, crs}`, extended with
/// `message`/`datum` per spec §7/§4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationResult {
    pub elevation_m: Option<f64>,
    pub source_id: String,
    pub crs: &'static str,
    pub message: Option<String>,
    pub datum: Option<String>,
}

/// The upward query interface (spec §4.8). Owns the tier chain, the
/// global concurrency admission gate, and the performance monitor;
/// everything else (index, selector, dataset cache) is reachable only
/// through the tiers the chain was built with.
pub struct Engine {
    chain: Chain,
    limiter: ConcurrencyLimiter,
    monitor: PerformanceMonitor,
    request_deadline: Duration,
    chunk_concurrency: usize,
}

impl Engine {
    pub fn new(chain: Chain, limiter: ConcurrencyLimiter, monitor: PerformanceMonitor, request_deadline: Duration) -> Self {
        Self { chain, limiter, monitor, request_deadline, chunk_concurrency: DEFAULT_CHUNK_CONCURRENCY }
    }

    pub fn with_chunk_concurrency(mut self, chunk_concurrency: usize) -> Self {
        self.chunk_concurrency = chunk_concurrency.max(1);
        self
    }

    /// `ElevationAt(lat, lon) → ElevationResult`.
    pub async fn elevation_at(&self, lat: f64, lon: f64) -> Result<ElevationResult, ElevationError> {
        self.elevation_at_cancellable(lat, lon, &CancellationToken::new()).await
    }

    /// Same as [`Engine::elevation_at`], but takes an externally-owned
    /// cancellation token (spec §4.6: deadline expiry or client disconnect
    /// cancels all downstream operations). If `cancel` fires before any
    /// tier produces a result, the call returns promptly with
    /// `source_id = "cancelled"` rather than waiting out an in-flight tier.
    pub async fn elevation_at_cancellable(
        &self,
        lat: f64,
        lon: f64,
        cancel: &CancellationToken,
    ) -> Result<ElevationResult, ElevationError> {
        let point = Point::new(lat, lon)?;
        self.sample_one(point, cancel).await
    }

    /// `ElevationAlongLine(start, end, n) → [ElevationResult]`, great-
    /// circle subdivided, `n ≥ 2`, exactly `n` results in order.
    pub async fn elevation_along_line(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        n: usize,
    ) -> Result<Vec<ElevationResult>, ElevationError> {
        if n < 2 {
            return Err(ElevationError::InvalidInput { reason: "line query requires n >= 2".to_string() });
        }
        let a = Point::new(start.0, start.1)?;
        let b = Point::new(end.0, end.1)?;

        let points: Vec<(f64, f64)> = (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                let p = a.slerp(&b, t);
                (p.lat, p.lon)
            })
            .collect();

        self.elevation_at_path(&points).await
    }

    /// `ElevationAtPath(points) → [ElevationResult]`, order-preserving,
    /// bounded parallel fan-in over chunks of [`PATH_CHUNK_SIZE`] points.
    pub async fn elevation_at_path(&self, points: &[(f64, f64)]) -> Result<Vec<ElevationResult>, ElevationError> {
        if points.len() > MAX_PATH_POINTS {
            return Err(ElevationError::InvalidInput {
                reason: format!("path query exceeds the {MAX_PATH_POINTS}-point limit"),
            });
        }
        let validated: Vec<Point> = points
            .iter()
            .map(|&(lat, lon)| Point::new(lat, lon))
            .collect::<Result<_, _>>()?;

        // One cancellation token shared across every point: if the caller
        // drops this whole path query, every chunk's in-flight samples are
        // cancelled together rather than only the chunk that was mid-flight.
        let cancel = CancellationToken::new();
        let chunk_futures = validated.chunks(PATH_CHUNK_SIZE).map(|chunk| {
            let cancel = &cancel;
            async move {
                let mut out = Vec::with_capacity(chunk.len());
                for &p in chunk {
                    out.push(self.sample_one(p, cancel).await);
                }
                out
            }
        });

        let chunked: Vec<Result<Vec<ElevationResult>, ElevationError>> =
            stream::iter(chunk_futures).buffered(self.chunk_concurrency).collect().await;

        let mut flat = Vec::with_capacity(points.len());
        for chunk in chunked {
            flat.extend(chunk?);
        }
        Ok(flat)
    }

    /// `ElevationInPolygon(polygon, stride_m, max_points) → [(lat, lon, elev)]`.
    /// Grid-samples the polygon's bounding box, discards samples outside
    /// the polygon, then uniformly down-samples to `max_points`.
    pub async fn elevation_in_polygon(
        &self,
        polygon: &[(f64, f64)],
        stride_m: f64,
        max_points: usize,
    ) -> Result<Vec<(f64, f64, Option<f64>)>, ElevationError> {
        if polygon.len() < 3 {
            return Err(ElevationError::InvalidInput { reason: "polygon requires at least 3 vertices".to_string() });
        }
        if stride_m <= 0.0 {
            return Err(ElevationError::InvalidInput { reason: "stride_m must be positive".to_string() });
        }

        let min_lat = polygon.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
        let max_lat = polygon.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
        let min_lon = polygon.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_lon = polygon.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);

        let centroid_lat = (min_lat + max_lat) / 2.0;
        let lat_step = (stride_m / METERS_PER_DEGREE_LAT).max(1e-9);
        let lon_step = (stride_m / (METERS_PER_DEGREE_LAT * centroid_lat.to_radians().cos().abs().max(1e-6))).max(1e-9);

        let mut grid_points = Vec::new();
        let mut lat = min_lat;
        while lat <= max_lat {
            let mut lon = min_lon;
            while lon <= max_lon {
                if point_in_polygon(polygon, lat, lon) {
                    grid_points.push((lat, lon));
                }
                lon += lon_step;
            }
            lat += lat_step;
        }

        let sampled_points = uniform_downsample(grid_points, max_points);
        let results = self.elevation_at_path(&sampled_points).await?;
        Ok(sampled_points
            .into_iter()
            .zip(results)
            .map(|((lat, lon), r)| (lat, lon, r.elevation_m))
            .collect())
    }

    /// Runs the tier chain for one point, admission-gated by the global
    /// concurrency cap. Overload is the only tier-chain failure that
    /// surfaces to the caller; everything else becomes a null result with
    /// an explanatory `message` (spec §7).
    async fn sample_one(&self, point: Point, cancel: &CancellationToken) -> Result<ElevationResult, ElevationError> {
        let _permit = self.limiter.acquire().await?;

        let start = Instant::now();
        let outcome = self.chain.run(point.lat, point.lon, self.request_deadline, cancel).await;
        self.monitor.record(Sample {
            endpoint: "elevation_at".to_string(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            success: outcome.elevation_m.is_some(),
            error_kind: None,
        });

        Ok(ElevationResult {
            elevation_m: outcome.elevation_m,
            source_id: outcome.source_id,
            crs: "EPSG:4326",
            message: outcome.message,
            datum: None,
        })
    }
}

fn point_in_polygon(polygon: &[(f64, f64)], lat: f64, lon: f64) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (lat_i, lon_i) = polygon[i];
        let (lat_j, lon_j) = polygon[j];
        if ((lon_i > lon) != (lon_j > lon)) && (lat < (lat_j - lat_i) * (lon - lon_i) / (lon_j - lon_i) + lat_i) {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Evenly-spaced selection down to `max_points`, so retained samples stay
/// spatially balanced rather than clustering at one end.
fn uniform_downsample(points: Vec<(f64, f64)>, max_points: usize) -> Vec<(f64, f64)> {
    if max_points == 0 || points.len() <= max_points {
        return points;
    }
    let stride = points.len() as f64 / max_points as f64;
    (0..max_points)
        .map(|i| points[((i as f64 * stride) as usize).min(points.len() - 1)])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_in_polygon_handles_a_simple_square() {
        let square = [(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
        assert!(point_in_polygon(&square, 0.5, 0.5));
        assert!(!point_in_polygon(&square, 1.5, 0.5));
    }

    #[test]
    fn uniform_downsample_keeps_requested_count() {
        let points: Vec<(f64, f64)> = (0..100).map(|i| (i as f64, 0.0)).collect();
        let reduced = uniform_downsample(points, 10);
        assert_eq!(reduced.len(), 10);
    }

    #[test]
    fn uniform_downsample_is_a_noop_under_the_cap() {
        let points = vec![(0.0, 0.0), (1.0, 1.0)];
        let reduced = uniform_downsample(points.clone(), 10);
        assert_eq!(reduced, points);
    }
}
