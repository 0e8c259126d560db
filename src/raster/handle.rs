use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use moka::future::Cache;

use crate::error::ElevationError;
use crate::geo::{crs, Crs};
use crate::storage::{ObjectLocation, ObjectStore};

use super::geotiff::{parse_header, RasterHeader};
use super::sample::{decode_sample, locate_chunk};

/// Header + first geo-tag block are read in one ranged read, per spec
/// §4.4 ("≤ 64 KiB typically").
const HEADER_PROBE_BYTES: u64 = 65_536;

/// An open raster: parsed header plus whatever's needed to fetch more
/// chunk bytes on demand. Shared across concurrent requests via `Arc`,
/// handed out by [`DatasetCache`].
pub struct RasterHandle {
    pub path: String,
    location: ObjectLocation,
    header: RasterHeader,
    store: Arc<dyn ObjectStore>,
}

/// Reason a sample came back empty, surfaced to the caller for telemetry
/// and the façade's `message` field — distinct from an `Err`, since
/// "outside this raster" and "value is nodata" are both legitimate nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullReason {
    OutOfRaster,
    Nodata,
}

impl RasterHandle {
    pub async fn open(path: &str, store: Arc<dyn ObjectStore>) -> Result<RasterHandle, ElevationError> {
        let location = ObjectLocation::parse(path)?;
        let probe = store.get_range(&location, 0, HEADER_PROBE_BYTES).await?;
        let header = parse_header(&probe)?;
        Ok(RasterHandle {
            path: path.to_string(),
            location,
            header,
            store,
        })
    }

    pub fn native_crs(&self) -> Crs {
        self.header.native_crs
    }

    pub fn nodata(&self) -> Option<f64> {
        self.header.nodata
    }

    fn world_to_pixel(&self, lat: f64, lon: f64) -> Result<Option<(u32, u32)>, ElevationError> {
        let (x, y) = crs::transform(Crs::WGS84, self.header.native_crs, lon, lat)?;
        let Some((col_f, row_f)) = self.header.transform.world_to_pixel(x, y) else {
            return Err(ElevationError::UnsupportedCrs {
                crs: "degenerate affine transform".to_string(),
            });
        };
        let (col, row) = (col_f.floor(), row_f.floor());
        if col < 0.0 || row < 0.0 || col as u32 >= self.header.width || row as u32 >= self.header.height {
            return Ok(None);
        }
        Ok(Some((col as u32, row as u32)))
    }

    /// Samples the pixel whose rectangle encloses `(lat, lon)`. Nearest-
    /// neighbor only, never bilinear (spec §4.4).
    pub async fn sample_point(&self, lat: f64, lon: f64) -> Result<(Option<f64>, Option<NullReason>), ElevationError> {
        let Some((col, row)) = self.world_to_pixel(lat, lon)? else {
            return Ok((None, Some(NullReason::OutOfRaster)));
        };

        let loc = locate_chunk(&self.header.chunk_layout, col, row);
        let offset = *self
            .header
            .chunk_offsets
            .get(loc.chunk_index)
            .ok_or_else(|| ElevationError::UnsupportedCrs {
                crs: "chunk index out of range for this raster's layout".to_string(),
            })?;
        let len = *self
            .header
            .chunk_byte_counts
            .get(loc.chunk_index)
            .ok_or_else(|| ElevationError::UnsupportedCrs {
                crs: "chunk byte count missing for this raster's layout".to_string(),
            })?;

        let bytes = self.store.get_range(&self.location, offset, offset + len).await?;
        let value = decode_sample(&self.header, &bytes, loc)?;
        Ok(match value {
            Some(v) => (Some(v), None),
            None => (None, Some(NullReason::Nodata)),
        })
    }

    /// Batched sampling for a set of points, used by window/contour-style
    /// callers. Fetches each distinct chunk at most once.
    pub async fn sample_many(
        &self,
        points: &[(f64, f64)],
    ) -> Result<Vec<Result<(Option<f64>, Option<NullReason>), ElevationError>>, ElevationError> {
        let mut chunk_cache: HashMap<usize, bytes::Bytes> = HashMap::new();
        let mut results = Vec::with_capacity(points.len());

        for &(lat, lon) in points {
            let outcome = async {
                let Some((col, row)) = self.world_to_pixel(lat, lon)? else {
                    return Ok((None, Some(NullReason::OutOfRaster)));
                };
                let loc = locate_chunk(&self.header.chunk_layout, col, row);

                if !chunk_cache.contains_key(&loc.chunk_index) {
                    let offset = self.header.chunk_offsets[loc.chunk_index];
                    let len = self.header.chunk_byte_counts[loc.chunk_index];
                    let bytes = self.store.get_range(&self.location, offset, offset + len).await?;
                    chunk_cache.insert(loc.chunk_index, bytes);
                }
                let bytes = chunk_cache.get(&loc.chunk_index).unwrap();
                let value = decode_sample(&self.header, bytes, loc)?;
                Ok(match value {
                    Some(v) => (Some(v), None),
                    None => (None, Some(NullReason::Nodata)),
                })
            }
            .await;
            results.push(outcome);
        }

        Ok(results)
    }
}

/// LRU handle cache with single-flight opens (spec §4.6: "the cache ...
/// coalesces concurrent `Open(path)` calls so that only one header read
/// is issued per cold miss").
pub struct DatasetCache {
    cache: Cache<String, Arc<RasterHandle>>,
    store: Arc<dyn ObjectStore>,
}

impl DatasetCache {
    pub fn new(capacity: u64, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cache: Cache::builder().max_capacity(capacity).build(),
            store,
        }
    }

    pub async fn open(&self, path: &str) -> Result<Arc<RasterHandle>, ElevationError> {
        let start = Instant::now();
        let store = self.store.clone();
        let path_owned = path.to_string();

        let result = self
            .cache
            .try_get_with(path_owned.clone(), async move {
                RasterHandle::open(&path_owned, store).await.map(Arc::new)
            })
            .await;

        match result {
            Ok(handle) => {
                metrics::histogram!("raster_handle_open_duration_seconds").record(start.elapsed().as_secs_f64());
                Ok(handle)
            }
            Err(shared) => Err((*shared).clone()),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeObjectStore;
    use crate::storage::ObjectLocation;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps a store to count `get_range` calls, independent of whether
    /// the underlying open eventually succeeds or fails.
    struct CountingStore {
        inner: FakeObjectStore,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ObjectStore for CountingStore {
        async fn get_range(&self, location: &ObjectLocation, start: u64, end: u64) -> Result<bytes::Bytes, ElevationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.get_range(location, start, end).await
        }

        async fn size(&self, location: &ObjectLocation) -> Result<u64, ElevationError> {
            self.inner.size(location).await
        }
    }

    #[tokio::test]
    async fn concurrent_opens_of_the_same_path_read_the_header_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Arc::new(CountingStore { inner: FakeObjectStore::new(), calls: calls.clone() });
        // No object registered: every open fails, but the header probe
        // read should still be single-flighted across concurrent callers.
        let cache = Arc::new(DatasetCache::new(10, store));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.open("s3://bucket/shared.tif").await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_err());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
