use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::error::ElevationError;
use crate::raster::NullReason;

/// Identifies a sample request for coalescing purposes: which raster,
/// rounded to a resolution finer than any real pixel so two requests for
/// "the same" point collapse even with floating-point jitter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SampleKey {
    pub handle_path: String,
    lat_micro: i64,
    lon_micro: i64,
}

impl SampleKey {
    pub fn new(handle_path: &str, lat: f64, lon: f64) -> Self {
        Self {
            handle_path: handle_path.to_string(),
            lat_micro: (lat * 1_000_000.0).round() as i64,
            lon_micro: (lon * 1_000_000.0).round() as i64,
        }
    }
}

type SampleOutcome = Result<(Option<f64>, Option<NullReason>), ElevationError>;

/// Coalesces concurrent `SamplePoint(handle, lat, lon)` calls for the
/// same key (spec §4.6): the first caller for a key does the real work,
/// every concurrent caller for the same key gets its result over a
/// broadcast channel instead of re-issuing the range read. Not required
/// for correctness, only for avoiding duplicate object-storage reads
/// under request bursts.
pub struct SampleCoalescer {
    inflight: DashMap<SampleKey, broadcast::Sender<SampleOutcome>>,
}

impl SampleCoalescer {
    pub fn new() -> Self {
        Self { inflight: DashMap::new() }
    }

    pub async fn sample<F, Fut>(&self, key: SampleKey, compute: F) -> SampleOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SampleOutcome>,
    {
        match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                let mut rx = entry.get().subscribe();
                drop(entry);
                rx.recv()
                    .await
                    .unwrap_or_else(|_| Err(ElevationError::Transient { reason: "coalesced sample leader dropped".into() }))
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx.clone());
                let result = compute().await;
                self.inflight.remove(&key);
                let _ = tx.send(result.clone());
                result
            }
        }
    }
}

impl Default for SampleCoalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn concurrent_identical_requests_share_one_compute() {
        let coalescer = Arc::new(SampleCoalescer::new());
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .sample(SampleKey::new("s3://bucket/a.tif", -27.45, 153.05), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        Ok((Some(42.0), None))
                    })
                    .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), (Some(42.0), None));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let coalescer = SampleCoalescer::new();
        let a = coalescer
            .sample(SampleKey::new("s3://bucket/a.tif", 1.0, 2.0), || async { Ok((Some(1.0), None)) })
            .await
            .unwrap();
        let b = coalescer
            .sample(SampleKey::new("s3://bucket/a.tif", 3.0, 4.0), || async { Ok((Some(2.0), None)) })
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
