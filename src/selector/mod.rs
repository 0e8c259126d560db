pub mod scoring;

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

use crate::geo::Crs;
use crate::index::UnifiedIndex;

/// Default capacity of the selector's `(rounded point) -> candidates` cache.
pub const DEFAULT_SELECTOR_CACHE_CAPACITY: usize = 4096;

/// One candidate `(campaign, file)` pair, holding an `Arc` to the whole
/// index rather than borrowed references so it can cross `.await` points
/// and be cached without tying up the index's own borrow.
#[derive(Clone)]
pub struct Candidate {
    index: Arc<UnifiedIndex>,
    campaign_idx: usize,
    file_idx: usize,
    pub score: f64,
}

impl Candidate {
    pub fn campaign(&self) -> &crate::index::Campaign {
        &self.index.collections[self.campaign_idx]
    }

    pub fn file(&self) -> &crate::index::FileRef {
        &self.campaign().files[self.file_idx]
    }

    pub fn source_id(&self) -> String {
        self.campaign().id.to_string()
    }

    pub fn native_crs(&self) -> Option<Crs> {
        self.file().native_crs()
    }
}

fn tie_break(a: &Candidate, b: &Candidate) -> Ordering {
    a.file()
        .resolution_m
        .partial_cmp(&b.file().resolution_m)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.campaign().latest_survey_year().cmp(&a.campaign().latest_survey_year()))
        .then_with(|| a.campaign().id.to_string().cmp(&b.campaign().id.to_string()))
        .then_with(|| a.file().path.cmp(&b.file().path))
}

/// Point → ordered candidate list, with scoring (spec §4.3).
pub struct Selector {
    index: Arc<UnifiedIndex>,
    current_year: i32,
    cache: Mutex<LruCache<(i64, i64), Arc<Vec<Candidate>>>>,
}

impl Selector {
    pub fn new(index: Arc<UnifiedIndex>) -> Self {
        Self::with_current_year(index, Utc::now().year())
    }

    pub fn with_current_year(index: Arc<UnifiedIndex>, current_year: i32) -> Self {
        Self {
            index,
            current_year,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_SELECTOR_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    /// Ordered candidate list for `(lat, lon)`, best first. Empty means no
    /// S3 coverage at all: the source chain falls through to API tiers
    /// without counting that as an S3 failure.
    pub fn select(&self, lat: f64, lon: f64) -> Arc<Vec<Candidate>> {
        let key = round_key(lat, lon);
        if let Some(cached) = self.cache.lock().expect("selector cache mutex poisoned").get(&key) {
            return cached.clone();
        }

        let mut candidates = Vec::new();
        for &campaign_idx in &self.index.campaign_indices(lat, lon) {
            let campaign = &self.index.collections[campaign_idx];
            let file_indices = campaign.file_indices_containing(lat, lon);
            if file_indices.is_empty() {
                tracing::debug!(
                    campaign_id = %campaign.id,
                    "campaign bounds matched but no file covers the point; bounds-consistency warning"
                );
                continue;
            }
            for file_idx in file_indices {
                let file = &campaign.files[file_idx];
                let score = scoring::score(campaign, file, self.current_year);
                candidates.push(Candidate {
                    index: self.index.clone(),
                    campaign_idx,
                    file_idx,
                    score,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| tie_break(a, b))
        });

        let result = Arc::new(candidates);
        self.cache
            .lock()
            .expect("selector cache mutex poisoned")
            .put(key, result.clone());
        result
    }

    /// Invalidates the cache; called after a full index reload (spec §3.3:
    /// rotation requires a full reload, which replaces the `Selector` too,
    /// but this exists for callers that want to keep the same `Selector`
    /// instance and swap its index).
    pub fn clear_cache(&self) {
        self.cache.lock().expect("selector cache mutex poisoned").clear();
    }
}

fn round_key(lat: f64, lon: f64) -> (i64, i64) {
    const FACTOR: f64 = 1_000_000.0; // round(_, 6)
    ((lat * FACTOR).round() as i64, (lon * FACTOR).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::load_from_str_default;

    fn two_campaign_json() -> &'static str {
        r#"{
            "version": "2.0",
            "generated_at": "2024-01-01T00:00:00Z",
            "data_collections": [
                {
                    "id": "00000000-0000-0000-0000-000000000001",
                    "collection_type": "australian_utm_zone",
                    "country": "AU",
                    "survey_years": [2019],
                    "data_type": "DEM",
                    "resolution_m": 1.0,
                    "provider": "ga",
                    "priority": 1,
                    "coverage_bounds": {"min_lat": -28.0, "max_lat": -27.0, "min_lon": 152.5, "max_lon": 153.5},
                    "files": [
                        {
                            "file": "s3://bucket/brisbane-1m.tif",
                            "filename": "brisbane-1m.tif",
                            "bounds": {"min_lat": -27.5, "max_lat": -27.4, "min_lon": 153.0, "max_lon": 153.1},
                            "size_mb": 12.5,
                            "last_modified": "2023-06-01T00:00:00Z",
                            "resolution": "1m"
                        }
                    ]
                },
                {
                    "id": "00000000-0000-0000-0000-000000000002",
                    "collection_type": "australian_utm_zone",
                    "country": "AU",
                    "survey_years": [2010],
                    "data_type": "DEM",
                    "resolution_m": 5.0,
                    "provider": "state government",
                    "priority": 2,
                    "coverage_bounds": {"min_lat": -28.0, "max_lat": -27.0, "min_lon": 152.5, "max_lon": 153.5},
                    "files": [
                        {
                            "file": "s3://bucket/brisbane-5m.tif",
                            "filename": "brisbane-5m.tif",
                            "bounds": {"min_lat": -27.5, "max_lat": -27.4, "min_lon": 153.0, "max_lon": 153.1},
                            "size_mb": 2.0,
                            "last_modified": "2023-06-01T00:00:00Z",
                            "resolution": "5m"
                        }
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn prefers_finer_resolution_campaign() {
        let idx = Arc::new(load_from_str_default(two_campaign_json()).unwrap());
        let selector = Selector::with_current_year(idx, 2024);
        let candidates = selector.select(-27.45, 153.05);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].file().filename, "brisbane-1m.tif");
    }

    #[test]
    fn selection_is_deterministic_across_calls() {
        let idx = Arc::new(load_from_str_default(two_campaign_json()).unwrap());
        let selector = Selector::with_current_year(idx, 2024);
        let first: Vec<_> = selector.select(-27.45, 153.05).iter().map(|c| c.file().path.clone()).collect();
        let second: Vec<_> = selector.select(-27.45, 153.05).iter().map(|c| c.file().path.clone()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_outside_any_campaign() {
        let idx = Arc::new(load_from_str_default(two_campaign_json()).unwrap());
        let selector = Selector::with_current_year(idx, 2024);
        assert!(selector.select(-85.0, 0.0).is_empty());
    }

    mod proptest_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every candidate `select()` returns must actually cover the
            /// query point: its file's bounds contain `(lat, lon)`.
            #[test]
            fn every_candidate_file_bounds_contains_the_query_point(
                lat in -27.5f64..-27.4, lon in 153.0f64..153.1,
            ) {
                let idx = Arc::new(load_from_str_default(two_campaign_json()).unwrap());
                let selector = Selector::with_current_year(idx, 2024);
                let candidates = selector.select(lat, lon);
                for candidate in candidates.iter() {
                    prop_assert!(candidate.file().bounds.contains(lat, lon));
                }
            }

            /// Repeated `select()` calls for the same point return the same
            /// ordered candidate list, cache or no cache.
            #[test]
            fn select_is_deterministic_across_repeated_calls(
                lat in -27.5f64..-27.4, lon in 153.0f64..153.1,
            ) {
                let idx = Arc::new(load_from_str_default(two_campaign_json()).unwrap());
                let selector = Selector::with_current_year(idx, 2024);
                let first: Vec<_> = selector.select(lat, lon).iter().map(|c| c.file().path.clone()).collect();
                let second: Vec<_> = selector.select(lat, lon).iter().map(|c| c.file().path.clone()).collect();
                let third: Vec<_> = selector.select(lat, lon).iter().map(|c| c.file().path.clone()).collect();
                prop_assert_eq!(&first, &second);
                prop_assert_eq!(&second, &third);
            }
        }
    }
}
