pub mod grid;
pub mod loader;
pub mod model;

pub use loader::{load_from_str, load_from_str_default};
pub use model::{Campaign, CollectionType, DataType, DroppedCollection, FileRef, LoadReport, UnifiedIndex};

use crate::error::ElevationError;

impl UnifiedIndex {
    /// Every campaign whose `coverage_bounds` contains `(lat, lon)`.
    /// O(log N)-ish via the global grid; see [`grid::SpatialGrid`].
    pub fn query(&self, lat: f64, lon: f64) -> Result<Vec<&Campaign>, ElevationError> {
        Ok(self
            .grid
            .query(lat, lon)
            .iter()
            .map(|&idx| &self.collections[idx])
            .filter(|c| c.coverage_bounds.contains(lat, lon))
            .collect())
    }

    /// Files within `campaign` whose bounds contain `(lat, lon)`.
    pub fn files(&self, campaign: &Campaign, lat: f64, lon: f64) -> Vec<&FileRef> {
        campaign.files_containing(lat, lon)
    }

    /// Index-based variant of [`UnifiedIndex::query`]. Returns indices into
    /// `self.collections` rather than references, so callers can hold them
    /// alongside an `Arc<UnifiedIndex>` across an `.await` point.
    pub fn campaign_indices(&self, lat: f64, lon: f64) -> Vec<usize> {
        self.grid
            .query(lat, lon)
            .iter()
            .copied()
            .filter(|&idx| self.collections[idx].coverage_bounds.contains(lat, lon))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
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
                            "file": "s3://bucket/brisbane.tif",
                            "filename": "brisbane.tif",
                            "bounds": {"min_lat": -27.5, "max_lat": -27.4, "min_lon": 153.0, "max_lon": 153.1},
                            "size_mb": 12.5,
                            "last_modified": "2023-06-01T00:00:00Z",
                            "resolution": "1m"
                        }
                    ]
                }
            ]
        }"#
    }

    #[test]
    fn query_and_files_roundtrip() {
        let idx = load_from_str_default(sample_json()).unwrap();
        let campaigns = idx.query(-27.45, 153.05).unwrap();
        assert_eq!(campaigns.len(), 1);
        let files = idx.files(campaigns[0], -27.45, 153.05);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "brisbane.tif");
    }

    #[test]
    fn query_outside_any_campaign_is_empty() {
        let idx = load_from_str_default(sample_json()).unwrap();
        assert!(idx.query(-85.0, 0.0).unwrap().is_empty());
    }
}
