use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::{BoundingBox, Crs};

/// Coarse meters-per-degree-latitude conversion, the same planar
/// approximation the polygon-sampling façade path uses — good enough for
/// sizing a tile-lookup grid cell, not for geodesy.
const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    AustralianUtmZone,
    NewZealandCampaign,
    ApiSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Dem,
    Dsm,
}

/// One raster file within a campaign.
///
/// `native_crs` and `nodata` are resolved lazily from the raster's own
/// GeoTIFF header the first time the file is opened (§4.4); `OnceLock`
/// gives single-assignment, read-mostly interior mutability without a
/// mutex on the hot path once the value is known.
#[derive(Debug)]
pub struct FileRef {
    pub path: String,
    pub filename: String,
    pub bounds: BoundingBox,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
    pub resolution_m: f64,
    native_crs: OnceLock<Crs>,
    nodata: OnceLock<Option<f64>>,
}

impl FileRef {
    pub fn new(
        path: String,
        filename: String,
        bounds: BoundingBox,
        size_bytes: u64,
        last_modified: DateTime<Utc>,
        resolution_m: f64,
    ) -> Self {
        Self {
            path,
            filename,
            bounds,
            size_bytes,
            last_modified,
            resolution_m,
            native_crs: OnceLock::new(),
            nodata: OnceLock::new(),
        }
    }

    pub fn native_crs(&self) -> Option<Crs> {
        self.native_crs.get().copied()
    }

    /// Stores the CRS discovered from the raster header, unless one was
    /// already recorded (the index JSON may carry it up front).
    pub fn set_native_crs(&self, crs: Crs) {
        let _ = self.native_crs.set(crs);
    }

    pub fn nodata(&self) -> Option<f64> {
        self.nodata.get().copied().flatten()
    }

    pub fn set_nodata(&self, nodata: Option<f64>) {
        let _ = self.nodata.set(nodata);
    }
}

/// A survey campaign (collection): the unit of provenance and prioritization.
#[derive(Debug)]
pub struct Campaign {
    pub id: Uuid,
    pub collection_type: CollectionType,
    pub country: Option<String>,
    pub region: Option<String>,
    pub survey_name: Option<String>,
    pub survey_years: Vec<i32>,
    pub data_type: DataType,
    pub resolution_m: f64,
    pub provider: String,
    pub coverage_bounds: BoundingBox,
    pub files: Vec<FileRef>,
    pub priority: u8,
    pub tile_dimension_m: Option<f64>,
    /// Per-campaign spatial grid over `files`, built unconditionally at
    /// load time as the fallback lookup path. Campaigns that announce a
    /// regular tile layout get [`Campaign::tile_index`] instead, which
    /// `file_indices_containing` prefers whenever it's present.
    pub(crate) file_grid: super::grid::SpatialGrid,
    /// O(1) tile lookup built only when `tile_dimension_m` was announced.
    pub(crate) tile_index: Option<TileIndex>,
}

impl Campaign {
    pub fn latest_survey_year(&self) -> Option<i32> {
        self.survey_years.iter().copied().max()
    }

    /// Files within this campaign whose bounds contain `(lat, lon)`.
    /// Uses the campaign's internal grid rather than a linear scan.
    pub fn files_containing(&self, lat: f64, lon: f64) -> Vec<&FileRef> {
        self.file_indices_containing(lat, lon)
            .into_iter()
            .map(|idx| &self.files[idx])
            .collect()
    }

    /// Same as [`Campaign::files_containing`] but returns indices into
    /// `self.files`, for callers (the selector) that need an owned handle
    /// that can cross an `.await` without borrowing the index. Prefers the
    /// O(1) [`TileIndex`] fast path when the campaign announced a regular
    /// tile layout; falls back to the generic spatial grid otherwise.
    pub fn file_indices_containing(&self, lat: f64, lon: f64) -> Vec<usize> {
        if let Some(tile_index) = &self.tile_index {
            return tile_index
                .query(lat, lon)
                .into_iter()
                .filter(|&idx| self.files[idx].bounds.contains(lat, lon))
                .collect();
        }
        self.file_grid
            .query(lat, lon)
            .iter()
            .copied()
            .filter(|&idx| self.files[idx].bounds.contains(lat, lon))
            .collect()
    }
}

/// Buckets a campaign's files into a regular grid sized from its announced
/// `tile_dimension_m`, giving an O(1) lookup keyed on known tile geometry
/// rather than the file-count-sized [`super::grid::SpatialGrid`] (spec
/// §4.2: "exploit this metadata for O(1) tile lookup when tile dimensions
/// are announced"). A point query checks the point's own cell plus its
/// eight neighbors, to absorb files whose center sits near a cell edge;
/// the caller still runs an exact `BoundingBox::contains` test on the
/// result, so an overly generous neighbor search only costs a few extra
/// comparisons, never correctness.
#[derive(Debug)]
pub(crate) struct TileIndex {
    cell_size_lat_deg: f64,
    cell_size_lon_deg: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
}

impl TileIndex {
    pub(crate) fn build(files: &[FileRef], tile_dimension_m: f64, ref_lat: f64) -> Self {
        let cell_size_lat_deg = (tile_dimension_m / METERS_PER_DEGREE_LAT).max(1e-9);
        let lon_scale = (METERS_PER_DEGREE_LAT * ref_lat.to_radians().cos().abs()).max(1.0);
        let cell_size_lon_deg = (tile_dimension_m / lon_scale).max(1e-9);

        let mut cells: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
        for (idx, file) in files.iter().enumerate() {
            let center_lat = (file.bounds.min_lat + file.bounds.max_lat) / 2.0;
            let center_lon = (file.bounds.min_lon + file.bounds.max_lon) / 2.0;
            let cell = Self::cell_of(center_lat, center_lon, cell_size_lat_deg, cell_size_lon_deg);
            cells.entry(cell).or_default().push(idx);
        }

        Self { cell_size_lat_deg, cell_size_lon_deg, cells }
    }

    fn cell_of(lat: f64, lon: f64, cell_size_lat_deg: f64, cell_size_lon_deg: f64) -> (i64, i64) {
        ((lat / cell_size_lat_deg).floor() as i64, (lon / cell_size_lon_deg).floor() as i64)
    }

    /// Candidate file indices in the point's cell and its eight neighbors.
    /// Still needs an exact bounds check downstream.
    pub(crate) fn query(&self, lat: f64, lon: f64) -> Vec<usize> {
        let (row, col) = Self::cell_of(lat, lon, self.cell_size_lat_deg, self.cell_size_lon_deg);
        let mut out = Vec::new();
        for dr in -1..=1 {
            for dc in -1..=1 {
                if let Some(bucket) = self.cells.get(&(row + dr, col + dc)) {
                    out.extend(bucket.iter().copied());
                }
            }
        }
        out
    }
}

/// Outcome of loading the unified index: what was accepted, what was
/// dropped and why, and every bounds-normalization warning emitted along
/// the way. Named in spec §4.2 ("recorded in a load report").
#[derive(Debug, Default, Serialize)]
pub struct LoadReport {
    pub collections_accepted: usize,
    pub collections_dropped: Vec<DroppedCollection>,
    pub normalization_warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DroppedCollection {
    pub id: String,
    pub reason: String,
}

pub struct UnifiedIndex {
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub collections: Vec<Campaign>,
    pub(crate) grid: super::grid::SpatialGrid,
    pub load_report: LoadReport,
}
