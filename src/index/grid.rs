use crate::geo::BoundingBox;

/// Default grid resolution: 50x50 cells over the dataset's global bounds.
/// Tunable (spec §4.2: "Grid size is tunable"); the contract is expected
/// O(log N)-ish lookup on real data with no false negatives, not a fixed size.
pub const DEFAULT_GRID_SIZE: usize = 50;

/// Global bounds are padded by this many degrees so that a campaign whose
/// bounds sit exactly on the dataset's edge is never dropped by floating
/// point rounding during cell assignment.
const GLOBAL_BOUNDS_PADDING_DEG: f64 = 0.01;

/// A uniform grid over WGS84 space used to narrow a point query to a
/// handful of candidate campaigns before the exact bounds test.
///
/// Every campaign is inserted into *every* cell its bounds intersect
/// (a campaign can span several cells); a point query looks up the single
/// cell containing the point and returns its candidate list, which the
/// caller then filters with an exact containment test. This mirrors the
/// grid used by the system this crate's selector pipeline descends from.
pub struct SpatialGrid {
    global_bounds: BoundingBox,
    grid_size: usize,
    cells: Vec<Vec<usize>>,
}

impl SpatialGrid {
    /// Builds a grid over `bounds` (one entry per campaign, in campaign
    /// index order). Campaigns with degenerate or non-finite bounds should
    /// be filtered out by the caller before this is invoked.
    pub fn build(bounds: &[BoundingBox], grid_size: usize) -> Self {
        let global_bounds = Self::global_bounds_of(bounds);
        let mut cells = vec![Vec::new(); grid_size * grid_size];

        for (idx, bbox) in bounds.iter().enumerate() {
            for (row, col) in Self::cells_for_bounds(&global_bounds, grid_size, bbox) {
                cells[row * grid_size + col].push(idx);
            }
        }

        Self {
            global_bounds,
            grid_size,
            cells,
        }
    }

    pub fn empty(grid_size: usize) -> Self {
        Self {
            global_bounds: BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            grid_size,
            cells: vec![Vec::new(); grid_size * grid_size],
        }
    }

    fn global_bounds_of(bounds: &[BoundingBox]) -> BoundingBox {
        if bounds.is_empty() {
            return BoundingBox::new(-90.0, 90.0, -180.0, 180.0);
        }
        let mut acc = bounds[0];
        for b in &bounds[1..] {
            acc = acc.union(b);
        }
        BoundingBox::new(
            (acc.min_lat - GLOBAL_BOUNDS_PADDING_DEG).max(-90.0),
            (acc.max_lat + GLOBAL_BOUNDS_PADDING_DEG).min(90.0),
            (acc.min_lon - GLOBAL_BOUNDS_PADDING_DEG).max(-180.0),
            (acc.max_lon + GLOBAL_BOUNDS_PADDING_DEG).min(180.0),
        )
    }

    fn cell_of_point(global_bounds: &BoundingBox, grid_size: usize, lat: f64, lon: f64) -> (usize, usize) {
        let lat_span = (global_bounds.max_lat - global_bounds.min_lat).max(f64::EPSILON);
        let lon_span = (global_bounds.max_lon - global_bounds.min_lon).max(f64::EPSILON);

        let row_f = (lat - global_bounds.min_lat) / lat_span * grid_size as f64;
        let col_f = (lon - global_bounds.min_lon) / lon_span * grid_size as f64;

        let row = (row_f as isize).clamp(0, grid_size as isize - 1) as usize;
        let col = (col_f as isize).clamp(0, grid_size as isize - 1) as usize;
        (row, col)
    }

    /// All cells a bounding box's row/col range spans. A bbox larger than
    /// one cell is registered in every cell it overlaps, which is what
    /// makes the single-cell point lookup below correct without false
    /// negatives.
    fn cells_for_bounds(
        global_bounds: &BoundingBox,
        grid_size: usize,
        bbox: &BoundingBox,
    ) -> impl Iterator<Item = (usize, usize)> {
        let (min_row, min_col) = Self::cell_of_point(global_bounds, grid_size, bbox.min_lat, bbox.min_lon);
        let (max_row, max_col) = Self::cell_of_point(global_bounds, grid_size, bbox.max_lat, bbox.max_lon);

        (min_row..=max_row).flat_map(move |row| (min_col..=max_col).map(move |col| (row, col)))
    }

    /// Returns the indices of candidate campaigns whose bounds *may*
    /// contain `(lat, lon)`. Callers must still run an exact containment
    /// test, since a cell may hold candidates that only brush its corner.
    pub fn query(&self, lat: f64, lon: f64) -> &[usize] {
        if !self.global_bounds.contains(lat, lon) {
            return &[];
        }
        let (row, col) = Self::cell_of_point(&self.global_bounds, self.grid_size, lat, lon);
        &self.cells[row * self.grid_size + col]
    }
}
