use serde::{Deserialize, Serialize};

use crate::error::ElevationError;

/// A WGS84-canonical bounding box: `(min_lat, max_lat, min_lon, max_lon)`.
///
/// Every downstream component assumes values already live in this shape.
/// Normalization from the legacy raster-library and projected-axis shapes
/// happens once, at load, in [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Inclusive on all four edges: a point on the boundary is inside.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat <= self.max_lat && lon >= self.min_lon && lon <= self.max_lon
    }

    /// Coarse area in square degrees. Only used for tie-breaking, never geodesy.
    pub fn area(&self) -> f64 {
        (self.max_lat - self.min_lat).max(0.0) * (self.max_lon - self.min_lon).max(0.0)
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_lat: self.min_lat.min(other.min_lat),
            max_lat: self.max_lat.max(other.max_lat),
            min_lon: self.min_lon.min(other.min_lon),
            max_lon: self.max_lon.max(other.max_lon),
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }

    fn is_valid(&self) -> bool {
        self.min_lat.is_finite()
            && self.max_lat.is_finite()
            && self.min_lon.is_finite()
            && self.max_lon.is_finite()
            && self.min_lat <= self.max_lat
            && self.min_lon <= self.max_lon
    }
}

/// Raw shapes accepted from the index JSON, normalized once at load time.
/// See spec §4.1/§6.1: three legal shapes, everything else is `ErrBoundsFormat`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawBounds {
    Wgs84 {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
    ProjectedAxis {
        min_x: f64,
        max_x: f64,
        min_y: f64,
        max_y: f64,
    },
    RasterConvention {
        left: f64,
        right: f64,
        bottom: f64,
        top: f64,
    },
}

/// Normalize any of the three legal raw shapes into WGS84-canonical bounds,
/// swapping min/max where the source disagrees on axis order so that the
/// invariant `min ≤ max` always holds afterward.
///
/// Idempotent: `normalize(normalize(b)) == normalize(b)` for all legal `b`
/// (property P1). `BoundingBox` is already in canonical form, so feeding
/// one back through is a no-op modulo the swap-to-valid step, which is
/// itself idempotent on already-valid input.
pub fn normalize(raw: &RawBounds) -> Result<BoundingBox, ElevationError> {
    let (min_lat, max_lat, min_lon, max_lon) = match *raw {
        RawBounds::Wgs84 {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        } => (min_lat, max_lat, min_lon, max_lon),
        // x = lon, y = lat by convention.
        RawBounds::ProjectedAxis {
            min_x,
            max_x,
            min_y,
            max_y,
        } => (min_y, max_y, min_x, max_x),
        RawBounds::RasterConvention {
            left,
            right,
            bottom,
            top,
        } => (bottom, top, left, right),
    };

    let bbox = BoundingBox {
        min_lat: min_lat.min(max_lat),
        max_lat: min_lat.max(max_lat),
        min_lon: min_lon.min(max_lon),
        max_lon: min_lon.max(max_lon),
    };

    if !bbox.is_valid() {
        return Err(ElevationError::BoundsFormat {
            reason: format!("non-finite or degenerate bounds: {raw:?}"),
        });
    }

    Ok(bbox)
}

/// Normalize an already-canonical `BoundingBox`, for callers that need to
/// push a value through the same idempotent path (e.g. property tests).
pub fn renormalize(bbox: &BoundingBox) -> Result<BoundingBox, ElevationError> {
    normalize(&RawBounds::Wgs84 {
        min_lat: bbox.min_lat,
        max_lat: bbox.max_lat,
        min_lon: bbox.min_lon,
        max_lon: bbox.max_lon,
    })
}

/// Same as [`normalize`], but starting from an untyped JSON value rather
/// than an already-shape-matched [`RawBounds`]. Used at load time so that
/// one record's bounds failing to match any of the three legal shapes
/// becomes a per-record [`ElevationError::BoundsFormat`] the caller can
/// drop gracefully, rather than a `serde_json::from_str` failure that
/// aborts the whole index document (spec §4.2).
pub fn normalize_value(raw: &serde_json::Value) -> Result<BoundingBox, ElevationError> {
    let parsed: RawBounds = serde_json::from_value(raw.clone()).map_err(|e| ElevationError::BoundsFormat {
        reason: format!("unrecognized bounds shape: {e}"),
    })?;
    normalize(&parsed)
}
