use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use proj::Proj;

use crate::error::ElevationError;

/// An opaque CRS identifier, carried as an EPSG code. `WGS84` (4326) is the
/// canonical exchange CRS at every boundary of the core; rasters are
/// sampled in their own native CRS after transforming the query point into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(pub u32);

impl Crs {
    pub const WGS84: Crs = Crs(4326);

    pub fn epsg_string(&self) -> String {
        format!("EPSG:{}", self.0)
    }
}

/// Global cache of compiled PROJ transforms, keyed by `(from, to)`. Building
/// a `Proj` pipeline parses the PROJ database on every call, so the chain
/// and raster layers share this cache rather than rebuilding transforms per
/// request — the same "don't re-derive per request" principle the rest of
/// the crate applies to the dataset handle cache.
static TRANSFORM_CACHE: Lazy<DashMap<(Crs, Crs), Arc<Proj>>> = Lazy::new(DashMap::new);

fn get_or_build(from: Crs, to: Crs) -> Result<Arc<Proj>, ElevationError> {
    if let Some(existing) = TRANSFORM_CACHE.get(&(from, to)) {
        return Ok(existing.clone());
    }
    let proj = Proj::new_known_crs(&from.epsg_string(), &to.epsg_string(), None).map_err(|e| {
        ElevationError::UnsupportedCrs {
            crs: format!("{} -> {} ({e})", from.epsg_string(), to.epsg_string()),
        }
    })?;
    let arc = Arc::new(proj);
    TRANSFORM_CACHE.insert((from, to), arc.clone());
    Ok(arc)
}

/// Project `(x, y)` from `from` into `to`. For geographic CRSes `(x, y)` is
/// `(lon, lat)`; for projected CRSes it is `(easting, northing)`. Callers at
/// the module boundary are responsible for using the right axis order; this
/// function is a thin, cached wrapper around PROJ and does not re-interpret
/// axis order itself.
pub fn transform(from: Crs, to: Crs, x: f64, y: f64) -> Result<(f64, f64), ElevationError> {
    if from == to {
        return Ok((x, y));
    }
    let proj = get_or_build(from, to)?;
    proj.convert((x, y)).map_err(|e| ElevationError::UnsupportedCrs {
        crs: format!("{} -> {}: {e}", from.epsg_string(), to.epsg_string()),
    })
}
