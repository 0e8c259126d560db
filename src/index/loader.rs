use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ElevationError;
use crate::geo::bounds::normalize_value;

use super::grid::{SpatialGrid, DEFAULT_GRID_SIZE};
use super::model::{Campaign, CollectionType, DataType, DroppedCollection, FileRef, LoadReport, TileIndex, UnifiedIndex};

const SUPPORTED_MAJOR_VERSION: &str = "2";

#[derive(Debug, Deserialize)]
struct RawIndex {
    version: String,
    generated_at: DateTime<Utc>,
    data_collections: Vec<RawCampaign>,
}

#[derive(Debug, Deserialize)]
struct RawCampaign {
    id: String,
    collection_type: CollectionType,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    survey_name: Option<String>,
    #[serde(default)]
    survey_years: Vec<i32>,
    data_type: DataType,
    resolution_m: f64,
    provider: String,
    priority: u8,
    /// Deliberately untyped: the three legal bounds shapes (spec §4.1) are
    /// matched per-record in [`build_campaign`] rather than eagerly by
    /// `serde`, so that one malformed record doesn't fail the whole index
    /// document's `serde_json::from_str` call.
    coverage_bounds: serde_json::Value,
    #[serde(default)]
    files: Vec<RawFileRef>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawFileRef {
    file: String,
    filename: String,
    bounds: serde_json::Value,
    #[serde(default)]
    size_mb: f64,
    last_modified: DateTime<Utc>,
    #[serde(default)]
    resolution: Option<String>,
}

fn parse_resolution_m(s: &str) -> Option<f64> {
    let trimmed = s.trim().trim_end_matches('m').trim();
    trimmed.parse::<f64>().ok()
}

fn major_version(v: &str) -> &str {
    v.split('.').next().unwrap_or(v)
}

/// Parse and validate a unified index JSON blob, producing a ready-to-query
/// [`UnifiedIndex`]. This is the only place bounds normalization happens;
/// every component downstream assumes WGS84-canonical bounds thereafter.
/// A campaign or file record with a bounds shape that matches none of the
/// three legal variants is dropped (recorded in the load report), not a
/// fatal error for the whole document — only a structurally broken top-
/// level JSON document fails `load_from_str` outright.
pub fn load_from_str(json: &str, grid_size: usize) -> Result<UnifiedIndex, ElevationError> {
    let raw: RawIndex = serde_json::from_str(json).map_err(|e| ElevationError::BoundsFormat {
        reason: format!("index JSON parse error: {e}"),
    })?;

    if major_version(&raw.version) != SUPPORTED_MAJOR_VERSION {
        return Err(ElevationError::SchemaVersion {
            found: raw.version.clone(),
            supported: format!("{SUPPORTED_MAJOR_VERSION}.x"),
        });
    }

    let mut report = LoadReport::default();
    let mut campaigns = Vec::with_capacity(raw.data_collections.len());

    for rc in raw.data_collections {
        match build_campaign(rc, &mut report.normalization_warnings) {
            Ok(campaign) => {
                report.collections_accepted += 1;
                campaigns.push(campaign);
            }
            Err((id, reason)) => report.collections_dropped.push(DroppedCollection { id, reason }),
        }
    }

    let bounds: Vec<_> = campaigns.iter().map(|c: &Campaign| c.coverage_bounds).collect();
    let grid = if bounds.is_empty() {
        SpatialGrid::empty(grid_size)
    } else {
        SpatialGrid::build(&bounds, grid_size)
    };

    Ok(UnifiedIndex {
        version: raw.version,
        generated_at: raw.generated_at,
        collections: campaigns,
        grid,
        load_report: report,
    })
}

pub fn load_from_str_default(json: &str) -> Result<UnifiedIndex, ElevationError> {
    load_from_str(json, DEFAULT_GRID_SIZE)
}

fn build_campaign(rc: RawCampaign, warnings: &mut Vec<String>) -> Result<Campaign, (String, String)> {
    let id = Uuid::parse_str(&rc.id).map_err(|e| (rc.id.clone(), format!("invalid uuid: {e}")))?;

    let coverage_bounds = normalize_value(&rc.coverage_bounds).map_err(|e| (rc.id.clone(), e.to_string()))?;

    if matches!(rc.collection_type, CollectionType::ApiSource) && !rc.files.is_empty() {
        warnings.push(format!("campaign {} is api_source but declares files; files ignored", rc.id));
    }
    if !matches!(rc.collection_type, CollectionType::ApiSource) && rc.files.is_empty() {
        return Err((rc.id.clone(), "non-api_source campaign has zero files".to_string()));
    }

    let mut files = Vec::with_capacity(rc.files.len());
    let mut union_bounds: Option<crate::geo::BoundingBox> = None;

    for rf in rc.files {
        if matches!(rc.collection_type, CollectionType::ApiSource) {
            continue;
        }
        let bounds = match normalize_value(&rf.bounds) {
            Ok(b) => b,
            Err(e) => {
                warnings.push(format!("file {} dropped: {e}", rf.file));
                continue;
            }
        };
        union_bounds = Some(union_bounds.map_or(bounds, |u| u.union(&bounds)));

        let resolution_m = rf
            .resolution
            .as_deref()
            .and_then(parse_resolution_m)
            .unwrap_or(rc.resolution_m);

        files.push(FileRef::new(
            rf.file,
            rf.filename,
            bounds,
            (rf.size_mb * 1_048_576.0) as u64,
            rf.last_modified,
            resolution_m,
        ));
    }

    if !matches!(rc.collection_type, CollectionType::ApiSource) && files.is_empty() {
        return Err((rc.id.clone(), "non-api_source campaign has zero files with valid bounds".to_string()));
    }

    if let Some(union) = union_bounds
        && (union.min_lat < coverage_bounds.min_lat - 1e-3
            || union.max_lat > coverage_bounds.max_lat + 1e-3
            || union.min_lon < coverage_bounds.min_lon - 1e-3
            || union.max_lon > coverage_bounds.max_lon + 1e-3)
    {
        warnings.push(format!(
            "campaign {} coverage_bounds does not contain union of file bounds",
            id
        ));
    }

    let tile_dimension_m = rc
        .metadata
        .get("tile_dimension_m")
        .and_then(|v| v.as_f64());

    let file_bounds: Vec<_> = files.iter().map(|f| f.bounds).collect();
    let file_grid_size = ((files.len() as f64).sqrt().ceil() as usize).clamp(1, 64);
    let file_grid = SpatialGrid::build(&file_bounds, file_grid_size);

    let tile_index = tile_dimension_m.map(|dim| {
        let ref_lat = (coverage_bounds.min_lat + coverage_bounds.max_lat) / 2.0;
        TileIndex::build(&files, dim, ref_lat)
    });

    Ok(Campaign {
        id,
        collection_type: rc.collection_type,
        country: rc.country,
        region: rc.region,
        survey_name: rc.survey_name,
        survey_years: rc.survey_years,
        data_type: rc.data_type,
        resolution_m: rc.resolution_m,
        provider: rc.provider,
        coverage_bounds,
        files,
        priority: rc.priority.clamp(1, 4),
        tile_dimension_m,
        file_grid,
        tile_index,
    })
}
