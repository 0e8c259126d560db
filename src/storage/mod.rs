mod s3;

pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::ElevationError;

/// An object-storage URI split into its bucket and key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    /// Parses a `s3://bucket/key/with/slashes` URI.
    pub fn parse(uri: &str) -> Result<Self, ElevationError> {
        let rest = uri.strip_prefix("s3://").ok_or_else(|| ElevationError::BoundsFormat {
            reason: format!("not an s3:// URI: {uri}"),
        })?;
        let (bucket, key) = rest.split_once('/').ok_or_else(|| ElevationError::BoundsFormat {
            reason: format!("missing key in s3:// URI: {uri}"),
        })?;
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// What the raster access layer needs from object storage: ranged reads
/// and a size probe. Abstracted behind a trait so tests can supply an
/// in-memory fake instead of hitting a real bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch bytes `[start, end)` of the object at `location`.
    async fn get_range(&self, location: &ObjectLocation, start: u64, end: u64) -> Result<Bytes, ElevationError>;

    /// Total size of the object, via a HEAD request.
    async fn size(&self, location: &ObjectLocation) -> Result<u64, ElevationError>;
}
