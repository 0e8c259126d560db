use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use crate::error::ElevationError;

use super::{ObjectLocation, ObjectStore};

/// Object storage access via `aws-sdk-s3`'s ranged `GetObject`. Works
/// against any S3-compatible endpoint the client is configured for, not
/// only AWS proper.
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a client from the ambient AWS config (environment, profile,
    /// or instance role), the same discovery chain `aws-config` always uses.
    pub async fn from_env() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&config))
    }
}

fn classify_sdk_error(err: impl std::fmt::Display, uri: &str) -> ElevationError {
    let msg = err.to_string();
    if msg.contains("NoSuchKey") || msg.contains("404") {
        ElevationError::RasterMissing { uri: uri.to_string() }
    } else if msg.contains("AccessDenied") || msg.contains("403") {
        ElevationError::RasterAccess { uri: uri.to_string() }
    } else {
        ElevationError::Transient {
            reason: format!("{uri}: {msg}"),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_range(&self, location: &ObjectLocation, start: u64, end: u64) -> Result<Bytes, ElevationError> {
        let uri = format!("s3://{}/{}", location.bucket, location.key);
        // Range is inclusive on both ends in the HTTP Range header.
        let range = format!("bytes={start}-{}", end.saturating_sub(1));

        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .range(range)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &uri))?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ElevationError::Transient {
                reason: format!("{uri}: failed to read body: {e}"),
            })?;

        Ok(body.into_bytes())
    }

    async fn size(&self, location: &ObjectLocation) -> Result<u64, ElevationError> {
        let uri = format!("s3://{}/{}", location.bucket, location.key);
        let output = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| classify_sdk_error(e, &uri))?;

        Ok(output.content_length().unwrap_or(0).max(0) as u64)
    }
}
