use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::ElevationError;
use crate::raster::DatasetCache;
use crate::selector::Selector;

use super::{Outcome, Tier};

/// The S3 tier: spatial selection plus raster sampling over object
/// storage. Tried first whenever the selector has any coverage at all
/// (spec §4.5); an empty selector result is a [`Outcome::Skip`], not a
/// failure, so the chain falls through to the API tiers without
/// penalizing this tier's circuit breaker.
///
/// `selector` starts `None` when the index hasn't finished its initial
/// load yet (spec §4.2: "Query on a non-loaded index fails with
/// `ErrIndexNotReady`"). [`S3Tier::set_selector`] installs it once loading
/// completes, and again on every index rotation (spec §3.3).
pub struct S3Tier {
    selector: RwLock<Option<Arc<Selector>>>,
    cache: Arc<DatasetCache>,
}

impl S3Tier {
    pub fn new(selector: Arc<Selector>, cache: Arc<DatasetCache>) -> Self {
        Self { selector: RwLock::new(Some(selector)), cache }
    }

    /// Constructs the tier before any index has loaded. Every `attempt()`
    /// returns `ErrIndexNotReady` until [`S3Tier::set_selector`] is called.
    pub fn pending(cache: Arc<DatasetCache>) -> Self {
        Self { selector: RwLock::new(None), cache }
    }

    /// Installs (or replaces, on rotation) the selector backing this tier.
    pub async fn set_selector(&self, selector: Arc<Selector>) {
        *self.selector.write().await = Some(selector);
    }
}

#[async_trait]
impl Tier for S3Tier {
    fn name(&self) -> &str {
        "s3"
    }

    async fn attempt(&self, lat: f64, lon: f64, _timeout: Duration, cancel: &CancellationToken) -> Outcome {
        let Some(selector) = self.selector.read().await.clone() else {
            return Outcome::PermanentErr(ElevationError::IndexNotReady);
        };
        let candidates = selector.select(lat, lon);
        if candidates.is_empty() {
            return Outcome::Skip("no campaign covers this point");
        }

        let mut last_err = None;
        for candidate in candidates.iter() {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            let file = candidate.file();
            let handle = match self.cache.open(&file.path).await {
                Ok(h) => h,
                Err(e) => {
                    if e.retriable() {
                        last_err = Some(Outcome::RetriableErr(e));
                    } else {
                        last_err = Some(Outcome::PermanentErr(e));
                    }
                    continue;
                }
            };
            file.set_native_crs(handle.native_crs());
            file.set_nodata(handle.nodata());

            match handle.sample_point(lat, lon).await {
                Ok((Some(elevation_m), _)) => {
                    return Outcome::Hit {
                        elevation_m,
                        source_id: candidate.source_id(),
                        datum: None,
                    };
                }
                Ok((None, _)) => continue, // out of raster or nodata; try the next candidate
                Err(e) => {
                    last_err = Some(if e.retriable() { Outcome::RetriableErr(e) } else { Outcome::PermanentErr(e) });
                }
            }
        }

        last_err.unwrap_or(Outcome::Miss)
    }
}
