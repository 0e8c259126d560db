use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::error::ElevationError;

use super::{Outcome, Tier};

/// An external elevation API, treated as a black box (spec §6.3): a GET
/// endpoint taking `(lat, lon)`, authenticated by a header-carried key,
/// returning a JSON object with an elevation field in meters. Any 4xx
/// that isn't 408/429 is permanent; 5xx and 408/429 are retriable.
pub struct ApiTier {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ApiResponse {
    elevation: f64,
    #[serde(default)]
    datum: Option<String>,
}

impl ApiTier {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl Tier for ApiTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn attempt(&self, lat: f64, lon: f64, timeout: Duration, cancel: &CancellationToken) -> Outcome {
        let request = self
            .client
            .get(&self.base_url)
            .query(&[("lat", lat), ("lon", lon)])
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(timeout);

        let response = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            sent = request.send() => match sent {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    return Outcome::RetriableErr(ElevationError::Timeout { elapsed_ms: timeout.as_millis() as u64 });
                }
                Err(e) => return Outcome::RetriableErr(ElevationError::Transient { reason: e.to_string() }),
            },
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            return Outcome::RetriableErr(ElevationError::RateLimited { retry_after_ms });
        }
        if status.as_u16() == 408 || status.is_server_error() {
            return Outcome::RetriableErr(ElevationError::Transient { reason: format!("http {status}") });
        }
        if status.is_client_error() {
            return Outcome::PermanentErr(ElevationError::RasterAccess { uri: format!("{}: http {status}", self.base_url) });
        }

        match response.json::<ApiResponse>().await {
            Ok(body) => Outcome::Hit {
                elevation_m: body.elevation,
                source_id: self.name.clone(),
                datum: body.datum,
            },
            Err(e) => Outcome::RetriableErr(ElevationError::Transient { reason: format!("malformed response body: {e}") }),
        }
    }
}
