//! Windy.com personal weather station upload.
use async_trait::async_trait;
use std::sync::Arc;

use super::error::DeliveryError;
use super::policy::RetryPolicy;
use super::transport::{classify_status, Transport, UploadRequest, UploadResponse};
use super::Target;
use crate::config::{resolve_secret, WindyConfig};
use crate::logutil::body_preview;
use crate::observation::{Observation, ValidatedObservation};

pub const WINDY_BASE_URL: &str = "https://stations.windy.com/pws/update";
/// Windy's rate limiter reply; resending the same reading cannot succeed.
pub const TOO_SOON_MARKER: &str = "Measurement sent too soon";

pub fn build_request(obs: &Observation, api_key: &str, station_id: &str) -> UploadRequest {
    UploadRequest::get(format!(
        "{}/{}",
        WINDY_BASE_URL,
        urlencoding::encode(api_key)
    ))
    .param("station", station_id)
    .param("ts", obs.timestamp.timestamp_millis())
    .param("temp", obs.temperature_c)
    .param("windspeedmph", obs.wind_speed)
    .param("winddir", obs.wind_direction)
    .param("windgustmph", obs.wind_gust)
    .param("dewpoint", obs.dew_point_c())
    .param("precip", obs.last_hour_rain)
    .param("rh", obs.humidity)
}

pub fn interpret(response: &UploadResponse) -> Result<(), DeliveryError> {
    if response.body.contains(TOO_SOON_MARKER) {
        return Err(DeliveryError::non_retryable("windy: measurement sent too soon"));
    }
    classify_status("windy", response)?;
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(serde_json::Value::Object(_)) => Ok(()),
        _ => Err(DeliveryError::retryable(format!(
            "windy replied with unexpected body: {}",
            body_preview(&response.body)
        ))),
    }
}

pub struct WindyTarget {
    api_key: Option<String>,
    station_id: Option<String>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl WindyTarget {
    pub fn new(
        api_key: Option<String>,
        station_id: Option<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            api_key,
            station_id,
            transport,
            policy,
        }
    }

    pub fn from_config(cfg: &WindyConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            resolve_secret(&cfg.api_key, "WINDY_API_KEY"),
            resolve_secret(&cfg.station_id, "WINDY_STATION_ID"),
            transport,
            RetryPolicy::windy().with_overrides(cfg.retry.as_ref()),
        )
    }
}

#[async_trait]
impl Target for WindyTarget {
    fn name(&self) -> &str {
        "windy"
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.is_none() {
            missing.push("api_key");
        }
        if self.station_id.is_none() {
            missing.push("station_id");
        }
        missing
    }

    async fn attempt(&self, record: &ValidatedObservation) -> Result<(), DeliveryError> {
        let (Some(api_key), Some(station_id)) = (&self.api_key, &self.station_id) else {
            return Err(DeliveryError::non_retryable("windy credentials missing"));
        };
        let request = build_request(&record.observation, api_key, station_id);
        let response = self.transport.send(request).await?;
        interpret(&response)
    }
}
