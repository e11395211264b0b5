//! Met Office Weather Observations Website (WOW) upload.
//!
//! WOW takes the Weather Underground style imperial parameter set.
use async_trait::async_trait;
use std::sync::Arc;

use super::error::DeliveryError;
use super::policy::RetryPolicy;
use super::transport::{classify_status, Transport, UploadRequest, UploadResponse};
use super::Target;
use crate::config::{resolve_secret, MetOfficeConfig};
use crate::logutil::body_preview;
use crate::observation::{Observation, ValidatedObservation};

pub const WOW_URL: &str = "http://wow.metoffice.gov.uk/automaticreading";
const MM_PER_INCH: f64 = 25.4;

fn mm_to_inches(mm: f64) -> f64 {
    (mm / MM_PER_INCH * 100.0).round() / 100.0
}

pub fn build_request(
    obs: &Observation,
    site_id: &str,
    auth_key: &str,
    software_type: &str,
) -> UploadRequest {
    UploadRequest::get(WOW_URL)
        .param("siteid", site_id)
        .param("siteAuthenticationKey", auth_key)
        .param("softwaretype", software_type)
        .param("dateutc", obs.timestamp.format("%Y-%m-%d %H:%M:%S"))
        .param("tempf", obs.temperature_f)
        .param("dewptf", obs.dew_point)
        .param("humidity", obs.humidity)
        .param("windspeedmph", obs.wind_speed)
        .param("winddir", obs.wind_direction)
        .param("windgustmph", obs.wind_gust)
        .param("rainin", mm_to_inches(obs.last_hour_rain))
        .param("baromin", obs.barometer)
}

pub fn interpret(response: &UploadResponse) -> Result<(), DeliveryError> {
    if response.status == 429 {
        return Err(DeliveryError::non_retryable("metoffice rate limited (HTTP 429)"));
    }
    classify_status("metoffice", response)?;
    if response.body.trim() == "{}" {
        Ok(())
    } else {
        Err(DeliveryError::retryable(format!(
            "metoffice replied with unexpected body: {}",
            body_preview(&response.body)
        )))
    }
}

pub struct MetOfficeTarget {
    site_id: Option<String>,
    auth_key: Option<String>,
    software_type: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl MetOfficeTarget {
    pub fn new(
        site_id: Option<String>,
        auth_key: Option<String>,
        software_type: impl Into<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            site_id,
            auth_key,
            software_type: software_type.into(),
            transport,
            policy,
        }
    }

    pub fn from_config(cfg: &MetOfficeConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            resolve_secret(&cfg.site_id, "METOFFICE_SITE_ID"),
            resolve_secret(&cfg.auth_key, "METOFFICE_AUTH_KEY"),
            cfg.software_type.clone(),
            transport,
            RetryPolicy::metoffice().with_overrides(cfg.retry.as_ref()),
        )
    }
}

#[async_trait]
impl Target for MetOfficeTarget {
    fn name(&self) -> &str {
        "metoffice"
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.site_id.is_none() {
            missing.push("site_id");
        }
        if self.auth_key.is_none() {
            missing.push("auth_key");
        }
        missing
    }

    async fn attempt(&self, record: &ValidatedObservation) -> Result<(), DeliveryError> {
        let (Some(site_id), Some(auth_key)) = (&self.site_id, &self.auth_key) else {
            return Err(DeliveryError::non_retryable("metoffice credentials missing"));
        };
        let request =
            build_request(&record.observation, site_id, auth_key, &self.software_type);
        let response = self.transport.send(request).await?;
        interpret(&response)
    }
}
