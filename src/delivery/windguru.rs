//! Windguru station upload.
//!
//! Each request is signed with a fresh random salt: `hash = md5(salt + uid + password)`.
//! Wind values are sent in knots.
use async_trait::async_trait;
use md5::{Digest, Md5};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;

use super::error::DeliveryError;
use super::policy::RetryPolicy;
use super::transport::{classify_status, Transport, UploadRequest, UploadResponse};
use super::Target;
use crate::config::{resolve_secret, WindguruConfig};
use crate::logutil::body_preview;
use crate::observation::{round1, Observation, ValidatedObservation};

pub const WINDGURU_URL: &str = "https://www.windguru.cz/upload/api.php";
/// Averaging window the console reports as its 2-minute wind average.
pub const MEASUREMENT_INTERVAL_SECS: u32 = 120;
const SALT_LEN: usize = 30;
const MPH_PER_KNOT: f64 = 1.151;

pub fn mph_to_knots(mph: f64) -> f64 {
    round1(mph / MPH_PER_KNOT)
}

pub fn make_salt() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect()
}

pub fn signature(salt: &str, uid: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(salt.as_bytes());
    hasher.update(uid.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn build_request(obs: &Observation, uid: &str, password: &str, salt: &str) -> UploadRequest {
    UploadRequest::get(WINDGURU_URL)
        .param("uid", uid)
        .param("interval", MEASUREMENT_INTERVAL_SECS)
        .param("wind_avg", mph_to_knots(obs.wind_2min_average))
        .param("wind_max", mph_to_knots(obs.wind_gust))
        .param("wind_direction", obs.wind_direction)
        .param("temperature", obs.temperature_c)
        .param("rh", obs.humidity)
        .param("datetime", obs.timestamp.to_rfc3339())
        .param("salt", salt)
        .param("hash", signature(salt, uid, password))
}

/// Windguru answers 200 with a plain-text verdict; only `OK` is success.
pub fn interpret(response: &UploadResponse) -> Result<(), DeliveryError> {
    classify_status("windguru", response)?;
    if response.body.trim() == "OK" {
        Ok(())
    } else {
        Err(DeliveryError::retryable(format!(
            "windguru replied {}",
            body_preview(&response.body)
        )))
    }
}

pub struct WindguruTarget {
    uid: Option<String>,
    password: Option<String>,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl WindguruTarget {
    pub fn new(
        uid: Option<String>,
        password: Option<String>,
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            uid,
            password,
            transport,
            policy,
        }
    }

    pub fn from_config(cfg: &WindguruConfig, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            resolve_secret(&cfg.uid, "WINDGURU_UID"),
            resolve_secret(&cfg.password, "WINDGURU_PASSWORD"),
            transport,
            RetryPolicy::windguru().with_overrides(cfg.retry.as_ref()),
        )
    }
}

#[async_trait]
impl Target for WindguruTarget {
    fn name(&self) -> &str {
        "windguru"
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.uid.is_none() {
            missing.push("uid");
        }
        if self.password.is_none() {
            missing.push("password");
        }
        missing
    }

    async fn attempt(&self, record: &ValidatedObservation) -> Result<(), DeliveryError> {
        let (Some(uid), Some(password)) = (&self.uid, &self.password) else {
            return Err(DeliveryError::non_retryable("windguru credentials missing"));
        };
        let request = build_request(&record.observation, uid, password, &make_salt());
        let response = self.transport.send(request).await?;
        interpret(&response)
    }
}
