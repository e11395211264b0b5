//! Primary persistence as a delivery target.
use async_trait::async_trait;
use std::sync::Arc;

use super::error::DeliveryError;
use super::policy::RetryPolicy;
use super::Target;
use crate::config::StoreTargetConfig;
use crate::observation::ValidatedObservation;
use crate::storage::{ObservationSink, StoreError};

impl From<StoreError> for DeliveryError {
    fn from(e: StoreError) -> Self {
        if e.is_retryable() {
            DeliveryError::retryable(e.to_string())
        } else {
            DeliveryError::non_retryable(e.to_string())
        }
    }
}

/// Writes accepted records to the sink. Built separately for the
/// disregarded path, which gets a single attempt.
pub struct StoreTarget {
    name: &'static str,
    sink: Arc<dyn ObservationSink>,
    policy: RetryPolicy,
}

impl StoreTarget {
    pub fn accepted(sink: Arc<dyn ObservationSink>, cfg: &StoreTargetConfig) -> Self {
        Self {
            name: "store",
            sink,
            policy: RetryPolicy::store().with_overrides(cfg.retry.as_ref()),
        }
    }

    pub fn disregarded(sink: Arc<dyn ObservationSink>) -> Self {
        Self {
            name: "disregarded-store",
            sink,
            policy: RetryPolicy::disregarded_store(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Target for StoreTarget {
    fn name(&self) -> &str {
        self.name
    }

    fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        self.sink.missing_credentials()
    }

    async fn attempt(&self, record: &ValidatedObservation) -> Result<(), DeliveryError> {
        if record.is_accepted() {
            self.sink.insert_accepted(&record.observation).await?;
        } else {
            self.sink.insert_disregarded(record).await?;
        }
        Ok(())
    }
}
