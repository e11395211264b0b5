//! # Delivery Module - Fan-out to Persistence and Upload Targets
//!
//! The [`Dispatcher`] takes each validated observation and hands it to every
//! configured [`Target`] in its own task:
//!
//! - accepted records go to the primary store and every web target that has
//!   its credentials; targets without credentials are skipped, not failed
//! - disregarded records get one attempt at the disregard store
//!
//! Before fan-out, accepted records pass the structural field check from
//! [`crate::validation::check_structure`]. A record that fails it is re-routed
//! to the disregard store with reason "failed structural validation".
//!
//! ## Retry loop
//!
//! ```text
//! Pending ─▶ InFlight ─ok──────────────▶ Succeeded
//!              │  ▲
//!              │  └── sleep(backoff) ◀── Retrying ◀─ retryable / timeout
//!              ├─non-retryable─────────▶ FailedNonRetryable
//!              └─retry budget spent────▶ FailedExhausted
//! ```
//!
//! Each attempt is bounded by the target's timeout; a timeout counts as a
//! retryable failure. Targets never wait on one another.

pub mod error;
pub mod metoffice;
pub mod policy;
pub mod store;
pub mod transport;
pub mod windguru;
pub mod windy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::TargetsConfig;
use crate::metrics;
use crate::observation::{DisregardReason, ValidatedObservation};
use crate::storage::ObservationSink;
use crate::validation::check_structure;
use error::DeliveryError;
use policy::RetryPolicy;
use store::StoreTarget;
use transport::Transport;

/// A destination for observations.
#[async_trait]
pub trait Target: Send + Sync {
    fn name(&self) -> &str;

    fn policy(&self) -> &RetryPolicy;

    /// Names of required credentials that are not configured. A non-empty
    /// list means the target is skipped.
    fn missing_credentials(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// One delivery attempt, without retries or timeout.
    async fn attempt(&self, record: &ValidatedObservation) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttemptStatus {
    Pending,
    InFlight,
    Succeeded,
    Retrying,
    FailedNonRetryable,
    FailedExhausted,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Succeeded
                | AttemptStatus::FailedNonRetryable
                | AttemptStatus::FailedExhausted
        )
    }
}

/// Live state of one (observation, target) delivery.
#[derive(Debug)]
pub struct DeliveryAttempt {
    target: String,
    attempt_count: u32,
    status: AttemptStatus,
    history: Vec<AttemptStatus>,
    last_error: Option<DeliveryError>,
}

impl DeliveryAttempt {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            attempt_count: 0,
            status: AttemptStatus::Pending,
            history: vec![AttemptStatus::Pending],
            last_error: None,
        }
    }

    fn set(&mut self, status: AttemptStatus) {
        self.status = status;
        self.history.push(status);
    }

    fn begin(&mut self) {
        self.attempt_count += 1;
        self.set(AttemptStatus::InFlight);
    }

    fn fail(&mut self, status: AttemptStatus, err: DeliveryError) {
        self.last_error = Some(err);
        self.set(status);
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    pub fn into_report(self) -> DeliveryReport {
        DeliveryReport {
            target: self.target,
            status: self.status,
            attempts: self.attempt_count,
            last_error: self.last_error,
            history: self.history,
        }
    }
}

/// Terminal summary of a delivery.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub target: String,
    pub status: AttemptStatus,
    pub attempts: u32,
    pub last_error: Option<DeliveryError>,
    pub history: Vec<AttemptStatus>,
}

/// Run one target's attempt loop to a terminal status.
pub async fn drive(target: Arc<dyn Target>, record: Arc<ValidatedObservation>) -> DeliveryReport {
    let policy = target.policy().clone();
    let mut attempt = DeliveryAttempt::new(target.name());
    let mut retries_done = 0u32;

    loop {
        attempt.begin();
        let outcome = match tokio::time::timeout(policy.timeout, target.attempt(&record)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(DeliveryError::retryable(format!(
                "attempt timed out after {:?}",
                policy.timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                attempt.set(AttemptStatus::Succeeded);
                metrics::inc_delivery_succeeded();
                info!(
                    "Delivered to {} after {} attempt(s)",
                    target.name(),
                    attempt.attempt_count
                );
                break;
            }
            Err(e) if !e.is_retryable() => {
                error!("Delivery to {} failed permanently: {}", target.name(), e);
                metrics::inc_delivery_failed_nonretryable();
                attempt.fail(AttemptStatus::FailedNonRetryable, e);
                break;
            }
            Err(e) if retries_done >= policy.retry_limit => {
                error!(
                    "Delivery to {} gave up after {} attempt(s): {}",
                    target.name(),
                    attempt.attempt_count,
                    e
                );
                metrics::inc_delivery_failed_exhausted();
                attempt.fail(AttemptStatus::FailedExhausted, e);
                break;
            }
            Err(e) => {
                let delay = policy.delay_for(retries_done);
                warn!(
                    "Delivery to {} failed ({}); retry {}/{} in {:?}",
                    target.name(),
                    e,
                    retries_done + 1,
                    policy.retry_limit,
                    delay
                );
                metrics::inc_delivery_retries();
                attempt.fail(AttemptStatus::Retrying, e);
                tokio::time::sleep(delay).await;
                retries_done += 1;
            }
        }
    }

    attempt.into_report()
}

/// Turn an accepted record that fails the structural check into a disregarded one.
pub fn apply_structural_gate(
    mut record: ValidatedObservation,
    now: DateTime<Utc>,
) -> ValidatedObservation {
    if !record.is_accepted() {
        return record;
    }
    let issues = check_structure(&record.observation, now);
    if !issues.is_empty() {
        warn!(
            "Observation failed structural validation: {}",
            issues
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );
        metrics::inc_structural_rejects();
        record.disregard_reason = Some(DisregardReason::FailedStructuralValidation);
        record.structural_errors = issues;
    }
    record
}

/// In-flight deliveries for one observation.
pub struct DeliveryHandle {
    skipped: Vec<String>,
    tasks: JoinSet<DeliveryReport>,
}

impl DeliveryHandle {
    /// Targets left out for missing credentials.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every spawned delivery to reach a terminal status.
    pub async fn wait(mut self) -> Vec<DeliveryReport> {
        let mut reports = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Delivery task ended abnormally: {}", e),
            }
        }
        reports
    }
}

pub struct Dispatcher {
    targets: Vec<Arc<dyn Target>>,
    disregard: Arc<dyn Target>,
}

impl Dispatcher {
    pub fn new(targets: Vec<Arc<dyn Target>>, disregard: Arc<dyn Target>) -> Self {
        Self { targets, disregard }
    }

    /// Primary store plus every enabled web target.
    pub fn from_config(
        cfg: &TargetsConfig,
        sink: Arc<dyn ObservationSink>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut targets: Vec<Arc<dyn Target>> =
            vec![Arc::new(StoreTarget::accepted(sink.clone(), &cfg.store))];
        if cfg.windguru.enabled {
            targets.push(Arc::new(windguru::WindguruTarget::from_config(
                &cfg.windguru,
                transport.clone(),
            )));
        }
        if cfg.windy.enabled {
            targets.push(Arc::new(windy::WindyTarget::from_config(
                &cfg.windy,
                transport.clone(),
            )));
        }
        if cfg.metoffice.enabled {
            targets.push(Arc::new(metoffice::MetOfficeTarget::from_config(
                &cfg.metoffice,
                transport,
            )));
        }
        Self::new(targets, Arc::new(StoreTarget::disregarded(sink)))
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.name()).collect()
    }

    /// Spawn deliveries for one record. Must be called inside a tokio runtime.
    pub fn deliver(&self, record: ValidatedObservation) -> DeliveryHandle {
        let record = apply_structural_gate(record, Utc::now());
        let candidates: Vec<&Arc<dyn Target>> = if record.is_accepted() {
            self.targets.iter().collect()
        } else {
            vec![&self.disregard]
        };

        let record = Arc::new(record);
        let mut skipped = Vec::new();
        let mut tasks = JoinSet::new();
        for target in candidates {
            let missing = target.missing_credentials();
            if !missing.is_empty() {
                debug!(
                    "Skipping {}: missing {}",
                    target.name(),
                    missing.join(", ")
                );
                metrics::inc_delivery_skipped();
                skipped.push(target.name().to_string());
                continue;
            }
            tasks.spawn(drive(target.clone(), record.clone()));
        }
        DeliveryHandle { skipped, tasks }
    }
}
