//! Retry policies and the stock values for each delivery target.
use log::warn;
use std::time::Duration;

use crate::config::{BackoffKind, RetryConfig};

/// Upper bound for a single backoff sleep when no override is given.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is `retry_limit + 1`.
    pub retry_limit: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffKind,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Bound on each individual attempt.
    pub timeout: Duration,
}

impl RetryPolicy {
    fn exponential(retry_limit: u32, retry_delay: Duration, timeout: Duration) -> Self {
        Self {
            retry_limit,
            retry_delay,
            backoff: BackoffKind::Exponential,
            backoff_factor: 2.0,
            max_delay: DEFAULT_MAX_DELAY,
            timeout,
        }
    }

    /// A single attempt with no retries.
    pub fn once(timeout: Duration) -> Self {
        Self {
            retry_limit: 0,
            retry_delay: Duration::ZERO,
            backoff: BackoffKind::Constant,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
            timeout,
        }
    }

    pub fn store() -> Self {
        Self::exponential(30, Duration::from_secs(5), Duration::from_secs(2))
    }

    pub fn disregarded_store() -> Self {
        Self::once(Duration::from_secs(2))
    }

    pub fn windguru() -> Self {
        Self::exponential(10, Duration::from_secs(60), Duration::from_secs(5))
    }

    pub fn windy() -> Self {
        Self::exponential(2, Duration::from_secs(60), Duration::from_secs(5))
    }

    pub fn metoffice() -> Self {
        Self::exponential(10, Duration::from_secs(60), Duration::from_secs(5))
    }

    /// Apply the configured fields on top of this policy.
    pub fn with_overrides(mut self, overrides: Option<&RetryConfig>) -> Self {
        let Some(cfg) = overrides else {
            return self;
        };
        if let Some(limit) = cfg.retry_limit {
            self.retry_limit = limit;
        }
        if let Some(ms) = cfg.retry_delay_ms {
            self.retry_delay = Duration::from_millis(ms);
        }
        if let Some(kind) = cfg.backoff {
            self.backoff = kind;
        }
        if let Some(factor) = cfg.backoff_factor {
            if factor.is_finite() && factor >= 1.0 {
                self.backoff_factor = factor;
            } else {
                warn!("Ignoring backoff_factor {}; must be >= 1", factor);
            }
        }
        if let Some(secs) = cfg.max_delay_secs {
            self.max_delay = Duration::from_secs(secs);
        }
        if let Some(ms) = cfg.timeout_ms {
            self.timeout = Duration::from_millis(ms);
        }
        self
    }

    /// Sleep before the retry that follows `retries_done` failed retries.
    pub fn delay_for(&self, retries_done: u32) -> Duration {
        let delay = match self.backoff {
            BackoffKind::Constant => self.retry_delay,
            BackoffKind::Exponential => {
                let exp = i32::try_from(retries_done).unwrap_or(i32::MAX);
                let secs = self.retry_delay.as_secs_f64() * self.backoff_factor.powi(exp);
                if secs.is_finite() && secs < self.max_delay.as_secs_f64() {
                    Duration::from_secs_f64(secs)
                } else {
                    self.max_delay
                }
            }
        };
        delay.min(self.max_delay.max(self.retry_delay))
    }

    /// Total attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.retry_limit.saturating_add(1)
    }
}
