use thiserror::Error;

/// Outcome of a failed delivery attempt, as seen by the retry loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Retrying cannot help (bad credentials, rate limited, malformed record).
    #[error("non-retryable: {0}")]
    NonRetryable(String),
    /// Transient failure; the attempt may be repeated after a delay.
    #[error("retryable: {0}")]
    Retryable(String),
}

impl DeliveryError {
    pub fn non_retryable(msg: impl Into<String>) -> Self {
        DeliveryError::NonRetryable(msg.into())
    }

    pub fn retryable(msg: impl Into<String>) -> Self {
        DeliveryError::Retryable(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            DeliveryError::NonRetryable(m) | DeliveryError::Retryable(m) => m,
        }
    }
}

/// Failure below the HTTP status level.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("http support not compiled in")]
    Unsupported,
}

impl From<TransportError> for DeliveryError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Unsupported => DeliveryError::non_retryable(e.to_string()),
            other => DeliveryError::retryable(other.to_string()),
        }
    }
}
